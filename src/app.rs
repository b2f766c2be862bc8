// src/app.rs

use color_eyre::eyre::{Result, WrapErr};
use serde_json::{Value, json};
use tracing::{error, info};

use crate::config::Settings;
use crate::core::correlator::NvdClient;
use crate::core::ingest::IngestionPipeline;
use crate::core::launcher::{LaunchHandle, LaunchOutcome, Launcher};
use crate::core::models::{Scan, ScanReport, ScanSummary};
use crate::core::store::{JsonFileStore, Page, ScanStore};

/// Wires the configured store, CVE client and launcher together.
pub struct App {
    pipeline: IngestionPipeline<JsonFileStore, NvdClient>,
    launcher: Launcher,
}

impl App {
    pub fn new(settings: &Settings) -> Result<Self> {
        let store_path = settings.store.resolved_path();
        let store = JsonFileStore::open(&store_path)
            .wrap_err_with(|| format!("failed to open scan store at {}", store_path.display()))?;
        let correlator = NvdClient::new(&settings.nvd).wrap_err("failed to build NVD client")?;

        Ok(Self {
            pipeline: IngestionPipeline::new(store, correlator),
            launcher: Launcher::new(settings.launcher.clone()),
        })
    }

    /// Starts a detached scan; the handle may be awaited or dropped.
    pub fn launch(&self, target: &str, user_id: u64) -> LaunchHandle {
        self.launcher.launch(target, user_id)
    }

    /// Parses and ingests a raw report, answering with an acknowledgement
    /// document in either case.
    pub async fn ingest_report(&self, raw: &str, user_id: Option<u64>) -> Value {
        let report: ScanReport = match serde_json::from_str(raw) {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Rejected malformed scan report.");
                return failure(format!("Failed to process scan results: {e}"));
            }
        };

        match self.pipeline.ingest(report, user_id).await {
            Ok(scan) => {
                info!(scan_id = ?scan.id, "Scan results received.");
                json!({
                    "success": true,
                    "message": "Scan results received successfully",
                    "scanId": scan.id,
                })
            }
            Err(e) => {
                error!(error = %e, "Failed to persist scan.");
                failure(format!("Failed to process scan results: {e}"))
            }
        }
    }

    pub fn list(&self, page: usize, size: usize) -> Result<Page<ScanSummary>> {
        Ok(self.pipeline.store().list(page, size)?)
    }

    pub fn show(&self, id: u64) -> Result<Option<Scan>> {
        Ok(self.pipeline.store().find(id)?)
    }

    pub fn delete(&self, id: u64) -> Result<bool> {
        Ok(self.pipeline.store().delete(id)?)
    }
}

pub fn launch_acknowledgement(target: &str) -> Value {
    json!({
        "success": true,
        "message": format!("Scan launched successfully against {target}"),
    })
}

pub fn outcome_document(outcome: &LaunchOutcome) -> Value {
    match outcome {
        LaunchOutcome::InvalidTarget => failure("Invalid target provided, scan not started".to_string()),
        LaunchOutcome::ScriptNotFound { checked } => json!({
            "success": false,
            "message": "Scanner script not found",
            "checked": checked.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        }),
        LaunchOutcome::Exited { code, lines, .. } => json!({
            "success": outcome.is_success(),
            "message": "Scanner finished",
            "exitCode": code,
            "outputLines": lines,
        }),
        LaunchOutcome::Failed(reason) => failure(format!("Failed to launch scan: {reason}")),
    }
}

fn failure(message: String) -> Value {
    json!({ "success": false, "message": message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NvdSettings;

    fn test_app(dir: &std::path::Path) -> App {
        let mut settings = Settings::default();
        settings.store.path = Some(dir.join("scans.json"));
        settings.nvd = NvdSettings {
            api_url: "http://127.0.0.1:9/cves".to_string(),
            rate_limit_delay_ms: 0,
            timeout_secs: 2,
            ..NvdSettings::default()
        };
        App::new(&settings).unwrap()
    }

    #[tokio::test]
    async fn ingest_list_show_delete() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());

        let raw = r#"{
            "target": "example.com",
            "timestamp": "2024-05-01T10:00:00",
            "nmap": [{"port": 443, "protocol": "tcp", "service": "https", "state": "open"}],
            "nikto": [{"osvdb_id": "0", "method": "GET", "uri": "/", "description": "Server leaks inodes"}]
        }"#;
        let ack = app.ingest_report(raw, Some(1)).await;
        assert_eq!(ack["success"], true);
        let id = ack["scanId"].as_u64().unwrap();

        let page = app.list(0, 10).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].web_vulnerabilities, 1);

        let scan = app.show(id).unwrap().unwrap();
        assert_eq!(scan.target, "example.com");
        assert_eq!(scan.user_id, Some(1));

        assert!(app.delete(id).unwrap());
        assert!(app.show(id).unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_report_is_acknowledged_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());
        let ack = app.ingest_report("{\"timestamp\": 5}", None).await;
        assert_eq!(ack["success"], false);
        assert!(ack["message"].as_str().unwrap().starts_with("Failed to process scan results"));
    }

    #[test]
    fn outcome_documents_reflect_exit_status() {
        let ok = LaunchOutcome::Exited { code: Some(0), lines: 12, tail: Vec::new() };
        assert_eq!(outcome_document(&ok)["success"], true);
        assert_eq!(outcome_document(&ok)["outputLines"], 12);

        let failed = LaunchOutcome::Exited { code: Some(2), lines: 0, tail: Vec::new() };
        assert_eq!(outcome_document(&failed)["success"], false);
        assert_eq!(outcome_document(&LaunchOutcome::InvalidTarget)["success"], false);
        assert_eq!(
            launch_acknowledgement("10.0.0.5")["message"],
            "Scan launched successfully against 10.0.0.5"
        );
    }
}
