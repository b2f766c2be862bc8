// src/core/ingest.rs

use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::core::correlator::CveLookup;
use crate::core::models::{
    InjectionFinding, PortFinding, Scan, ScanReport, ScanStatus, WebFinding, parse_timestamp,
};
use crate::core::store::{ScanStore, StoreError};

/// Product name used when neither the version text nor the service name helps.
pub const UNKNOWN_PRODUCT: &str = "unknown";

static RE_DOTTED_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(\.\d+)*$").unwrap());

/// Turns scanner reports into persisted, CVE-enriched scans.
pub struct IngestionPipeline<S, C> {
    store: S,
    correlator: C,
}

impl<S: ScanStore, C: CveLookup> IngestionPipeline<S, C> {
    pub fn new(store: S, correlator: C) -> Self {
        Self { store, correlator }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persists `report` and correlates its versioned port findings.
    ///
    /// Only storage failures are returned. Correlation is best-effort: a
    /// finding with no results never stops the scan from being saved.
    pub async fn ingest(&self, report: ScanReport, user_id: Option<u64>) -> Result<Scan, StoreError> {
        info!(target = %report.target, "Ingesting scan report.");

        let mut scan = build_scan(report);
        scan.user_id = user_id;

        // The first save hands out the ids the vulnerability records point at.
        let mut scan = self.store.save(scan)?;
        let scan_id = scan.id;

        let mut records = Vec::new();
        for finding in scan.port_findings.iter().filter(|f| f.has_version()) {
            let version_text = finding.version.as_deref().unwrap_or_default();
            let product = extract_product_name(finding.service.as_deref(), version_text);
            let version = extract_version_number(version_text);
            debug!(port = finding.port, %product, %version, "Correlating port finding.");

            let found = self.correlator.search(&product, &version).await;
            if found.is_empty() {
                debug!(port = finding.port, "No vulnerabilities for this finding.");
            }
            records.extend(found.into_iter().map(|mut record| {
                record.port_finding_id = finding.id;
                record
            }));
        }

        if records.is_empty() {
            info!(scan_id = ?scan_id, "Scan ingested without CVE matches.");
            return Ok(scan);
        }

        info!(scan_id = ?scan_id, cves = %records.len(), "Attaching CVE matches to scan.");
        scan.vulnerabilities.extend(records);
        self.store.save(scan)
    }
}

/// Maps a report into an unsaved, completed scan.
fn build_scan(report: ScanReport) -> Scan {
    let timestamp = parse_timestamp(&report.timestamp)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or_else(|| {
            warn!(timestamp = %report.timestamp, "Unparseable report timestamp, using current time.");
            Utc::now()
        });

    let mut scan = Scan::new(&report.target, timestamp, ScanStatus::Completed);

    scan.port_findings = report
        .nmap
        .unwrap_or_default()
        .into_iter()
        .map(|entry| PortFinding {
            id: None,
            port: entry.port,
            protocol: entry.protocol,
            service: entry.service,
            version: entry.version,
            state: entry.state,
        })
        .collect();

    scan.injection_findings = report
        .sqlmap
        .unwrap_or_default()
        .into_iter()
        .map(|entry| InjectionFinding {
            id: None,
            vulnerability_type: entry.vulnerability_type,
            payload: entry.payload,
            parameter: entry.parameter,
            description: entry.description,
        })
        .collect();

    scan.web_findings = report
        .nikto
        .unwrap_or_default()
        .into_iter()
        .map(|entry| WebFinding {
            id: None,
            osvdb_id: entry.osvdb_id,
            method: entry.method,
            uri: entry.uri,
            description: entry.description,
        })
        .collect();

    scan
}

/// Picks the product name for a CVE search.
///
/// Version text usually reads "Product 1.2.3"; a leading token that does not
/// start with a digit is taken as the product. Otherwise the service name is
/// used, or `"unknown"`.
pub fn extract_product_name(service: Option<&str>, version: &str) -> String {
    let fallback = || {
        service
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_PRODUCT)
            .to_string()
    };

    match version.split_whitespace().next() {
        Some(first) if !first.starts_with(|c: char| c.is_ascii_digit()) => first.to_string(),
        _ => fallback(),
    }
}

/// Finds the first dotted-numeric token ("2.4.52") in the version text, or
/// returns the whole trimmed text.
pub fn extract_version_number(version: &str) -> String {
    version
        .split_whitespace()
        .find(|token| RE_DOTTED_VERSION.is_match(token))
        .unwrap_or_else(|| version.trim())
        .to_string()
}
