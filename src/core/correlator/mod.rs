// src/core/correlator/mod.rs

// Correlation of service versions against the NVD CVE database.
pub mod nvd;
pub mod throttle;

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::NvdSettings;
use crate::core::models::{ScanResult, VulnerabilityRecord};
use self::throttle::RequestThrottle;

/// Anything that can turn a product/version pair into known vulnerabilities.
///
/// Implementations never fail: problems are logged and surface as an empty list.
pub trait CveLookup {
    fn search(
        &self,
        product: &str,
        version: &str,
    ) -> impl Future<Output = Vec<VulnerabilityRecord>> + Send;
}

/// Keyword-search client for the NVD CVE API, throttled to the API's
/// tolerated request rate.
#[derive(Debug)]
pub struct NvdClient {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    results_per_page: u32,
    throttle: RequestThrottle,
}

impl NvdClient {
    pub fn new(settings: &NvdSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self::with_client(client, settings))
    }

    /// Uses an already configured HTTP client.
    pub fn with_client(client: reqwest::Client, settings: &NvdSettings) -> Self {
        Self {
            client,
            api_url: settings.api_url.clone(),
            api_key: settings.api_key.clone().filter(|k| !k.trim().is_empty()),
            results_per_page: settings.results_per_page,
            throttle: RequestThrottle::new(Duration::from_millis(settings.rate_limit_delay_ms)),
        }
    }

    /// Throttled lookup with the outcome kept explicit.
    pub async fn lookup(&self, product: &str, version: &str) -> ScanResult<Vec<VulnerabilityRecord>> {
        let keyword = build_keyword(product, version);
        self.throttle.run(|| self.fetch(&keyword)).await
    }

    async fn fetch(&self, keyword: &str) -> ScanResult<Vec<VulnerabilityRecord>> {
        info!(keyword, "Searching CVEs.");

        let mut request = self.client.get(&self.api_url).query(&[
            ("keywordSearch", keyword.to_string()),
            ("resultsPerPage", self.results_per_page.to_string()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header("apiKey", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!(keyword, "NVD request timed out.");
            }
            format!("NVD request failed: {e}")
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("NVD API returned status {status}"));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| format!("Failed to read NVD response body: {e}"))?;
        debug!(bytes = %body.len(), "Received NVD response.");

        nvd::parse_response(&body)
    }
}

impl CveLookup for NvdClient {
    async fn search(&self, product: &str, version: &str) -> Vec<VulnerabilityRecord> {
        if product.trim().is_empty() {
            debug!("Empty product name, skipping CVE search.");
            return Vec::new();
        }

        match self.lookup(product, version).await {
            Ok(Some(records)) => {
                info!(product, version, count = %records.len(), "Found CVEs.");
                records
            }
            Ok(None) => {
                info!(product, version, "No CVEs found.");
                Vec::new()
            }
            Err(reason) => {
                error!(product, version, error = %reason, "Error searching CVEs.");
                Vec::new()
            }
        }
    }
}

/// Joins the trimmed product and version into a search keyword.
pub fn build_keyword(product: &str, version: &str) -> String {
    let product = product.trim();
    let version = version.trim();
    if version.is_empty() {
        product.to_string()
    } else {
        format!("{product} {version}")
    }
}
