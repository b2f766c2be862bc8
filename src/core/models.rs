// src/core/models.rs

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// --- Reusable Result Types ---

/// Outcome of a best-effort operation against an external system.
///
/// `Ok(Some(value))` carries data, `Ok(None)` means the call succeeded but
/// produced nothing, and `Err(reason)` describes why it failed.
pub type ScanResult<T> = Result<Option<T>, String>;

// --- Enumerations ---

/// Lifecycle of a scan record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// State reported by the port scanner for a single port.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    // Anything the scanner emits that we do not model.
    #[default]
    #[serde(other)]
    Unknown,
}

// --- Persisted Entities ---

// A single port/service observation. Only this finding kind feeds CVE correlation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortFinding {
    pub id: Option<u64>,
    pub port: u16,
    pub protocol: String,
    pub service: Option<String>,
    pub version: Option<String>,
    pub state: PortState,
}

impl PortFinding {
    /// True when the finding carries version text worth correlating.
    pub fn has_version(&self) -> bool {
        self.version.as_deref().is_some_and(|v| !v.trim().is_empty())
    }
}

// An injection vector reported by the SQL-injection scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InjectionFinding {
    pub id: Option<u64>,
    pub vulnerability_type: String,
    pub payload: String,
    pub parameter: String,
    pub description: String,
}

// A web-layer issue reported by the web vulnerability scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebFinding {
    pub id: Option<u64>,
    pub osvdb_id: String,
    pub method: String,
    pub uri: String,
    pub description: String,
}

/// A known vulnerability correlated from the vulnerability database.
///
/// `port_finding_id` links back to the port finding whose version produced
/// the match. It is optional so a record survives the link being removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VulnerabilityRecord {
    pub id: Option<u64>,
    pub cve_id: String,
    pub description: Option<String>,
    pub cvss_score: Option<f64>,
    pub severity: Option<String>,
    pub published: Option<NaiveDateTime>,
    pub last_modified: Option<NaiveDateTime>,
    pub references: String,
    pub port_finding_id: Option<u64>,
}

/// The aggregate root: one scan together with every finding it owns.
///
/// Findings and records are held by value, so removing a `Scan` from a store
/// removes everything it owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scan {
    pub id: Option<u64>,
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub status: ScanStatus,
    pub created_at: DateTime<Utc>,
    pub user_id: Option<u64>,
    #[serde(default)]
    pub port_findings: Vec<PortFinding>,
    #[serde(default)]
    pub injection_findings: Vec<InjectionFinding>,
    #[serde(default)]
    pub web_findings: Vec<WebFinding>,
    #[serde(default)]
    pub vulnerabilities: Vec<VulnerabilityRecord>,
}

impl Scan {
    pub fn new(target: &str, timestamp: DateTime<Utc>, status: ScanStatus) -> Self {
        Self {
            id: None,
            target: target.to_string(),
            timestamp,
            status,
            created_at: Utc::now(),
            user_id: None,
            port_findings: Vec::new(),
            injection_findings: Vec::new(),
            web_findings: Vec::new(),
            vulnerabilities: Vec::new(),
        }
    }

    pub fn summary(&self) -> ScanSummary {
        ScanSummary {
            id: self.id,
            target: self.target.clone(),
            timestamp: self.timestamp,
            status: self.status,
            created_at: self.created_at,
            total_open_ports: self.port_findings.len(),
            sql_vulnerabilities: self.injection_findings.len(),
            web_vulnerabilities: self.web_findings.len(),
            total_cves: self.vulnerabilities.len(),
        }
    }
}

// Lightweight listing view of a scan: metadata plus per-kind counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanSummary {
    pub id: Option<u64>,
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub status: ScanStatus,
    pub created_at: DateTime<Utc>,
    pub total_open_ports: usize,
    pub sql_vulnerabilities: usize,
    pub web_vulnerabilities: usize,
    pub total_cves: usize,
}

// --- Inbound Report ---
// The document the external scanner produces once all of its tools have run.

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanReport {
    pub target: String,
    #[serde(default)]
    pub timestamp: String,
    pub nmap: Option<Vec<PortEntry>>,
    pub sqlmap: Option<Vec<InjectionEntry>>,
    pub nikto: Option<Vec<WebEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PortEntry {
    pub port: u16,
    #[serde(default)]
    pub protocol: String,
    pub service: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub state: PortState,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InjectionEntry {
    pub vulnerability_type: String,
    pub payload: String,
    pub parameter: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WebEntry {
    pub osvdb_id: String,
    pub method: String,
    pub uri: String,
    pub description: String,
}

/// Parses an ISO-8601 date-time, with or without a UTC offset.
///
/// Offset-carrying values are converted to UTC before the offset is dropped.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M%:z"))
    {
        return Some(with_offset.naive_utc());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_timestamps_with_and_without_offset() {
        let naive = parse_timestamp("2021-10-05T15:15:07.947").unwrap();
        assert_eq!(naive.to_string(), "2021-10-05 15:15:07.947");

        let shifted = parse_timestamp("2024-01-01T12:00:00+02:00").unwrap();
        assert_eq!(shifted.to_string(), "2024-01-01 10:00:00");

        assert!(parse_timestamp("2024-01-01T12:00").is_some());

        let minutes_only = parse_timestamp("2024-01-01T12:00+02:00").unwrap();
        assert_eq!(minutes_only.to_string(), "2024-01-01 10:00:00");
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("   ").is_none());
    }

    #[test]
    fn port_state_accepts_unknown_values() {
        let entry: PortEntry =
            serde_json::from_str(r#"{"port": 22, "protocol": "tcp", "state": "open|filtered"}"#).unwrap();
        assert_eq!(entry.state, PortState::Unknown);

        let entry: PortEntry = serde_json::from_str(r#"{"port": 22, "state": "filtered"}"#).unwrap();
        assert_eq!(entry.state, PortState::Filtered);
        assert_eq!(PortState::from_str("OPEN").unwrap(), PortState::Open);
    }

    #[test]
    fn status_round_trips_as_uppercase() {
        assert_eq!(ScanStatus::Completed.to_string(), "COMPLETED");
        assert_eq!(ScanStatus::from_str("running").unwrap(), ScanStatus::Running);
        let json = serde_json::to_string(&ScanStatus::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
    }

    #[test]
    fn has_version_ignores_blank_text() {
        let mut finding = PortFinding {
            id: None,
            port: 80,
            protocol: "tcp".into(),
            service: Some("http".into()),
            version: Some("   ".into()),
            state: PortState::Open,
        };
        assert!(!finding.has_version());
        finding.version = None;
        assert!(!finding.has_version());
        finding.version = Some("nginx 1.18.0".into());
        assert!(finding.has_version());
    }
}
