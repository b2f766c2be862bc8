// src/core/correlator/nvd.rs

//! Mapping of NVD CVE API 2.0 responses into `VulnerabilityRecord`s.

use serde_json::Value;
use tracing::{debug, warn};

use crate::core::models::{ScanResult, VulnerabilityRecord, parse_timestamp};

/// Metric sets checked for a CVSS score, most preferred first.
const CVSS_METRIC_KEYS: &[&str] = &["cvssMetricV31", "cvssMetricV30"];

/// Parses a raw response body.
///
/// A body that is not a JSON object is a failure. An object without any
/// usable entry is a successful empty result.
pub fn parse_response(body: &[u8]) -> ScanResult<Vec<VulnerabilityRecord>> {
    let root: Value =
        serde_json::from_slice(body).map_err(|e| format!("Failed to parse NVD response: {e}"))?;

    if !root.is_object() {
        return Err("NVD response is not a JSON object".to_string());
    }

    let records: Vec<VulnerabilityRecord> = root
        .get("vulnerabilities")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(parse_entry).collect())
        .unwrap_or_default();

    debug!(count = %records.len(), "Mapped NVD response.");
    if records.is_empty() {
        Ok(None)
    } else {
        Ok(Some(records))
    }
}

/// Maps one `vulnerabilities[]` element. Entries without a CVE id are skipped.
fn parse_entry(entry: &Value) -> Option<VulnerabilityRecord> {
    let cve = entry.get("cve")?;

    let cve_id = cve.get("id").and_then(Value::as_str).unwrap_or_default().trim();
    if cve_id.is_empty() {
        warn!("Skipping NVD entry without a CVE id.");
        return None;
    }

    let description = cve
        .get("descriptions")
        .and_then(Value::as_array)
        .and_then(|d| d.first())
        .and_then(|d| d.get("value"))
        .and_then(Value::as_str)
        .map(String::from);

    let (cvss_score, severity) = extract_cvss(cve);

    Some(VulnerabilityRecord {
        id: None,
        cve_id: cve_id.to_string(),
        description,
        cvss_score,
        severity,
        published: parse_date_field(cve, "published"),
        last_modified: parse_date_field(cve, "lastModified"),
        references: join_references(cve),
        port_finding_id: None,
    })
}

fn extract_cvss(cve: &Value) -> (Option<f64>, Option<String>) {
    let Some(metrics) = cve.get("metrics") else {
        return (None, None);
    };

    CVSS_METRIC_KEYS
        .iter()
        .find_map(|key| {
            metrics
                .get(*key)
                .and_then(Value::as_array)
                .and_then(|set| set.first())
                .and_then(|metric| metric.get("cvssData"))
        })
        .map(|data| {
            (
                data.get("baseScore").and_then(Value::as_f64),
                data.get("baseSeverity").and_then(Value::as_str).map(String::from),
            )
        })
        .unwrap_or((None, None))
}

fn parse_date_field(cve: &Value, field: &str) -> Option<chrono::NaiveDateTime> {
    let raw = cve.get(field).and_then(Value::as_str)?;
    let parsed = parse_timestamp(raw);
    if parsed.is_none() {
        warn!(field, value = raw, "Failed to parse NVD date.");
    }
    parsed
}

fn join_references(cve: &Value) -> String {
    cve.get("references")
        .and_then(Value::as_array)
        .map(|refs| {
            refs.iter()
                .filter_map(|r| r.get("url").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(";")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "resultsPerPage": 2,
        "totalResults": 2,
        "vulnerabilities": [
            {
                "cve": {
                    "id": "CVE-2022-22720",
                    "published": "2022-03-14T11:15:09.517",
                    "lastModified": "2023-11-07T03:44:08.053",
                    "descriptions": [
                        {"lang": "en", "value": "Apache HTTP Server 2.4.52 and earlier fails to close inbound connection."},
                        {"lang": "es", "value": "Apache HTTP Server 2.4.52 y anteriores..."}
                    ],
                    "metrics": {
                        "cvssMetricV31": [{"cvssData": {"baseScore": 9.8, "baseSeverity": "CRITICAL"}}],
                        "cvssMetricV2": [{"cvssData": {"baseScore": 7.5}}]
                    },
                    "references": [
                        {"url": "https://httpd.apache.org/security/vulnerabilities_24.html"},
                        {"url": "http://www.openwall.com/lists/oss-security/2022/03/14/3"}
                    ]
                }
            },
            {
                "cve": {
                    "id": "CVE-2021-44790",
                    "published": "not a date",
                    "descriptions": [],
                    "metrics": {
                        "cvssMetricV30": [{"cvssData": {"baseScore": 9.8, "baseSeverity": "CRITICAL"}}]
                    }
                }
            }
        ]
    }"#;

    #[test]
    fn maps_full_entries() {
        let records = parse_response(SAMPLE.as_bytes()).unwrap().unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.cve_id, "CVE-2022-22720");
        assert!(first.description.as_deref().unwrap().starts_with("Apache HTTP Server 2.4.52"));
        assert_eq!(first.cvss_score, Some(9.8));
        assert_eq!(first.severity.as_deref(), Some("CRITICAL"));
        assert_eq!(first.published.unwrap().to_string(), "2022-03-14 11:15:09.517");
        assert!(first.last_modified.is_some());
        assert_eq!(
            first.references,
            "https://httpd.apache.org/security/vulnerabilities_24.html;http://www.openwall.com/lists/oss-security/2022/03/14/3"
        );
    }

    #[test]
    fn tolerates_missing_pieces_and_falls_back_to_v30() {
        let records = parse_response(SAMPLE.as_bytes()).unwrap().unwrap();
        let second = &records[1];
        assert_eq!(second.cve_id, "CVE-2021-44790");
        assert_eq!(second.description, None);
        assert_eq!(second.cvss_score, Some(9.8));
        assert_eq!(second.published, None);
        assert_eq!(second.last_modified, None);
        assert_eq!(second.references, "");
    }

    #[test]
    fn missing_metrics_leave_score_empty() {
        let body = r#"{"vulnerabilities": [{"cve": {"id": "CVE-2020-0001", "metrics": {}}}]}"#;
        let records = parse_response(body.as_bytes()).unwrap().unwrap();
        assert_eq!(records[0].cvss_score, None);
        assert_eq!(records[0].severity, None);
    }

    #[test]
    fn empty_vulnerability_list_is_empty_not_error() {
        let body = r#"{"resultsPerPage": 0, "totalResults": 0, "vulnerabilities": []}"#;
        assert_eq!(parse_response(body.as_bytes()), Ok(None));
    }

    #[test]
    fn entries_without_id_are_skipped() {
        let body = r#"{"vulnerabilities": [{"cve": {"id": ""}}, {"cve": {}}, {"other": 1}]}"#;
        assert_eq!(parse_response(body.as_bytes()), Ok(None));
    }

    #[test]
    fn malformed_documents_are_failures() {
        assert!(parse_response(b"<html>rate limited</html>").is_err());
        assert!(parse_response(b"[1, 2, 3]").is_err());
    }
}
