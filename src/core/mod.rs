// src/core/mod.rs

/// Scan aggregate, findings, vulnerability records and the inbound report format.
pub mod models;

/// Target normalization, URL building and DNS resolution.
pub mod target;

/// Detached launch and supervision of the external scanner process.
pub mod launcher;

/// Throttled CVE lookups against the vulnerability database.
pub mod correlator;

/// Report ingestion: persist findings, then enrich them with CVE data.
pub mod ingest;

/// Persistence boundary for scans.
pub mod store;
