// src/core/store.rs

//! Persistence boundary for scans.
//!
//! A `Scan` is stored as one aggregate together with every finding and
//! vulnerability record it owns. Identities are handed out on save.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::models::{Scan, ScanSummary};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// One page of results plus the total number of items available.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total: usize,
}

pub trait ScanStore: Send + Sync {
    /// Inserts or replaces `scan`, assigning ids to it and to anything it
    /// owns that does not have one yet.
    fn save(&self, scan: Scan) -> Result<Scan, StoreError>;

    fn find(&self, id: u64) -> Result<Option<Scan>, StoreError>;

    /// Scans ordered newest first by creation time.
    fn list(&self, page: usize, size: usize) -> Result<Page<ScanSummary>, StoreError>;

    /// Removes a scan and everything it owns. Returns whether it existed.
    fn delete(&self, id: u64) -> Result<bool, StoreError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Ledger {
    next_id: u64,
    scans: BTreeMap<u64, Scan>,
}

impl Ledger {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn assign_ids(&mut self, scan: &mut Scan) {
        if scan.id.is_none() {
            scan.id = Some(self.next());
        }
        for finding in scan.port_findings.iter_mut().filter(|f| f.id.is_none()) {
            finding.id = Some(self.next());
        }
        for finding in scan.injection_findings.iter_mut().filter(|f| f.id.is_none()) {
            finding.id = Some(self.next());
        }
        for finding in scan.web_findings.iter_mut().filter(|f| f.id.is_none()) {
            finding.id = Some(self.next());
        }
        for record in scan.vulnerabilities.iter_mut().filter(|r| r.id.is_none()) {
            record.id = Some(self.next());
        }
    }

    fn save(&mut self, mut scan: Scan) -> Scan {
        self.assign_ids(&mut scan);
        if let Some(id) = scan.id {
            // Ids supplied by the caller must not be handed out again later.
            self.next_id = self.next_id.max(id);
            self.scans.insert(id, scan.clone());
        }
        scan
    }

    fn list(&self, page: usize, size: usize) -> Page<ScanSummary> {
        let mut scans: Vec<&Scan> = self.scans.values().collect();
        scans.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = scans.len();
        let start = page.saturating_mul(size).min(total);
        let end = start.saturating_add(size).min(total);

        Page {
            items: scans[start..end].iter().map(|s| s.summary()).collect(),
            page,
            size,
            total,
        }
    }
}

/// Process-local store, used in tests and for one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ledger: Mutex<Ledger>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self) -> Result<MutexGuard<'_, Ledger>, StoreError> {
        self.ledger.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl ScanStore for MemoryStore {
    fn save(&self, scan: Scan) -> Result<Scan, StoreError> {
        Ok(self.ledger()?.save(scan))
    }

    fn find(&self, id: u64) -> Result<Option<Scan>, StoreError> {
        Ok(self.ledger()?.scans.get(&id).cloned())
    }

    fn list(&self, page: usize, size: usize) -> Result<Page<ScanSummary>, StoreError> {
        Ok(self.ledger()?.list(page, size))
    }

    fn delete(&self, id: u64) -> Result<bool, StoreError> {
        Ok(self.ledger()?.scans.remove(&id).is_some())
    }
}

/// Store backed by a single JSON document, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    ledger: Mutex<Ledger>,
}

impl JsonFileStore {
    /// Opens `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let ledger = if path.exists() {
            let raw = std::fs::read(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            let ledger: Ledger = serde_json::from_slice(&raw)?;
            info!(path = %path.display(), scans = %ledger.scans.len(), "Opened scan store.");
            ledger
        } else {
            debug!(path = %path.display(), "Scan store does not exist yet, starting empty.");
            Ledger::default()
        };

        Ok(Self {
            path,
            ledger: Mutex::new(ledger),
        })
    }

    fn ledger(&self) -> Result<MutexGuard<'_, Ledger>, StoreError> {
        self.ledger.lock().map_err(|_| StoreError::Poisoned)
    }

    // Write to a sibling file first so a crash never leaves a truncated store.
    fn flush(&self, ledger: &Ledger) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(ledger)?).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl ScanStore for JsonFileStore {
    // Changes are staged on a copy; the live ledger only moves once the file agrees.
    fn save(&self, scan: Scan) -> Result<Scan, StoreError> {
        let mut ledger = self.ledger()?;
        let mut staged = ledger.clone();
        let saved = staged.save(scan);
        self.flush(&staged)?;
        *ledger = staged;
        Ok(saved)
    }

    fn find(&self, id: u64) -> Result<Option<Scan>, StoreError> {
        Ok(self.ledger()?.scans.get(&id).cloned())
    }

    fn list(&self, page: usize, size: usize) -> Result<Page<ScanSummary>, StoreError> {
        Ok(self.ledger()?.list(page, size))
    }

    fn delete(&self, id: u64) -> Result<bool, StoreError> {
        let mut ledger = self.ledger()?;
        if !ledger.scans.contains_key(&id) {
            return Ok(false);
        }
        let mut staged = ledger.clone();
        staged.scans.remove(&id);
        self.flush(&staged)?;
        *ledger = staged;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{PortFinding, PortState, ScanStatus, VulnerabilityRecord};
    use chrono::{Duration, Utc};

    fn scan_with_port(target: &str) -> Scan {
        let mut scan = Scan::new(target, Utc::now(), ScanStatus::Completed);
        scan.port_findings.push(PortFinding {
            id: None,
            port: 22,
            protocol: "tcp".into(),
            service: Some("ssh".into()),
            version: Some("OpenSSH 8.9p1".into()),
            state: PortState::Open,
        });
        scan
    }

    #[test]
    fn save_assigns_ids_to_scan_and_children() {
        let store = MemoryStore::new();
        let saved = store.save(scan_with_port("example.com")).unwrap();
        let scan_id = saved.id.unwrap();
        let port_id = saved.port_findings[0].id.unwrap();
        assert_ne!(scan_id, port_id);

        // Saving again keeps identities stable and only fills new children.
        let mut updated = saved.clone();
        updated.vulnerabilities.push(VulnerabilityRecord {
            id: None,
            cve_id: "CVE-2023-38408".into(),
            description: None,
            cvss_score: Some(9.8),
            severity: Some("CRITICAL".into()),
            published: None,
            last_modified: None,
            references: String::new(),
            port_finding_id: Some(port_id),
        });
        let resaved = store.save(updated).unwrap();
        assert_eq!(resaved.id, Some(scan_id));
        assert_eq!(resaved.port_findings[0].id, Some(port_id));
        assert!(resaved.vulnerabilities[0].id.is_some());
        assert_eq!(store.find(scan_id).unwrap(), Some(resaved));
    }

    #[test]
    fn delete_removes_the_whole_aggregate() {
        let store = MemoryStore::new();
        let id = store.save(scan_with_port("example.com")).unwrap().id.unwrap();
        assert!(store.delete(id).unwrap());
        assert_eq!(store.find(id).unwrap(), None);
        assert!(!store.delete(id).unwrap());
        assert_eq!(store.list(0, 10).unwrap().total, 0);
    }

    #[test]
    fn list_pages_newest_first() {
        let store = MemoryStore::new();
        for (i, target) in ["a.example", "b.example", "c.example"].iter().enumerate() {
            let mut scan = scan_with_port(target);
            scan.created_at = Utc::now() - Duration::minutes(10 - i as i64);
            store.save(scan).unwrap();
        }

        let first = store.list(0, 2).unwrap();
        assert_eq!(first.total, 3);
        let targets: Vec<_> = first.items.iter().map(|s| s.target.as_str()).collect();
        assert_eq!(targets, ["c.example", "b.example"]);
        assert_eq!(first.items[0].total_open_ports, 1);

        let second = store.list(1, 2).unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].target, "a.example");

        assert!(store.list(5, 2).unwrap().items.is_empty());
    }

    #[test]
    fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scans.json");

        let id = {
            let store = JsonFileStore::open(&path).unwrap();
            store.save(scan_with_port("example.com")).unwrap().id.unwrap()
        };

        let reopened = JsonFileStore::open(&path).unwrap();
        let scan = reopened.find(id).unwrap().unwrap();
        assert_eq!(scan.target, "example.com");
        assert_eq!(scan.port_findings.len(), 1);

        // The id counter is restored too, so new scans never collide.
        let next = reopened.save(scan_with_port("other.example")).unwrap();
        assert!(next.id.unwrap() > scan.port_findings[0].id.unwrap());

        assert!(reopened.delete(id).unwrap());
        assert!(JsonFileStore::open(&path).unwrap().find(id).unwrap().is_none());
    }

    #[test]
    fn failed_write_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.json");
        let store = JsonFileStore::open(&path).unwrap();
        let id = store.save(scan_with_port("example.com")).unwrap().id.unwrap();

        // A directory where the temp file goes makes every flush fail.
        let blocker = path.with_extension("json.tmp");
        std::fs::create_dir(&blocker).unwrap();

        assert!(matches!(
            store.save(scan_with_port("other.example")),
            Err(StoreError::Io { .. })
        ));
        assert_eq!(store.list(0, 10).unwrap().total, 1);

        assert!(store.delete(id).is_err());
        assert!(store.find(id).unwrap().is_some());

        std::fs::remove_dir(&blocker).unwrap();
        store.save(scan_with_port("third.example")).unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        let page = reopened.list(0, 10).unwrap();
        assert_eq!(page.total, 2);
        assert!(page.items.iter().all(|s| s.target != "other.example"));
        assert!(reopened.find(id).unwrap().is_some());
    }
}
