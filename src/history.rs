//! # Identity History Store
//!
//! ## Purpose
//! Persistent record of which identity keys have already been processed,
//! backed by an embedded database so the "already seen" guarantee survives
//! process restarts. This is the system's primary cost-control mechanism:
//! a key recorded within the retention window is never re-analyzed.
//!
//! ## Concurrency
//! The store is single-writer per run; the orchestrator's run guard ensures
//! that writes never race across runs. Within a run, writes for distinct
//! keys may happen concurrently (the tree serializes same-key updates).

use crate::errors::{DigestError, Result};
use crate::identity::IdentityKey;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Terminal disposition of a processed record, kept with each sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Filter stage decided the record matches no keyword
    Rejected,
    /// Analysis exhausted its retries; eligible for a retry on a later run
    Failed,
    /// Record appeared in a published report
    Reported,
}

/// One history entry per identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub key: String,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
    pub status: RecordStatus,
    /// Title at last sighting, kept for diagnostics
    pub title: String,
}

impl HistoryEntry {
    /// Whether this sighting still falls inside the retention window
    /// relative to `today`.
    pub fn within_window(&self, today: NaiveDate, retention_days: u32) -> bool {
        let age = today.signed_duration_since(self.last_seen).num_days();
        age >= 0 && age < i64::from(retention_days)
    }
}

/// Persistent deduplication store.
pub struct HistoryStore {
    tree: sled::Tree,
}

impl HistoryStore {
    /// Open the history tree inside an already-opened database.
    pub fn new(db: &sled::Db) -> Result<Self> {
        let tree = db.open_tree("identity_history").map_err(|e| {
            DigestError::StoreUnavailable {
                db_path: "identity_history".to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { tree })
    }

    /// Look up the last recorded sighting of a key.
    pub fn status(&self, key: &IdentityKey) -> Result<Option<HistoryEntry>> {
        let value = self.tree.get(key.as_str().as_bytes()).map_err(|e| {
            DigestError::Store {
                operation: "history read".to_string(),
                details: e.to_string(),
            }
        })?;

        match value {
            Some(bytes) => {
                let entry: HistoryEntry = bincode::deserialize(&bytes)?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Record a sighting. Appends on first sighting, updates `last_seen`
    /// and `status` on re-sighting while preserving `first_seen`.
    pub fn record(
        &self,
        key: &IdentityKey,
        date: NaiveDate,
        status: RecordStatus,
        title: &str,
    ) -> Result<()> {
        let first_seen = match self.status(key)? {
            Some(existing) => existing.first_seen,
            None => date,
        };

        let entry = HistoryEntry {
            key: key.as_str().to_string(),
            first_seen,
            last_seen: date,
            status,
            title: title.to_string(),
        };

        let bytes = bincode::serialize(&entry)?;
        self.tree
            .insert(key.as_str().as_bytes(), bytes)
            .map_err(|e| DigestError::Store {
                operation: "history write".to_string(),
                details: e.to_string(),
            })?;

        tracing::debug!(key = %key, status = ?status, "Recorded identity sighting");
        Ok(())
    }

    /// Remove every entry last seen strictly before `cutoff`. Returns the
    /// number of pruned entries. Bounds storage over long deployments.
    pub fn prune(&self, cutoff: NaiveDate) -> Result<usize> {
        let mut stale = Vec::new();

        for item in self.tree.iter() {
            let (key, value) = item.map_err(|e| DigestError::Store {
                operation: "history scan".to_string(),
                details: e.to_string(),
            })?;
            let entry: HistoryEntry = match bincode::deserialize(&value) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Dropping undecodable history entry: {}", e);
                    stale.push(key.to_vec());
                    continue;
                }
            };
            if entry.last_seen < cutoff {
                stale.push(key.to_vec());
            }
        }

        let pruned = stale.len();
        for key in stale {
            self.tree.remove(key).map_err(|e| DigestError::Store {
                operation: "history prune".to_string(),
                details: e.to_string(),
            })?;
        }

        if pruned > 0 {
            tracing::info!(pruned, cutoff = %cutoff, "Pruned history entries");
        }
        Ok(pruned)
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Verify the tree accepts reads and writes.
    pub fn health_check(&self) -> Result<()> {
        let probe_key = b"__health_probe__";
        self.tree
            .insert(probe_key, b"ok".to_vec())
            .and_then(|_| self.tree.get(probe_key))
            .and_then(|_| self.tree.remove(probe_key))
            .map_err(|e| DigestError::Store {
                operation: "health check".to_string(),
                details: e.to_string(),
            })?;
        Ok(())
    }

    /// Flush pending writes to disk.
    pub async fn flush(&self) -> Result<()> {
        self.tree
            .flush_async()
            .await
            .map_err(|e| DigestError::Store {
                operation: "history flush".to_string(),
                details: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn open_store(dir: &std::path::Path) -> (sled::Db, HistoryStore) {
        let db = sled::open(dir).unwrap();
        let store = HistoryStore::new(&db).unwrap();
        (db, store)
    }

    #[test]
    fn test_record_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, store) = open_store(dir.path());
        let key = IdentityKey::from_canonical("doi:10.1/abc");

        assert!(store.status(&key).unwrap().is_none());

        store
            .record(&key, date("2025-03-01"), RecordStatus::Reported, "A Paper")
            .unwrap();

        let entry = store.status(&key).unwrap().unwrap();
        assert_eq!(entry.status, RecordStatus::Reported);
        assert_eq!(entry.first_seen, date("2025-03-01"));
        assert_eq!(entry.last_seen, date("2025-03-01"));
    }

    #[test]
    fn test_resighting_preserves_first_seen() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, store) = open_store(dir.path());
        let key = IdentityKey::from_canonical("id:2403.12345");

        store
            .record(&key, date("2025-03-01"), RecordStatus::Failed, "T")
            .unwrap();
        store
            .record(&key, date("2025-03-04"), RecordStatus::Reported, "T")
            .unwrap();

        let entry = store.status(&key).unwrap().unwrap();
        assert_eq!(entry.first_seen, date("2025-03-01"));
        assert_eq!(entry.last_seen, date("2025-03-04"));
        assert_eq!(entry.status, RecordStatus::Reported);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = IdentityKey::from_canonical("doi:10.1/persist");
        {
            let (db, store) = open_store(dir.path());
            store
                .record(&key, date("2025-03-01"), RecordStatus::Reported, "T")
                .unwrap();
            db.flush().unwrap();
        }
        let (_db, store) = open_store(dir.path());
        assert!(store.status(&key).unwrap().is_some());
    }

    #[test]
    fn test_prune_respects_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, store) = open_store(dir.path());

        let old = IdentityKey::from_canonical("id:old");
        let fresh = IdentityKey::from_canonical("id:fresh");
        store
            .record(&old, date("2025-01-01"), RecordStatus::Rejected, "old")
            .unwrap();
        store
            .record(&fresh, date("2025-03-01"), RecordStatus::Reported, "fresh")
            .unwrap();

        let pruned = store.prune(date("2025-02-01")).unwrap();
        assert_eq!(pruned, 1);
        assert!(store.status(&old).unwrap().is_none());
        assert!(store.status(&fresh).unwrap().is_some());
    }

    #[test]
    fn test_within_window() {
        let entry = HistoryEntry {
            key: "id:x".to_string(),
            first_seen: date("2025-03-01"),
            last_seen: date("2025-03-01"),
            status: RecordStatus::Reported,
            title: String::new(),
        };
        assert!(entry.within_window(date("2025-03-10"), 30));
        assert!(!entry.within_window(date("2025-04-15"), 30));
    }
}
