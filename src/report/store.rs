//! # Report Store
//!
//! ## Purpose
//! Persists one report per run date in an embedded database tree, queryable
//! by date with "most recent" as the default. Reports are immutable after a
//! run completes; saving under an existing date replaces the whole report.

use crate::errors::{DigestError, Result};
use crate::report::Report;

/// Value layout: one flag byte (1 = gzip-compressed) followed by the
/// bincode-encoded report.
const FLAG_PLAIN: u8 = 0;
const FLAG_COMPRESSED: u8 = 1;

/// Persistent, date-keyed report storage.
pub struct ReportStore {
    tree: sled::Tree,
    compress: bool,
}

impl ReportStore {
    /// Open the reports tree inside an already-opened database.
    pub fn new(db: &sled::Db, compress: bool) -> Result<Self> {
        let tree = db
            .open_tree("reports")
            .map_err(|e| DigestError::StoreUnavailable {
                db_path: "reports".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { tree, compress })
    }

    /// Persist a report under its run date.
    pub fn save(&self, report: &Report) -> Result<()> {
        let encoded = bincode::serialize(report)?;

        let value = if self.compress {
            use std::io::Write;
            let mut encoder =
                flate2::write::GzEncoder::new(vec![FLAG_COMPRESSED], flate2::Compression::default());
            encoder.write_all(&encoded).map_err(|e| DigestError::SerializationFailed {
                data_type: "report".to_string(),
                reason: format!("compression failed: {}", e),
            })?;
            encoder.finish().map_err(|e| DigestError::SerializationFailed {
                data_type: "report".to_string(),
                reason: format!("compression finish failed: {}", e),
            })?
        } else {
            let mut value = Vec::with_capacity(encoded.len() + 1);
            value.push(FLAG_PLAIN);
            value.extend_from_slice(&encoded);
            value
        };

        self.tree
            .insert(report.date.as_bytes(), value)
            .map_err(|e| DigestError::Store {
                operation: "report write".to_string(),
                details: e.to_string(),
            })?;

        tracing::info!(date = %report.date, "Report persisted");
        Ok(())
    }

    /// Fetch the report for a specific date.
    pub fn get(&self, date: &str) -> Result<Option<Report>> {
        let value = self
            .tree
            .get(date.as_bytes())
            .map_err(|e| DigestError::Store {
                operation: "report read".to_string(),
                details: e.to_string(),
            })?;

        match value {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch the most recent report, if any. Date keys are ISO-formatted,
    /// so lexicographic tree order is chronological.
    pub fn latest(&self) -> Result<Option<Report>> {
        let last = self.tree.last().map_err(|e| DigestError::Store {
            operation: "report scan".to_string(),
            details: e.to_string(),
        })?;

        match last {
            Some((_, bytes)) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All report dates, most recent first.
    pub fn list_dates(&self) -> Result<Vec<String>> {
        let mut dates = Vec::new();
        for item in self.tree.iter() {
            let (key, _) = item.map_err(|e| DigestError::Store {
                operation: "report scan".to_string(),
                details: e.to_string(),
            })?;
            let date = String::from_utf8(key.to_vec()).map_err(|e| DigestError::Store {
                operation: "report scan".to_string(),
                details: format!("non-UTF8 report key: {}", e),
            })?;
            dates.push(date);
        }
        dates.reverse();
        Ok(dates)
    }

    /// Number of persisted reports.
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
                operation: "report flush".to_string(),
                details: e.to_string(),
            })?;
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> Result<Report> {
    let (flag, body) = bytes.split_first().ok_or_else(|| DigestError::Store {
        operation: "report decode".to_string(),
        details: "empty report value".to_string(),
    })?;

    let report = if *flag == FLAG_COMPRESSED {
        use std::io::Read;
        let mut decoder = flate2::read::GzDecoder::new(body);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| DigestError::SerializationFailed {
                data_type: "report".to_string(),
                reason: format!("decompression failed: {}", e),
            })?;
        bincode::deserialize(&decompressed)?
    } else {
        bincode::deserialize(body)?
    };
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_report(date: &str) -> Report {
        Report {
            date: date.to_string(),
            total_papers: 10,
            matched_papers: 5,
            analyzed_papers: 4,
            keywords: vec!["A".to_string()],
            summaries: BTreeMap::from([("A".to_string(), "summary".to_string())]),
            papers_by_keyword: BTreeMap::from([("A".to_string(), Vec::new())]),
        }
    }

    fn open(compress: bool) -> (tempfile::TempDir, sled::Db, ReportStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let store = ReportStore::new(&db, compress).unwrap();
        (dir, db, store)
    }

    #[test]
    fn test_save_and_get_roundtrip() {
        for compress in [false, true] {
            let (_dir, _db, store) = open(compress);
            let report = sample_report("2025-03-03");
            store.save(&report).unwrap();
            assert_eq!(store.get("2025-03-03").unwrap().unwrap(), report);
            assert!(store.get("2025-03-04").unwrap().is_none());
        }
    }

    #[test]
    fn test_latest_and_date_listing() {
        let (_dir, _db, store) = open(true);
        store.save(&sample_report("2025-03-01")).unwrap();
        store.save(&sample_report("2025-03-03")).unwrap();
        store.save(&sample_report("2025-03-02")).unwrap();

        assert_eq!(store.latest().unwrap().unwrap().date, "2025-03-03");
        assert_eq!(
            store.list_dates().unwrap(),
            vec!["2025-03-03", "2025-03-02", "2025-03-01"]
        );
    }

    #[test]
    fn test_saving_same_date_replaces() {
        let (_dir, _db, store) = open(false);
        let mut report = sample_report("2025-03-03");
        store.save(&report).unwrap();
        report.total_papers = 99;
        store.save(&report).unwrap();

        assert_eq!(store.get("2025-03-03").unwrap().unwrap().total_papers, 99);
        assert_eq!(store.len(), 1);
    }
}
