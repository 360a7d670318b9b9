//! # Feed Sources Module
//!
//! ## Purpose
//! Defines the narrow interface through which the pipeline consumes candidate
//! documents. Sources produce an order-irrelevant set of raw records; a
//! source that fails does so in isolation without affecting sibling sources.
//!
//! ## Architecture
//! - `FeedSource` trait: common interface for all record producers
//! - `rss.rs`: RSS/Atom implementation covering preprint servers and journals

pub mod rss;

pub use rss::RssFeedSource;

use crate::errors::{DigestError, Result};
use crate::{RawRecord, SourceKind};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

/// A producer of candidate records.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Display name of this source
    fn name(&self) -> &str;

    /// Source type of records this feed produces
    fn kind(&self) -> SourceKind;

    /// Fetch records published on or after `cutoff`.
    async fn fetch(&self, cutoff: NaiveDate) -> Result<Vec<RawRecord>>;
}

/// Fetch from every source, isolating per-source failures. Returns the
/// combined record set plus the errors of sources that failed.
pub async fn fetch_all(
    sources: &[Arc<dyn FeedSource>],
    cutoff: NaiveDate,
) -> (Vec<RawRecord>, Vec<DigestError>) {
    let mut records = Vec::new();
    let mut failures = Vec::new();

    let results = futures::future::join_all(
        sources
            .iter()
            .map(|source| async move { (source.name().to_string(), source.fetch(cutoff).await) }),
    )
    .await;

    for (name, result) in results {
        match result {
            Ok(batch) => {
                tracing::info!(source = %name, records = batch.len(), "Fetched records");
                records.extend(batch);
            }
            Err(e) => {
                tracing::error!(source = %name, error = %e, "Feed fetch failed");
                failures.push(DigestError::Feed {
                    source_name: name,
                    details: e.to_string(),
                });
            }
        }
    }

    (records, failures)
}
