//! # Content Access Module
//!
//! ## Purpose
//! Narrow interface for retrieving the full content behind a record's
//! content reference (typically a PDF or full-text URL), used by
//! content-capable analysis backends. Retrieval failures surface through
//! the standard call taxonomy: unreachable-right-now is transient, gone is
//! permanent.

use crate::errors::{DigestError, Result};
use crate::utils::sanitize_filename;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use std::time::Duration;

/// Adapter resolving a content reference into raw bytes.
#[async_trait]
pub trait ContentAccess: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>>;
}

/// HTTP content fetcher with an optional on-disk cache.
///
/// Cached files are keyed by a sanitized form of the reference so repeat
/// runs (and analysis retries) do not re-download the same document.
pub struct HttpContentFetcher {
    client: Client,
    cache_dir: Option<PathBuf>,
    max_bytes: usize,
}

impl HttpContentFetcher {
    pub fn new(timeout: Duration, cache_dir: Option<PathBuf>, max_bytes: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("paper-digest/0.1")
            .build()
            .map_err(|e| DigestError::Config {
                message: format!("Failed to build content HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            cache_dir,
            max_bytes,
        })
    }

    fn cache_path(&self, reference: &str) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        let name = sanitize_filename(reference);
        // Long URLs make unwieldy filenames; keep the tail, it carries the id
        let total = name.chars().count();
        let name: String = if total > 120 {
            name.chars().skip(total - 120).collect()
        } else {
            name
        };
        Some(dir.join(name))
    }
}

#[async_trait]
impl ContentAccess for HttpContentFetcher {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        if let Some(path) = self.cache_path(reference) {
            if let Ok(bytes) = tokio::fs::read(&path).await {
                tracing::debug!(reference, "Serving content from cache");
                return Ok(bytes);
            }
        }

        let response = self.client.get(reference).send().await.map_err(|e| {
            DigestError::ContentUnavailable {
                reference: reference.to_string(),
                details: e.to_string(),
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(DigestError::PermanentCall {
                backend: "content".to_string(),
                details: format!("HTTP {} for {}", status, reference),
            });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DigestError::PermanentCall {
                backend: "content".to_string(),
                details: format!("HTTP {} for {}", status, reference),
            });
        }
        if !status.is_success() {
            return Err(DigestError::ContentUnavailable {
                reference: reference.to_string(),
                details: format!("HTTP {}", status),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DigestError::ContentUnavailable {
                reference: reference.to_string(),
                details: e.to_string(),
            })?;

        if bytes.len() > self.max_bytes {
            tracing::warn!(
                reference,
                size = bytes.len(),
                limit = self.max_bytes,
                "Content exceeds size limit, truncating"
            );
        }
        let bytes = bytes[..bytes.len().min(self.max_bytes)].to_vec();

        if let Some(path) = self.cache_path(reference) {
            if let Some(parent) = path.parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            if let Err(e) = tokio::fs::write(&path, &bytes).await {
                tracing::warn!(reference, error = %e, "Failed to cache content");
            }
        }

        Ok(bytes)
    }
}
