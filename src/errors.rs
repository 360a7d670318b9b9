//! # Error Handling Module
//!
//! ## Purpose
//! Centralized error handling for the digest pipeline, providing the full
//! error taxonomy used by the gateway's retry decisions and the
//! orchestrator's fatal-vs-recoverable split.
//!
//! ## Error Categories
//! - **Configuration**: invalid keyword/config state. Fatal, aborts a run
//!   before any stage
//! - **Transient call**: timeout, malformed response, 5xx, 429. Retried by
//!   the gateway, then surfaced as a per-unit failure once retries exhaust
//! - **Permanent call**: auth rejection, not-found. Never retried
//! - **Store**: fatal before processing begins, logged-and-skipped on a
//!   single record's bookkeeping write
//!
//! ## Usage
//! ```rust
//! use paper_digest::errors::{DigestError, Result};
//!
//! fn lookup() -> Result<()> {
//!     Err(DigestError::ReportNotFound { date: "2025-01-01".to_string() })
//! }
//! ```

use thiserror::Error;

/// Result type used throughout the application
pub type Result<T> = std::result::Result<T, DigestError>;

/// Error types for the digest pipeline
#[derive(Debug, Error)]
pub enum DigestError {
    /// Configuration errors (fatal, abort before any stage)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation failed for field '{field}': {reason}")]
    ValidationFailed { field: String, reason: String },

    /// A pipeline run is already active
    #[error("A pipeline run is already in progress")]
    RunInProgress,

    /// Transient backend failure (retried by the gateway)
    #[error("Transient failure calling {backend}: {details}")]
    TransientCall { backend: String, details: String },

    /// Permanent backend failure (never retried)
    #[error("Permanent failure calling {backend}: {details}")]
    PermanentCall { backend: String, details: String },

    /// Backend call exceeded its per-call timeout
    #[error("Call to {backend} timed out after {timeout_ms}ms")]
    CallTimeout { backend: String, timeout_ms: u64 },

    /// Backend signalled its own rate limit (HTTP 429)
    #[error("Rate limit reported by {backend}")]
    RateLimited {
        backend: String,
        retry_after_seconds: Option<u64>,
    },

    /// Backend replied but the payload could not be interpreted
    #[error("Malformed response from {backend}: {details}")]
    MalformedResponse { backend: String, details: String },

    /// All retry attempts for a call were consumed
    #[error("Retries exhausted for {backend} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        backend: String,
        attempts: u32,
        last_error: String,
    },

    /// Feed-level fetch failure, isolated per source
    #[error("Feed '{source_name}' failed: {details}")]
    Feed { source_name: String, details: String },

    /// Full content for a record could not be retrieved
    #[error("Content unavailable for '{reference}': {details}")]
    ContentUnavailable { reference: String, details: String },

    /// Store operation failed
    #[error("Store error during {operation}: {details}")]
    Store { operation: String, details: String },

    /// Store could not be opened at all
    #[error("Store unavailable at {db_path}: {reason}")]
    StoreUnavailable { db_path: String, reason: String },

    /// No report persisted for the requested date
    #[error("No report found for date {date}")]
    ReportNotFound { date: String },

    /// Serialization/deserialization errors
    #[error("Serialization failed for {data_type}: {reason}")]
    SerializationFailed { data_type: String, reason: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DigestError {
    /// Whether the gateway should retry a call that failed with this error.
    ///
    /// Mirrors the pipeline's taxonomy: timeouts, malformed responses,
    /// 5xx-class failures and upstream 429s are transient; auth rejections
    /// and not-found are terminal for the affected unit.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DigestError::TransientCall { .. }
                | DigestError::CallTimeout { .. }
                | DigestError::RateLimited { .. }
                | DigestError::MalformedResponse { .. }
                | DigestError::ContentUnavailable { .. }
        )
    }

    /// Whether this error aborts a run outright rather than failing one unit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DigestError::Config { .. }
                | DigestError::ValidationFailed { .. }
                | DigestError::StoreUnavailable { .. }
                | DigestError::RunInProgress
        )
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            DigestError::Config { .. } | DigestError::ValidationFailed { .. } => "configuration",
            DigestError::RunInProgress => "run_guard",
            DigestError::TransientCall { .. }
            | DigestError::PermanentCall { .. }
            | DigestError::CallTimeout { .. }
            | DigestError::RateLimited { .. }
            | DigestError::MalformedResponse { .. }
            | DigestError::RetriesExhausted { .. } => "backend",
            DigestError::Feed { .. } => "feed",
            DigestError::ContentUnavailable { .. } => "content",
            DigestError::Store { .. } | DigestError::StoreUnavailable { .. } => "store",
            DigestError::ReportNotFound { .. } => "report",
            DigestError::SerializationFailed { .. } => "serialization",
            DigestError::Internal { .. } => "generic",
        }
    }
}

// Conversion from common error types
impl From<std::io::Error> for DigestError {
    fn from(err: std::io::Error) -> Self {
        DigestError::Internal {
            message: format!("IO error: {}", err),
        }
    }
}

impl From<serde_json::Error> for DigestError {
    fn from(err: serde_json::Error) -> Self {
        DigestError::SerializationFailed {
            data_type: "json".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<bincode::Error> for DigestError {
    fn from(err: bincode::Error) -> Self {
        DigestError::SerializationFailed {
            data_type: "binary".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<sled::Error> for DigestError {
    fn from(err: sled::Error) -> Self {
        DigestError::Store {
            operation: "database".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for DigestError {
    fn from(err: toml::de::Error) -> Self {
        DigestError::Config {
            message: format!("TOML parse error: {}", err),
        }
    }
}
