//! # Keyword-Driven Paper Digest Pipeline
//!
//! ## Overview
//! This library implements a daily research-paper digest service: candidate
//! documents arrive from preprint and journal feeds, are deduplicated against
//! a persistent history store, filtered against user-defined topic keywords by
//! a lightweight LLM backend, analyzed in depth by a heavier backend, and
//! assembled into a dated report with stable per-keyword paper numbering.
//!
//! ## Architecture
//! The system is composed of several key modules:
//! - `identity`: Canonical fingerprinting of raw records across sources
//! - `history`: Persistent deduplication store with a retention window
//! - `gateway`: Rate-limited, retrying wrapper around backend calls
//! - `backends`: Filter / analysis / narrative backend interfaces and the
//!   OpenAI-compatible HTTP implementation
//! - `sources`: Feed adapters producing raw records
//! - `pipeline`: The per-run orchestrator (dedup → filter → analyze → summarize)
//! - `report`: Deterministic numbering, persistence, and Markdown rendering
//! - `api`: REST endpoints serving persisted reports
//! - `config`: Configuration management and settings
//! - `errors`: Centralized error handling and types
//!
//! ## Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use paper_digest::{Config, history::HistoryStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("config.toml")?;
//! let db = sled::open(&config.store.db_path)?;
//! let history = Arc::new(HistoryStore::new(&db)?);
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod api;
pub mod backends;
pub mod config;
pub mod content;
pub mod errors;
pub mod gateway;
pub mod history;
pub mod identity;
pub mod pipeline;
pub mod report;
pub mod sources;

// Utilities
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use errors::{DigestError, Result};
pub use identity::IdentityKey;
pub use pipeline::Orchestrator;
pub use report::Report;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Where a record originated: a preprint server or a peer-reviewed journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Preprint,
    Journal,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Preprint => "preprint",
            SourceKind::Journal => "journal",
        }
    }
}

/// A candidate document as produced by a feed adapter. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// Source type of the originating feed
    pub source: SourceKind,
    /// Name of the feed that produced this record (e.g. "arxiv", "Nature Medicine")
    pub feed: String,
    /// Feed-native identifier, if the feed provides a stable one
    pub native_id: Option<String>,
    /// DOI, if present
    pub doi: Option<String>,
    /// Paper title
    pub title: String,
    /// Abstract text
    pub abstract_text: String,
    /// Author list in feed order
    pub authors: Vec<String>,
    /// Publication timestamp reported by the feed
    pub published: DateTime<Utc>,
    /// Landing page URL
    pub url: String,
    /// Reference to the full content (PDF URL or similar), if resolvable
    pub content_ref: Option<String>,
}

/// Relevance tier assigned by the filter backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relevance {
    High,
    Medium,
    Low,
}

impl Relevance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relevance::High => "high",
            Relevance::Medium => "medium",
            Relevance::Low => "low",
        }
    }
}

/// Outcome of the filter stage for a single deduplicated record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub identity: IdentityKey,
    pub matched: bool,
    pub matched_keywords: Vec<String>,
    pub relevance: Relevance,
    pub rationale: String,
}

/// Structured output of the analysis stage for one record.
///
/// Carries enough display metadata (title, authors, url, source) that the
/// assembler can build report rows without going back to the raw record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub identity: IdentityKey,
    pub title: String,
    pub authors: Vec<String>,
    pub source: SourceKind,
    pub feed: String,
    pub url: String,
    pub published: DateTime<Utc>,
    pub matched_keywords: Vec<String>,
    /// One-to-two sentence summary of the paper
    pub tldr: String,
    pub methodology: String,
    pub contributions: Vec<String>,
    pub limitations: Vec<String>,
    /// Per-keyword note on how the paper relates to that keyword
    pub keyword_notes: BTreeMap<String, String>,
    /// Quality score in 1..=10
    pub quality_score: u8,
    pub score_reason: String,
}

/// Application state shared across API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Config>,
    pub history: Arc<history::HistoryStore>,
    pub reports: Arc<report::store::ReportStore>,
}
