//! # Report Module
//!
//! ## Purpose
//! The run's output side: deterministic numbering and assembly of keyword
//! groups, persistence of dated reports, and Markdown rendering.
//!
//! ## Architecture
//! - `assembler.rs`: ordering and PaperNumber assignment (once, at assembly)
//! - `store.rs`: persisted reports keyed by date
//! - `markdown.rs`: human-readable rendering of a report

pub mod assembler;
pub mod markdown;
pub mod store;

pub use store::ReportStore;

use crate::SourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One run's assembled output. Immutable once the run completes; exactly
/// one report exists per run date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Run date (YYYY-MM-DD)
    pub date: String,
    /// Deduplicated records that entered the pipeline
    pub total_papers: usize,
    /// Records matched to at least one keyword
    pub matched_papers: usize,
    /// Records with a successful deep analysis
    pub analyzed_papers: usize,
    /// Configured keywords in display order
    pub keywords: Vec<String>,
    /// Narrative summary per keyword
    pub summaries: BTreeMap<String, String>,
    /// Numbered paper rows per keyword
    pub papers_by_keyword: BTreeMap<String, Vec<ReportPaper>>,
}

/// One paper row inside a keyword group. `paper_number` is assigned once at
/// assembly time and persisted; consumers must never renumber from display
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPaper {
    pub paper_number: u32,
    /// Canonical identity string
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub source: SourceKind,
    pub feed: String,
    pub url: String,
    pub quality_score: u8,
    pub score_reason: String,
    pub tldr: String,
    pub methodology: String,
    pub contributions: Vec<String>,
    pub limitations: Vec<String>,
    /// Relevance note for this group's keyword, if the analysis produced one
    pub keyword_note: Option<String>,
    pub published: DateTime<Utc>,
}
