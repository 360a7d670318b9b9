//! # Pipeline Orchestration Module
//!
//! ## Purpose
//! Drives documents through the four ordered stages (filter, analyze,
//! summarize, assemble) as a per-identity state machine with unit-level
//! failure isolation. Exactly these stages, in this order; this is not a
//! general workflow engine.
//!
//! ## State Machine
//! `Fetched → Filtered{matched|rejected} → Analyzed{ok|failed} →
//! Summarized → Reported`, with `rejected`, `failed`, and `reported` as
//! terminal states. A unit failure never aborts the run and never blocks
//! another record's progress.

pub mod orchestrator;

pub use orchestrator::{BackendSet, GateSet, Orchestrator, OrchestratorSettings, RunOutcome};

use crate::identity::IdentityKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stage, used to scope unit failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Filter,
    Analysis,
    Narrative,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Filter => "filter",
            Stage::Analysis => "analysis",
            Stage::Narrative => "narrative",
        }
    }
}

/// Per-identity progress through the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    /// Deduplicated and admitted into the run
    Fetched,
    /// Filter decided the record matches no keyword (terminal)
    Rejected,
    /// Filter matched at least one keyword
    Matched,
    /// A stage exhausted its retries for this record (terminal)
    Failed(Stage),
    /// Analysis produced a structured result
    Analyzed,
    /// Included in the assembled report (terminal)
    Reported,
}

impl RecordState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordState::Rejected | RecordState::Failed(_) | RecordState::Reported
        )
    }
}

/// A terminal failure scoped to one record. Never escalates to run failure.
#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub identity: IdentityKey,
    pub stage: Stage,
    pub error: String,
}

/// Execution statistics for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Run date (YYYY-MM-DD)
    pub run_date: String,
    /// Raw records handed to the run before deduplication
    pub raw_records: usize,
    /// In-run collapses of the same work sighted more than once
    pub duplicates_merged: usize,
    /// Records skipped because the store saw them within the retention window
    pub skipped_seen: usize,
    /// Deduplicated records that entered the filter stage
    pub total_papers: usize,
    /// Records matched to at least one keyword
    pub matched_papers: usize,
    /// Records the filter rejected
    pub rejected_papers: usize,
    /// Records with a successful analysis
    pub analyzed_papers: usize,
    /// Records that terminated as unit failures
    pub failed_papers: usize,
    /// Start time of the run
    pub start_time: Option<DateTime<Utc>>,
    /// End time of the run
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}
