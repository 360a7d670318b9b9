//! # Pipeline Orchestrator
//!
//! ## Purpose
//! Executes one complete run: deduplicate raw records against the history
//! store, filter survivors against the keyword set, analyze matched records
//! once each, synthesize per-keyword narratives, record bookkeeping, and
//! hand the groups to the assembler.
//!
//! ## Failure Semantics
//! - Configuration errors (empty keyword list, unreachable store) abort the
//!   run before stage 1
//! - After that point every error is recoverable at unit granularity: a
//!   record whose call exhausts retries terminates as `failed` without
//!   blocking any other record
//! - A run deadline stops admission of new backend work; in-flight calls
//!   complete and a partial report is still produced
//!
//! ## Concurrency
//! Each stage fans out fully in parallel; the per-backend gates bound
//! effective concurrency and request rate. At most one run is active at a
//! time, so history writes never race across runs.

use crate::backends::{AnalysisBackend, FilterBackend, NarrativeBackend};
use crate::config::{BackendsConfig, Config, KeywordConfig};
use crate::errors::{DigestError, Result};
use crate::gateway::CallGate;
use crate::history::{HistoryStore, RecordStatus};
use crate::identity::{self, IdentityKey};
use crate::pipeline::{PipelineStats, RecordState, Stage, UnitFailure};
use crate::report::{assembler, Report};
use crate::utils::{TextUtils, Timer};
use crate::{AnalysisResult, MatchResult, RawRecord};
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// The three backend collaborators, injected as trait objects.
#[derive(Clone)]
pub struct BackendSet {
    pub filter: Arc<dyn FilterBackend>,
    pub analysis: Arc<dyn AnalysisBackend>,
    pub narrative: Arc<dyn NarrativeBackend>,
}

/// Independent gates per backend, reflecting their different quota profiles.
pub struct GateSet {
    pub filter: Arc<CallGate>,
    pub analysis: Arc<CallGate>,
    pub narrative: Arc<CallGate>,
}

impl GateSet {
    pub fn from_config(config: &BackendsConfig) -> Self {
        Self {
            filter: Arc::new(CallGate::from_backend_config("filter", &config.filter)),
            analysis: Arc::new(CallGate::from_backend_config("analysis", &config.analysis)),
            narrative: Arc::new(CallGate::from_backend_config("narrative", &config.narrative)),
        }
    }
}

/// Run-level behavior knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub keywords: Vec<KeywordConfig>,
    pub retention_days: u32,
    pub run_deadline: Option<Duration>,
    pub placeholder_summary: String,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            keywords: config.keywords.clone(),
            retention_days: config.store.retention_days,
            run_deadline: config.pipeline.run_deadline_seconds.map(Duration::from_secs),
            placeholder_summary: config.report.placeholder_summary.clone(),
        }
    }
}

/// Everything a completed (possibly partial) run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: Report,
    pub stats: PipelineStats,
    pub failures: Vec<UnitFailure>,
}

/// Per-run state machine driver. Holds an explicit store handle rather than
/// any process-wide state, so parallel test instances stay isolated.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    history: Arc<HistoryStore>,
    backends: BackendSet,
    gates: GateSet,
    /// Rejects overlapping runs
    run_guard: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        history: Arc<HistoryStore>,
        backends: BackendSet,
        gates: GateSet,
    ) -> Self {
        Self {
            settings,
            history,
            backends,
            gates,
            run_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Execute one run over the given raw records for `run_date`.
    pub async fn run(&self, records: Vec<RawRecord>, run_date: NaiveDate) -> Result<RunOutcome> {
        let _guard = self
            .run_guard
            .try_lock()
            .map_err(|_| DigestError::RunInProgress)?;

        // Fatal checks before any stage
        if self.settings.keywords.is_empty() {
            return Err(DigestError::Config {
                message: "Keyword list is empty".to_string(),
            });
        }
        self.history.health_check()?;

        let timer = Timer::new("pipeline_run");
        let deadline = self.settings.run_deadline.map(|d| Instant::now() + d);

        let mut stats = PipelineStats {
            run_date: run_date.format("%Y-%m-%d").to_string(),
            raw_records: records.len(),
            start_time: Some(Utc::now()),
            ..PipelineStats::default()
        };

        // Dedup against in-run sightings and the history store
        let work = self.dedup(records, run_date, &mut stats);
        stats.total_papers = work.len();
        tracing::info!(
            raw = stats.raw_records,
            merged = stats.duplicates_merged,
            skipped_seen = stats.skipped_seen,
            admitted = stats.total_papers,
            "Deduplication complete"
        );

        let states: Arc<DashMap<IdentityKey, RecordState>> = Arc::new(DashMap::new());
        let titles: HashMap<IdentityKey, String> = work
            .iter()
            .map(|(key, record)| (key.clone(), record.title.clone()))
            .collect();
        for (key, _) in &work {
            states.insert(key.clone(), RecordState::Fetched);
        }
        let mut failures: Vec<UnitFailure> = Vec::new();

        // Stage 1: filter every admitted record
        let matched = self
            .filter_stage(work, deadline, &states, &mut failures, &mut stats)
            .await;
        stats.matched_papers = matched.len();
        tracing::info!(matched = stats.matched_papers, "Filter stage complete");

        // Stage 2: one analysis call per matched record, keyword overlap deduplicated
        let analyses = self
            .analysis_stage(matched, deadline, &states, &mut failures, &mut stats)
            .await;
        stats.analyzed_papers = analyses.len();
        tracing::info!(analyzed = stats.analyzed_papers, "Analysis stage complete");

        // Stage 3: group by keyword and synthesize one narrative per group
        let keyword_names: Vec<String> = self
            .settings
            .keywords
            .iter()
            .map(|k| k.name.clone())
            .collect();
        let groups = group_by_keyword(&keyword_names, &analyses);
        let summaries = self.narrative_stage(&groups, deadline).await;

        // Assemble the (possibly partial) report
        let report = assembler::assemble(
            run_date,
            stats.total_papers,
            stats.matched_papers,
            stats.analyzed_papers,
            &keyword_names,
            summaries,
            groups,
        );

        // Analyzed records are now part of the report
        let analyzed_keys: Vec<IdentityKey> = states
            .iter()
            .filter(|entry| matches!(entry.value(), RecordState::Analyzed))
            .map(|entry| entry.key().clone())
            .collect();
        for key in analyzed_keys {
            states.insert(key, RecordState::Reported);
        }

        // Bookkeeping: record a terminal status for every record this run
        // actually processed. Records denied by the deadline stay `failed`
        // so a later run picks them up again.
        self.record_outcomes(&states, &titles, run_date);

        stats.end_time = Some(Utc::now());
        stats.duration_ms = timer.stop();
        tracing::info!(
            total = stats.total_papers,
            matched = stats.matched_papers,
            analyzed = stats.analyzed_papers,
            failed = stats.failed_papers,
            duration_ms = stats.duration_ms,
            "Run complete"
        );

        Ok(RunOutcome {
            report,
            stats,
            failures,
        })
    }

    /// Collapse in-run duplicates and drop records the store already saw
    /// within the retention window. Keys whose last status is `failed` pass
    /// through so transient analysis failures get retried on later runs.
    fn dedup(
        &self,
        records: Vec<RawRecord>,
        run_date: NaiveDate,
        stats: &mut PipelineStats,
    ) -> Vec<(IdentityKey, RawRecord)> {
        let mut order: Vec<IdentityKey> = Vec::new();
        let mut by_key: HashMap<IdentityKey, RawRecord> = HashMap::new();

        for record in records {
            let key = identity::canonicalize(&record);
            match by_key.entry(key.clone()) {
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    stats.duplicates_merged += 1;
                    if identity::is_richer(&record, slot.get()) {
                        tracing::debug!(
                            key = %key,
                            feed = %record.feed,
                            "Richer sighting supersedes earlier record"
                        );
                        slot.insert(record);
                    }
                }
                std::collections::hash_map::Entry::Vacant(slot) => {
                    order.push(key);
                    slot.insert(record);
                }
            }
        }

        let mut admitted = Vec::new();
        for key in order {
            let record = by_key.remove(&key).expect("key recorded in order");
            let seen = match self.history.status(&key) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "History read failed, treating as unseen");
                    None
                }
            };

            if let Some(entry) = seen {
                if entry.within_window(run_date, self.settings.retention_days)
                    && entry.status != RecordStatus::Failed
                {
                    stats.skipped_seen += 1;
                    tracing::debug!(key = %key, status = ?entry.status, "Skipping already-seen record");
                    continue;
                }
            }
            admitted.push((key, record));
        }
        admitted
    }

    async fn filter_stage(
        &self,
        work: Vec<(IdentityKey, RawRecord)>,
        deadline: Option<Instant>,
        states: &Arc<DashMap<IdentityKey, RecordState>>,
        failures: &mut Vec<UnitFailure>,
        stats: &mut PipelineStats,
    ) -> Vec<(RawRecord, MatchResult)> {
        let keywords = Arc::new(self.settings.keywords.clone());

        let outcomes = join_all(work.into_iter().map(|(key, record)| {
            let gate = self.gates.filter.clone();
            let backend = self.backends.filter.clone();
            let keywords = keywords.clone();
            let states = states.clone();
            async move {
                if deadline_exceeded(deadline) {
                    states.insert(key.clone(), RecordState::Failed(Stage::Filter));
                    return (key, record, Err(deadline_error(Stage::Filter)));
                }

                tracing::debug!(title = %TextUtils::truncate(&record.title, 60), "Filtering");
                let record_call = record.clone();
                let verdict = gate
                    .call(move || {
                        let backend = backend.clone();
                        let record = record_call.clone();
                        let keywords = keywords.clone();
                        async move { backend.classify(&record, keywords.as_slice()).await }
                    })
                    .await;

                let state = match &verdict {
                    Ok(v) if v.matched => RecordState::Matched,
                    Ok(_) => RecordState::Rejected,
                    Err(_) => RecordState::Failed(Stage::Filter),
                };
                states.insert(key.clone(), state);
                (key, record, verdict)
            }
        }))
        .await;

        let mut matched = Vec::new();
        for (key, record, verdict) in outcomes {
            match verdict {
                Ok(v) if v.matched => {
                    tracing::info!(
                        key = %key,
                        keywords = ?v.matched_keywords,
                        relevance = v.relevance.as_str(),
                        "Matched"
                    );
                    matched.push((
                        record,
                        MatchResult {
                            identity: key,
                            matched: true,
                            matched_keywords: v.matched_keywords,
                            relevance: v.relevance,
                            rationale: v.rationale,
                        },
                    ));
                }
                Ok(_) => stats.rejected_papers += 1,
                Err(e) => {
                    stats.failed_papers += 1;
                    failures.push(UnitFailure {
                        identity: key,
                        stage: Stage::Filter,
                        error: e.to_string(),
                    });
                }
            }
        }
        matched
    }

    async fn analysis_stage(
        &self,
        matched: Vec<(RawRecord, MatchResult)>,
        deadline: Option<Instant>,
        states: &Arc<DashMap<IdentityKey, RecordState>>,
        failures: &mut Vec<UnitFailure>,
        stats: &mut PipelineStats,
    ) -> Vec<AnalysisResult> {
        let outcomes = join_all(matched.into_iter().map(|(record, matched)| {
            let gate = self.gates.analysis.clone();
            let backend = self.backends.analysis.clone();
            let states = states.clone();
            async move {
                let key = matched.identity.clone();
                if deadline_exceeded(deadline) {
                    states.insert(key.clone(), RecordState::Failed(Stage::Analysis));
                    return (record, matched, Err(deadline_error(Stage::Analysis)));
                }

                tracing::debug!(title = %TextUtils::truncate(&record.title, 60), "Analyzing");
                let record_call = record.clone();
                let keywords = Arc::new(matched.matched_keywords.clone());
                let output = gate
                    .call(move || {
                        let backend = backend.clone();
                        let record = record_call.clone();
                        let keywords = keywords.clone();
                        async move { backend.analyze(&record, keywords.as_slice()).await }
                    })
                    .await;

                let state = match &output {
                    Ok(_) => RecordState::Analyzed,
                    Err(_) => RecordState::Failed(Stage::Analysis),
                };
                states.insert(key, state);
                (record, matched, output)
            }
        }))
        .await;

        let mut analyses = Vec::new();
        for (record, matched, output) in outcomes {
            match output {
                Ok(out) => analyses.push(AnalysisResult {
                    identity: matched.identity,
                    title: out.title,
                    authors: out.authors,
                    source: record.source,
                    feed: record.feed,
                    url: record.url,
                    published: record.published,
                    matched_keywords: matched.matched_keywords,
                    tldr: out.tldr,
                    methodology: out.methodology,
                    contributions: out.contributions,
                    limitations: out.limitations,
                    keyword_notes: out.keyword_notes,
                    quality_score: out.quality_score,
                    score_reason: out.score_reason,
                }),
                Err(e) => {
                    tracing::warn!(key = %matched.identity, error = %e, "Analysis failed");
                    stats.failed_papers += 1;
                    failures.push(UnitFailure {
                        identity: matched.identity,
                        stage: Stage::Analysis,
                        error: e.to_string(),
                    });
                }
            }
        }
        analyses
    }

    /// One narrative call per keyword group. Groups with no papers, and
    /// groups whose narrative call fails or is denied by the deadline, get
    /// the placeholder summary; the report entry is always produced.
    async fn narrative_stage(
        &self,
        groups: &BTreeMap<String, Vec<AnalysisResult>>,
        deadline: Option<Instant>,
    ) -> BTreeMap<String, String> {
        let outcomes = join_all(groups.iter().map(|(keyword, papers)| {
            let gate = self.gates.narrative.clone();
            let backend = self.backends.narrative.clone();
            let placeholder = self.settings.placeholder_summary.clone();
            async move {
                if papers.is_empty() {
                    return (keyword.clone(), placeholder);
                }
                if deadline_exceeded(deadline) {
                    tracing::warn!(keyword = %keyword, "Run deadline reached, skipping narrative");
                    return (keyword.clone(), placeholder);
                }

                let keyword_call = keyword.clone();
                let papers_call: Arc<Vec<AnalysisResult>> = Arc::new(papers.clone());
                let summary = gate
                    .call(move || {
                        let backend = backend.clone();
                        let keyword = keyword_call.clone();
                        let papers = papers_call.clone();
                        async move { backend.summarize(&keyword, papers.as_slice()).await }
                    })
                    .await;

                match summary {
                    Ok(text) => (keyword.clone(), text),
                    Err(e) => {
                        tracing::warn!(keyword = %keyword, error = %e, "Narrative failed, using placeholder");
                        (keyword.clone(), placeholder)
                    }
                }
            }
        }))
        .await;

        outcomes.into_iter().collect()
    }

    /// Persist a terminal status for every record that reached one. Store
    /// write errors here are logged and skipped; they never fail the run.
    fn record_outcomes(
        &self,
        states: &DashMap<IdentityKey, RecordState>,
        titles: &HashMap<IdentityKey, String>,
        run_date: NaiveDate,
    ) {
        for entry in states.iter() {
            let status = match entry.value() {
                RecordState::Rejected => RecordStatus::Rejected,
                RecordState::Failed(_) => RecordStatus::Failed,
                RecordState::Analyzed | RecordState::Reported => RecordStatus::Reported,
                // Never dispatched (e.g. dropped mid-cancellation): leave
                // unrecorded so the next run processes it from scratch
                RecordState::Fetched | RecordState::Matched => continue,
            };

            let title = titles
                .get(entry.key())
                .map(String::as_str)
                .unwrap_or_default();
            if let Err(e) = self.history.record(entry.key(), run_date, status, title) {
                tracing::warn!(key = %entry.key(), error = %e, "History write failed, skipping");
            }
        }
    }
}

/// Group successful analyses by matched keyword, ordering each group
/// deterministically so the narrative stage sees the same numbering the
/// assembler will persist.
fn group_by_keyword(
    keywords: &[String],
    analyses: &[AnalysisResult],
) -> BTreeMap<String, Vec<AnalysisResult>> {
    let mut groups: BTreeMap<String, Vec<AnalysisResult>> = keywords
        .iter()
        .map(|k| (k.clone(), Vec::new()))
        .collect();

    for analysis in analyses {
        for keyword in &analysis.matched_keywords {
            if let Some(group) = groups.get_mut(keyword) {
                group.push(analysis.clone());
            } else {
                tracing::debug!(keyword = %keyword, "Backend returned unconfigured keyword, ignoring");
            }
        }
    }

    for group in groups.values_mut() {
        assembler::order_group(group);
    }
    groups
}

fn deadline_exceeded(deadline: Option<Instant>) -> bool {
    deadline.map(|d| Instant::now() >= d).unwrap_or(false)
}

fn deadline_error(stage: Stage) -> DigestError {
    DigestError::RetriesExhausted {
        backend: stage.as_str().to_string(),
        attempts: 0,
        last_error: "run deadline exceeded before dispatch".to_string(),
    }
}
