//! # Backend Interfaces Module
//!
//! ## Purpose
//! Defines the narrow interfaces through which the pipeline consumes its
//! three external call targets (keyword filtering, deep analysis, and
//! narrative synthesis) plus shared helpers for interpreting structured
//! replies. Providers differ by configuration (capability variant), never
//! by runtime type inspection.
//!
//! ## Architecture
//! - `FilterBackend`: `(title, abstract, keyword set) -> match verdict`
//! - `AnalysisBackend`: `(record, matched keywords) -> structured analysis`
//! - `NarrativeBackend`: `(keyword, numbered analyses) -> summary text`
//! - `openai.rs`: OpenAI-compatible chat implementation of all three

pub mod openai;

pub use openai::ChatBackend;

use crate::config::KeywordConfig;
use crate::errors::Result;
use crate::{AnalysisResult, RawRecord, Relevance};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Verdict of the filter backend for one record. The orchestrator attaches
/// the identity key to form a `MatchResult`.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterVerdict {
    pub matched: bool,
    #[serde(default)]
    pub matched_keywords: Vec<String>,
    #[serde(default = "default_relevance")]
    pub relevance: Relevance,
    #[serde(default, alias = "reason")]
    pub rationale: String,
}

fn default_relevance() -> Relevance {
    Relevance::Low
}

/// Structured output of the analysis backend for one record. Display
/// metadata the backend does not supply is filled in from the raw record.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisOutput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub tldr: String,
    #[serde(default)]
    pub methodology: String,
    #[serde(default)]
    pub contributions: Vec<String>,
    #[serde(default)]
    pub limitations: Vec<String>,
    #[serde(default)]
    pub keyword_notes: BTreeMap<String, String>,
    #[serde(default = "default_score")]
    pub quality_score: u8,
    #[serde(default)]
    pub score_reason: String,
}

fn default_score() -> u8 {
    5
}

/// Stage 1 collaborator: decides keyword membership from title + abstract.
#[async_trait]
pub trait FilterBackend: Send + Sync {
    async fn classify(&self, record: &RawRecord, keywords: &[KeywordConfig])
        -> Result<FilterVerdict>;
}

/// Stage 2 collaborator: produces a structured deep analysis for a matched
/// record. Content retrieval, when the backend is content-capable, happens
/// behind this interface.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn analyze(&self, record: &RawRecord, matched_keywords: &[String])
        -> Result<AnalysisOutput>;
}

/// Stage 3 collaborator: synthesizes one narrative summary per keyword
/// group. `papers` arrives already ordered and numbered (1-based position),
/// and the summary is expected to reference papers by that number.
#[async_trait]
pub trait NarrativeBackend: Send + Sync {
    async fn summarize(&self, keyword: &str, papers: &[AnalysisResult]) -> Result<String>;
}

/// Extract a JSON object from an LLM reply. Models wrap JSON in prose or
/// markdown fences often enough that three strategies are tried in order:
/// direct parse, fenced block, outermost balanced braces.
pub fn extract_json(response: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(response.trim()) {
        return Some(value);
    }

    if let Some(start) = response.find("```") {
        let body = &response[start + 3..];
        let body = body.strip_prefix("json").unwrap_or(body);
        if let Some(end) = body.find("```") {
            if let Ok(value) = serde_json::from_str(body[..end].trim()) {
                return Some(value);
            }
        }
    }

    let start = response.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in response[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &response[start..start + i + 1];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_direct() {
        let value = extract_json(r#"{"matched": true}"#).unwrap();
        assert_eq!(value["matched"], true);
    }

    #[test]
    fn test_extract_json_fenced() {
        let reply = "Here is the result:\n```json\n{\"matched\": false, \"reason\": \"off-topic\"}\n```";
        let value = extract_json(reply).unwrap();
        assert_eq!(value["matched"], false);
    }

    #[test]
    fn test_extract_json_embedded_with_nesting() {
        let reply = r#"Sure. {"quality_score": 7, "keyword_notes": {"LLM Agents": "close match"}} Hope that helps."#;
        let value = extract_json(reply).unwrap();
        assert_eq!(value["quality_score"], 7);
        assert_eq!(value["keyword_notes"]["LLM Agents"], "close match");
    }

    #[test]
    fn test_extract_json_handles_braces_in_strings() {
        let reply = r#"{"rationale": "uses {curly} notation", "matched": true}"#;
        let value = extract_json(reply).unwrap();
        assert_eq!(value["matched"], true);
    }

    #[test]
    fn test_extract_json_garbage_is_none() {
        assert!(extract_json("no structured output here").is_none());
    }

    #[test]
    fn test_filter_verdict_accepts_reason_alias() {
        let value = extract_json(
            r#"{"matched": true, "matched_keywords": ["A"], "relevance": "high", "reason": "core topic"}"#,
        )
        .unwrap();
        let verdict: FilterVerdict = serde_json::from_value(value).unwrap();
        assert!(verdict.matched);
        assert_eq!(verdict.rationale, "core topic");
    }
}
