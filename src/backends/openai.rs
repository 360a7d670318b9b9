//! # OpenAI-Compatible Chat Backend
//!
//! ## Purpose
//! Implements all three backend roles (filter / analysis / narrative) against
//! an OpenAI-compatible chat-completions API. The same type serves different
//! providers and models; behavior differences are configuration (model,
//! capability variant), not code paths keyed on provider identity.
//!
//! ## Error Mapping
//! HTTP status codes map onto the pipeline's retry taxonomy: 429 and
//! 5xx-class responses are transient, 401/403/404 are permanent, and
//! unparseable payloads are malformed (transient). The gateway makes the
//! retry decision; this module only classifies.

use crate::backends::{
    extract_json, AnalysisBackend, AnalysisOutput, FilterBackend, FilterVerdict, NarrativeBackend,
};
use crate::config::{BackendCapability, BackendConfig, KeywordConfig};
use crate::content::ContentAccess;
use crate::errors::{DigestError, Result};
use crate::{AnalysisResult, RawRecord, Relevance};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

/// Chat backend speaking the OpenAI wire format.
pub struct ChatBackend {
    role: String,
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    capability: BackendCapability,
    content: Option<Arc<dyn ContentAccess>>,
    max_content_chars: usize,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl ChatBackend {
    /// Build a backend for one pipeline role from its configuration block.
    /// `content` must be provided when the configuration selects the
    /// content-capable variant.
    pub fn new(
        role: impl Into<String>,
        config: &BackendConfig,
        content: Option<Arc<dyn ContentAccess>>,
        max_content_chars: usize,
    ) -> Result<Self> {
        let role = role.into();
        if config.capability == BackendCapability::ContentCapable && content.is_none() {
            return Err(DigestError::Config {
                message: format!(
                    "Backend '{}' is content-capable but no content adapter is configured",
                    role
                ),
            });
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent("paper-digest/0.1")
            .build()
            .map_err(|e| DigestError::Config {
                message: format!("Failed to build HTTP client for '{}': {}", role, e),
            })?;

        Ok(Self {
            role,
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            capability: config.capability,
            content,
            max_content_chars,
        })
    }

    /// Send one system+user exchange and return the assistant text.
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: 0.1,
            max_tokens: 4000,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DigestError::TransientCall {
                backend: self.role.clone(),
                details: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(DigestError::RateLimited {
                backend: self.role.clone(),
                retry_after_seconds: retry_after,
            });
        }
        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || status == StatusCode::NOT_FOUND
        {
            return Err(DigestError::PermanentCall {
                backend: self.role.clone(),
                details: format!("HTTP {}", status),
            });
        }
        if status.is_server_error() {
            return Err(DigestError::TransientCall {
                backend: self.role.clone(),
                details: format!("HTTP {}", status),
            });
        }
        if !status.is_success() {
            return Err(DigestError::PermanentCall {
                backend: self.role.clone(),
                details: format!("HTTP {}", status),
            });
        }

        let payload: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| DigestError::MalformedResponse {
                    backend: self.role.clone(),
                    details: e.to_string(),
                })?;

        payload
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| DigestError::MalformedResponse {
                backend: self.role.clone(),
                details: "empty choices array".to_string(),
            })
    }

    fn malformed(&self, details: impl Into<String>) -> DigestError {
        DigestError::MalformedResponse {
            backend: self.role.clone(),
            details: details.into(),
        }
    }

    fn keywords_description(keywords: &[KeywordConfig]) -> String {
        let mut out = String::new();
        for kw in keywords {
            let _ = writeln!(out, "[{}]", kw.name);
            if !kw.description.is_empty() {
                let _ = writeln!(out, "  Description: {}", kw.description);
            }
            if !kw.examples.is_empty() {
                let _ = writeln!(out, "  Examples: {}", kw.examples.join("; "));
            }
        }
        out
    }

    /// Fetch full content for a record and return a bounded text excerpt.
    async fn content_excerpt(&self, record: &RawRecord) -> Result<Option<String>> {
        let Some(reference) = record.content_ref.as_deref() else {
            return Ok(None);
        };
        let adapter = match &self.content {
            Some(adapter) => adapter,
            None => return Ok(None),
        };

        let bytes = adapter.fetch(reference).await?;
        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        if text.len() > self.max_content_chars {
            let mut cut = self.max_content_chars;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        Ok(Some(text))
    }
}

#[async_trait]
impl FilterBackend for ChatBackend {
    async fn classify(
        &self,
        record: &RawRecord,
        keywords: &[KeywordConfig],
    ) -> Result<FilterVerdict> {
        let system = format!(
            "You are an academic paper classifier. Decide whether a paper is highly \
             relevant to any of the following research topics:\n\n{}\n\
             Reply with JSON only, no other text:\n\
             {{\"matched\": true|false, \"matched_keywords\": [\"...\"], \
             \"relevance\": \"high\"|\"medium\"|\"low\", \"reason\": \"one sentence\"}}\n\n\
             Rules: return matched=true only for papers whose core topic falls under a \
             listed keyword; papers that merely mention related concepts are not matches; \
             relevance \"low\" means no match; a paper may match several keywords.",
            Self::keywords_description(keywords)
        );
        let user = format!(
            "Title: {}\n\nAbstract: {}\n\nIs this paper highly relevant to any listed keyword?",
            record.title, record.abstract_text
        );

        let reply = self.chat(&system, &user).await?;
        let value = extract_json(&reply)
            .ok_or_else(|| self.malformed(format!("no JSON object in reply: {:.200}", reply)))?;
        let mut verdict: FilterVerdict = serde_json::from_value(value)
            .map_err(|e| self.malformed(format!("verdict shape mismatch: {}", e)))?;

        // Low relevance never counts as a match
        if verdict.matched && verdict.relevance == Relevance::Low {
            verdict.matched = false;
        }
        if !verdict.matched {
            verdict.matched_keywords.clear();
        }

        Ok(verdict)
    }
}

#[async_trait]
impl AnalysisBackend for ChatBackend {
    async fn analyze(
        &self,
        record: &RawRecord,
        matched_keywords: &[String],
    ) -> Result<AnalysisOutput> {
        let system = format!(
            "You are a senior research scientist producing a deep review of an academic \
             paper. The paper was matched to these keywords: {}.\n\
             Reply with JSON only, using exactly this shape:\n\
             {{\"title\": \"...\", \"authors\": [\"...\"], \"tldr\": \"1-2 sentences\", \
             \"methodology\": \"short description\", \"contributions\": [\"...\"], \
             \"limitations\": [\"...\"], \
             \"keyword_notes\": {{\"keyword\": \"how the paper relates\"}}, \
             \"quality_score\": 1-10, \"score_reason\": \"one sentence\"}}\n\
             Score 9-10 for landmark work, 7-8 for strong contributions, 5-6 for solid \
             incremental work, below 5 for limited contributions.",
            matched_keywords.join(", ")
        );

        let mut user = format!(
            "Title: {}\n\nAbstract: {}\n\nAuthors: {}",
            record.title,
            record.abstract_text,
            record.authors.join(", ")
        );
        if self.capability == BackendCapability::ContentCapable {
            if let Some(excerpt) = self.content_excerpt(record).await? {
                let _ = write!(user, "\n\nFull text excerpt:\n{}", excerpt);
            }
        }

        let reply = self.chat(&system, &user).await?;
        let value = extract_json(&reply)
            .ok_or_else(|| self.malformed(format!("no JSON object in reply: {:.200}", reply)))?;
        let mut output: AnalysisOutput = serde_json::from_value(value)
            .map_err(|e| self.malformed(format!("analysis shape mismatch: {}", e)))?;

        output.quality_score = output.quality_score.clamp(1, 10);
        if output.title.is_empty() {
            output.title = record.title.clone();
        }
        if output.authors.is_empty() {
            output.authors = record.authors.clone();
        }

        Ok(output)
    }
}

#[async_trait]
impl NarrativeBackend for ChatBackend {
    async fn summarize(&self, keyword: &str, papers: &[AnalysisResult]) -> Result<String> {
        let system = "You are writing the daily progress note for a research topic. \
                      Synthesize the listed papers into 3-5 sentences describing where the \
                      field moved today. Refer to papers by their bracketed number, e.g. [2]. \
                      Reply with the summary text only."
            .to_string();

        let mut user = format!("Topic: {}\n\nToday's papers:\n", keyword);
        for (index, paper) in papers.iter().enumerate() {
            let _ = writeln!(
                user,
                "[{}] {} (score {}): {}",
                index + 1,
                paper.title,
                paper.quality_score,
                paper.tldr
            );
        }

        let reply = self.chat(&system, &user).await?;
        let summary = reply.trim().to_string();
        if summary.is_empty() {
            return Err(self.malformed("empty narrative reply"));
        }
        Ok(summary)
    }
}
