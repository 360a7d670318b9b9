//! # RSS/Atom Feed Source
//!
//! ## Purpose
//! Fetches candidate records from RSS and Atom feeds: preprint servers
//! (arXiv, bioRxiv, medRxiv) and journal tables of contents. Entries are
//! normalized into `RawRecord`s with a stable identifier fallback chain:
//! DOI → feed-native id → nothing (the identity layer fingerprints the
//! title/author pair instead).
//!
//! ## Key Features
//! - HTML stripped from summaries, whitespace-collapsed titles
//! - DOI extraction from entry ids and links
//! - Editorial/news entries skipped for journals that mark them
//! - Per-feed entry cap and publication-date cutoff

use crate::config::FeedConfig;
use crate::errors::{DigestError, Result};
use crate::sources::FeedSource;
use crate::{RawRecord, SourceKind};
use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use std::time::Duration;

/// RSS/Atom implementation of `FeedSource`.
pub struct RssFeedSource {
    config: FeedConfig,
    client: reqwest::Client,
    doi_regex: Regex,
    html_tag_regex: Regex,
}

impl RssFeedSource {
    pub fn new(config: FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("paper-digest/0.1")
            .build()
            .map_err(|e| DigestError::Config {
                message: format!("Failed to build feed HTTP client: {}", e),
            })?;

        Ok(Self {
            config,
            client,
            doi_regex: Regex::new(r"10\.\d{4,9}/[^\s'\x22<>]+").expect("valid DOI regex"),
            html_tag_regex: Regex::new(r"<[^>]+>").expect("valid tag regex"),
        })
    }

    async fn download(&self) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(&self.config.url)
            .send()
            .await
            .map_err(|e| DigestError::Feed {
                source_name: self.config.name.clone(),
                details: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(DigestError::Feed {
                source_name: self.config.name.clone(),
                details: format!("HTTP {}", response.status()),
            });
        }

        let bytes = response.bytes().await.map_err(|e| DigestError::Feed {
            source_name: self.config.name.clone(),
            details: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    fn clean_text(&self, text: &str) -> String {
        let stripped = self.html_tag_regex.replace_all(text, " ");
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Pull a DOI out of the entry id or any of its links.
    fn extract_doi(&self, entry: &feed_rs::model::Entry) -> Option<String> {
        let mut haystacks = vec![entry.id.clone()];
        haystacks.extend(entry.links.iter().map(|l| l.href.clone()));

        for haystack in haystacks {
            if haystack.contains("doi.org/") || haystack.contains("/doi/") || haystack.starts_with("doi:")
            {
                if let Some(m) = self.doi_regex.find(&haystack) {
                    return Some(m.as_str().trim_end_matches('.').to_string());
                }
            }
        }
        None
    }

    /// Feed-native identifier: arXiv-style abstract ids for preprints,
    /// otherwise the namespaced tail of the entry id.
    fn native_id(&self, entry: &feed_rs::model::Entry) -> Option<String> {
        let id = entry.id.trim();
        if id.is_empty() {
            return None;
        }

        if let Some(tail) = id.split("/abs/").nth(1) {
            // Strip a trailing version suffix ("2403.12345v2" → "2403.12345")
            let tail = match tail.rsplit_once('v') {
                Some((head, version)) if !version.is_empty() && version.chars().all(|c| c.is_ascii_digit()) => head,
                _ => tail,
            };
            return Some(format!("arxiv:{}", tail));
        }

        let tail = id.rsplit('/').next().unwrap_or(id);
        Some(format!("{}:{}", self.config.key, tail))
    }

    /// Resolve a full-content reference from the entry's links.
    fn content_ref(&self, entry: &feed_rs::model::Entry, page_url: &str) -> Option<String> {
        for link in &entry.links {
            let is_pdf = link
                .media_type
                .as_deref()
                .map(|t| t.contains("pdf"))
                .unwrap_or(false)
                || link.href.to_lowercase().contains(".pdf");
            if is_pdf {
                return Some(link.href.clone());
            }
        }

        // Publisher-specific PDF conventions
        if page_url.contains("arxiv.org/abs/") {
            return Some(page_url.replace("/abs/", "/pdf/"));
        }
        if page_url.contains("nature.com") && page_url.contains("/articles/") {
            return Some(format!("{}.pdf", page_url));
        }
        if (page_url.contains("biorxiv.org") || page_url.contains("medrxiv.org"))
            && page_url.contains("/content/")
        {
            return Some(format!("{}.full.pdf", page_url.trim_end_matches('/')));
        }

        if page_url.is_empty() {
            None
        } else {
            Some(page_url.to_string())
        }
    }

    /// Journals mix research articles with news and commentary; skip the
    /// ones that mark the difference. Nature article ids starting with "d"
    /// are editorial content.
    fn is_research_article(&self, page_url: &str) -> bool {
        if let Some(tail) = page_url.split("nature.com/articles/").nth(1) {
            if tail.starts_with('d') {
                return false;
            }
        }
        true
    }

    fn parse_entry(&self, entry: &feed_rs::model::Entry, cutoff: NaiveDate) -> Option<RawRecord> {
        let title = entry
            .title
            .as_ref()
            .map(|t| self.clean_text(&t.content))
            .unwrap_or_default();
        if title.is_empty() {
            return None;
        }

        let page_url = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default();
        if !self.is_research_article(&page_url) {
            tracing::debug!(feed = %self.config.name, title = %title, "Skipping non-research entry");
            return None;
        }

        let published = entry
            .published
            .or(entry.updated)
            .unwrap_or_else(chrono::Utc::now);
        if published.date_naive() < cutoff {
            return None;
        }

        let abstract_text = entry
            .summary
            .as_ref()
            .map(|s| self.clean_text(&s.content))
            .unwrap_or_default();

        let authors: Vec<String> = entry
            .authors
            .iter()
            .map(|p| p.name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        Some(RawRecord {
            source: self.config.kind,
            feed: self.config.name.clone(),
            native_id: self.native_id(entry),
            doi: self.extract_doi(entry),
            title,
            abstract_text,
            authors,
            published,
            content_ref: self.content_ref(entry, &page_url),
            url: page_url,
        })
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> SourceKind {
        self.config.kind
    }

    async fn fetch(&self, cutoff: NaiveDate) -> Result<Vec<RawRecord>> {
        let bytes = self.download().await?;
        let feed = feed_rs::parser::parse(bytes.as_slice()).map_err(|e| DigestError::Feed {
            source_name: self.config.name.clone(),
            details: format!("parse error: {}", e),
        })?;

        let records: Vec<RawRecord> = feed
            .entries
            .iter()
            .take(self.config.max_items)
            .filter_map(|entry| self.parse_entry(entry, cutoff))
            .collect();

        tracing::debug!(
            feed = %self.config.name,
            entries = feed.entries.len(),
            accepted = records.len(),
            "Parsed feed"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(kind: SourceKind, key: &str) -> RssFeedSource {
        RssFeedSource::new(FeedConfig {
            name: key.to_string(),
            key: key.to_string(),
            url: "https://example.org/feed".to_string(),
            kind,
            enabled: true,
            max_items: 50,
        })
        .unwrap()
    }

    fn parse_feed(xml: &str) -> feed_rs::model::Feed {
        feed_rs::parser::parse(xml.as_bytes()).unwrap()
    }

    const ATOM_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>urn:example</id>
  <title>arXiv updates</title>
  <updated>2025-03-03T00:00:00Z</updated>
  <entry>
    <id>http://arxiv.org/abs/2403.12345v2</id>
    <title>Sparse  Attention,
      Revisited</title>
    <summary>&lt;p&gt;We revisit sparse attention.&lt;/p&gt;</summary>
    <author><name>Grace Hopper</name></author>
    <published>2025-03-03T00:00:00Z</published>
    <updated>2025-03-03T00:00:00Z</updated>
    <link href="http://arxiv.org/abs/2403.12345v2"/>
  </entry>
  <entry>
    <id>https://www.nature.com/articles/d41586-025-00001-1</id>
    <title>Editorial: funding news</title>
    <published>2025-03-03T00:00:00Z</published>
    <updated>2025-03-03T00:00:00Z</updated>
    <link href="https://www.nature.com/articles/d41586-025-00001-1"/>
  </entry>
  <entry>
    <id>https://doi.org/10.1038/s41586-025-1111-2</id>
    <title>A Journal Paper</title>
    <published>2020-01-01T00:00:00Z</published>
    <updated>2020-01-01T00:00:00Z</updated>
    <link href="https://www.nature.com/articles/s41586-025-1111-2"/>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_entry_normalizes_title_and_ids() {
        let src = source(SourceKind::Preprint, "arxiv");
        let feed = parse_feed(ATOM_FEED);
        let cutoff = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();

        let record = src.parse_entry(&feed.entries[0], cutoff).unwrap();
        assert_eq!(record.title, "Sparse Attention, Revisited");
        assert_eq!(record.abstract_text, "We revisit sparse attention.");
        assert_eq!(record.native_id.as_deref(), Some("arxiv:2403.12345"));
        assert_eq!(record.authors, vec!["Grace Hopper".to_string()]);
        assert_eq!(
            record.content_ref.as_deref(),
            Some("http://arxiv.org/pdf/2403.12345v2")
        );
    }

    #[test]
    fn test_editorial_entries_are_skipped() {
        let src = source(SourceKind::Journal, "nature");
        let feed = parse_feed(ATOM_FEED);
        let cutoff = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert!(src.parse_entry(&feed.entries[1], cutoff).is_none());
    }

    #[test]
    fn test_cutoff_filters_old_entries() {
        let src = source(SourceKind::Journal, "nature");
        let feed = parse_feed(ATOM_FEED);
        let cutoff = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        // Entry published in 2020 falls outside the window
        assert!(src.parse_entry(&feed.entries[2], cutoff).is_none());

        let old_cutoff = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
        let record = src.parse_entry(&feed.entries[2], old_cutoff).unwrap();
        assert_eq!(record.doi.as_deref(), Some("10.1038/s41586-025-1111-2"));
    }
}
