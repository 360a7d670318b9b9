//! # Numbering & Cross-Reference Assembler
//!
//! ## Purpose
//! Turns per-keyword result sets into a deterministically numbered report.
//! Within a group, results are ordered by quality score descending with the
//! canonical identity string as tie-break, and PaperNumber 1..k is assigned
//! in that order, exactly once. The number is persisted with the report and
//! is never recomputed from a consumer's display order, so narrative text
//! referencing "[2]" keeps pointing at the same paper under any later
//! sorting, filtering, or pagination.

use crate::report::{Report, ReportPaper};
use crate::AnalysisResult;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Order a keyword group deterministically: quality score descending,
/// ties broken by the canonical identity string ascending.
pub fn order_group(group: &mut Vec<AnalysisResult>) {
    group.sort_by(|a, b| {
        b.quality_score
            .cmp(&a.quality_score)
            .then_with(|| a.identity.as_str().cmp(b.identity.as_str()))
    });
}

/// Build the final report from ordered keyword groups. Given an identical
/// analysis set, repeated assembly produces identical numbering.
pub fn assemble(
    date: NaiveDate,
    total_papers: usize,
    matched_papers: usize,
    analyzed_papers: usize,
    keywords: &[String],
    summaries: BTreeMap<String, String>,
    groups: BTreeMap<String, Vec<AnalysisResult>>,
) -> Report {
    let mut papers_by_keyword = BTreeMap::new();

    for keyword in keywords {
        let mut group = groups.get(keyword).cloned().unwrap_or_default();
        order_group(&mut group);

        let rows: Vec<ReportPaper> = group
            .into_iter()
            .enumerate()
            .map(|(index, analysis)| to_row(index as u32 + 1, keyword, analysis))
            .collect();
        papers_by_keyword.insert(keyword.clone(), rows);
    }

    Report {
        date: date.format("%Y-%m-%d").to_string(),
        total_papers,
        matched_papers,
        analyzed_papers,
        keywords: keywords.to_vec(),
        summaries,
        papers_by_keyword,
    }
}

fn to_row(paper_number: u32, keyword: &str, analysis: AnalysisResult) -> ReportPaper {
    let keyword_note = analysis.keyword_notes.get(keyword).cloned();
    ReportPaper {
        paper_number,
        id: analysis.identity.into_string(),
        title: analysis.title,
        authors: analysis.authors,
        source: analysis.source,
        feed: analysis.feed,
        url: analysis.url,
        quality_score: analysis.quality_score,
        score_reason: analysis.score_reason,
        tldr: analysis.tldr,
        methodology: analysis.methodology,
        contributions: analysis.contributions,
        limitations: analysis.limitations,
        keyword_note,
        published: analysis.published,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityKey;
    use crate::SourceKind;
    use chrono::DateTime;

    fn analysis(id: &str, score: u8, keywords: &[&str]) -> AnalysisResult {
        AnalysisResult {
            identity: IdentityKey::from_canonical(id),
            title: format!("Paper {}", id),
            authors: vec!["Author".to_string()],
            source: SourceKind::Preprint,
            feed: "arxiv".to_string(),
            url: format!("https://example.org/{}", id),
            published: DateTime::from_timestamp(0, 0).unwrap(),
            matched_keywords: keywords.iter().map(|s| s.to_string()).collect(),
            tldr: String::new(),
            methodology: String::new(),
            contributions: Vec::new(),
            limitations: Vec::new(),
            keyword_notes: Default::default(),
            quality_score: score,
            score_reason: String::new(),
        }
    }

    fn assemble_group(results: Vec<AnalysisResult>) -> Report {
        let keywords = vec!["A".to_string()];
        let mut groups = BTreeMap::new();
        groups.insert("A".to_string(), results);
        let mut summaries = BTreeMap::new();
        summaries.insert("A".to_string(), "summary".to_string());
        let date = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        assemble(date, 10, 5, 4, &keywords, summaries, groups)
    }

    #[test]
    fn test_ordering_by_score_then_identity() {
        let report = assemble_group(vec![
            analysis("id:b", 7, &["A"]),
            analysis("id:a", 7, &["A"]),
            analysis("id:c", 9, &["A"]),
        ]);

        let rows = &report.papers_by_keyword["A"];
        assert_eq!(rows[0].id, "id:c");
        assert_eq!(rows[1].id, "id:a");
        assert_eq!(rows[2].id, "id:b");
        assert_eq!(
            rows.iter().map(|r| r.paper_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_assembly_is_deterministic_under_input_reordering() {
        let forward = assemble_group(vec![
            analysis("id:x", 5, &["A"]),
            analysis("id:y", 8, &["A"]),
            analysis("id:z", 6, &["A"]),
        ]);
        let shuffled = assemble_group(vec![
            analysis("id:z", 6, &["A"]),
            analysis("id:x", 5, &["A"]),
            analysis("id:y", 8, &["A"]),
        ]);

        assert_eq!(forward, shuffled);
    }

    #[test]
    fn test_numbers_survive_consumer_reordering() {
        let report = assemble_group(vec![
            analysis("id:x", 5, &["A"]),
            analysis("id:y", 8, &["A"]),
        ]);

        // A consumer sorting rows by title must still see the persisted numbers
        let mut display = report.papers_by_keyword["A"].clone();
        display.sort_by(|a, b| a.title.cmp(&b.title));
        let by_id: BTreeMap<&str, u32> = display
            .iter()
            .map(|r| (r.id.as_str(), r.paper_number))
            .collect();
        assert_eq!(by_id["id:y"], 1);
        assert_eq!(by_id["id:x"], 2);
    }

    #[test]
    fn test_keyword_without_papers_gets_empty_group() {
        let keywords = vec!["A".to_string(), "B".to_string()];
        let mut summaries = BTreeMap::new();
        summaries.insert("A".to_string(), "s".to_string());
        summaries.insert("B".to_string(), "placeholder".to_string());
        let mut groups = BTreeMap::new();
        groups.insert("A".to_string(), vec![analysis("id:x", 5, &["A"])]);

        let date = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let report = assemble(date, 1, 1, 1, &keywords, summaries, groups);

        assert!(report.papers_by_keyword["B"].is_empty());
        assert_eq!(report.summaries["B"], "placeholder");
    }
}
