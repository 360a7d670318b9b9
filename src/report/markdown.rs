//! # Markdown Rendering
//!
//! Renders a persisted report as a human-readable Markdown document. The
//! renderer only reads the numbering already embedded in the report; it
//! never renumbers.

use crate::report::Report;
use crate::SourceKind;
use std::fmt::Write as _;

/// Render a report as Markdown.
pub fn render(report: &Report) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Daily Paper Digest");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "**Date**: {} | **New papers**: {} | **Matched**: {} | **Analyzed**: {}",
        report.date, report.total_papers, report.matched_papers, report.analyzed_papers
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "---");

    for keyword in &report.keywords {
        let papers = report
            .papers_by_keyword
            .get(keyword)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let _ = writeln!(out);
        let _ = writeln!(out, "## {} ({} papers)", keyword, papers.len());

        if let Some(summary) = report.summaries.get(keyword) {
            if !summary.is_empty() {
                let _ = writeln!(out);
                let _ = writeln!(out, "> {}", summary);
            }
        }

        for paper in papers {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "### {}. [{}]({})",
                paper.paper_number, paper.title, paper.url
            );
            let _ = writeln!(out);

            let mut authors = paper.authors.iter().take(3).cloned().collect::<Vec<_>>();
            if paper.authors.len() > 3 {
                authors.push("et al.".to_string());
            }
            if !authors.is_empty() {
                let _ = writeln!(out, "**Authors**: {}  ", authors.join(", "));
            }

            let source_label = match paper.source {
                SourceKind::Preprint => format!("Preprint ({})", paper.feed),
                SourceKind::Journal => paper.feed.clone(),
            };
            let _ = writeln!(out, "**Source**: {}  ", source_label);
            let _ = writeln!(
                out,
                "**Score**: {}/10 ({})  ",
                paper.quality_score, paper.score_reason
            );

            if !paper.tldr.is_empty() {
                let _ = writeln!(out, "**TLDR**: {}", paper.tldr);
            }

            if !paper.contributions.is_empty() {
                let _ = writeln!(out);
                let _ = writeln!(out, "**Contributions:**");
                for contribution in paper.contributions.iter().take(3) {
                    let _ = writeln!(out, "- {}", contribution);
                }
            }

            if let Some(note) = &paper.keyword_note {
                if !note.is_empty() {
                    let _ = writeln!(out);
                    let _ = writeln!(out, "**Relevance**: {}", note);
                }
            }
        }

        if papers.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "*No papers in this area today*");
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "---");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "*Generated by paper-digest*");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportPaper;
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[test]
    fn test_render_uses_persisted_numbers() {
        let paper = ReportPaper {
            paper_number: 4,
            id: "id:x".to_string(),
            title: "A Paper".to_string(),
            authors: vec!["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()],
            source: SourceKind::Journal,
            feed: "Nature Medicine".to_string(),
            url: "https://example.org/x".to_string(),
            quality_score: 8,
            score_reason: "strong results".to_string(),
            tldr: "Does a thing.".to_string(),
            methodology: String::new(),
            contributions: vec!["First".to_string()],
            limitations: Vec::new(),
            keyword_note: Some("directly on topic".to_string()),
            published: Utc::now(),
        };

        let report = Report {
            date: "2025-03-03".to_string(),
            total_papers: 1,
            matched_papers: 1,
            analyzed_papers: 1,
            keywords: vec!["A".to_string(), "B".to_string()],
            summaries: BTreeMap::from([
                ("A".to_string(), "Field moved.".to_string()),
                ("B".to_string(), "No new papers in this area today.".to_string()),
            ]),
            papers_by_keyword: BTreeMap::from([
                ("A".to_string(), vec![paper]),
                ("B".to_string(), Vec::new()),
            ]),
        };

        let markdown = render(&report);
        assert!(markdown.contains("### 4. [A Paper](https://example.org/x)"));
        assert!(markdown.contains("A, B, C, et al."));
        assert!(markdown.contains("**Source**: Nature Medicine"));
        assert!(markdown.contains("*No papers in this area today*"));
    }
}
