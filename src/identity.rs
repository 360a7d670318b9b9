//! # Identity & Canonicalization Module
//!
//! ## Purpose
//! Derives a canonical fingerprint (`IdentityKey`) from a raw record so the
//! same underlying work is recognized across feeds, source types, and run
//! dates. Two records with equal keys denote the same work.
//!
//! ## Canonicalization Order
//! 1. DOI, normalized (scheme prefixes stripped, lowercased)
//! 2. Feed-native identifier, normalized
//! 3. Content fingerprint: UUIDv5 over the normalized title combined with
//!    the normalized first author
//!
//! Cross-source merging happens only on exact identifier equality or exact
//! equality of the normalized fingerprint; there is no fuzzy similarity
//! matching, which keeps `canonicalize` pure and input-order independent.

use crate::RawRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// Canonical fingerprint identifying one underlying work.
///
/// The inner string is the stable, persisted form; it doubles as the
/// deterministic tie-break key at assembly time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Rebuild a key from its persisted canonical form.
    pub fn from_canonical(s: impl Into<String>) -> Self {
        IdentityKey(s.into())
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the canonical identity for a raw record. Pure and deterministic.
pub fn canonicalize(record: &RawRecord) -> IdentityKey {
    if let Some(doi) = record.doi.as_deref() {
        let doi = normalize_doi(doi);
        if !doi.is_empty() {
            return IdentityKey(format!("doi:{}", doi));
        }
    }

    if let Some(native) = record.native_id.as_deref() {
        let native = native.trim().to_lowercase();
        if !native.is_empty() {
            return IdentityKey(format!("id:{}", native));
        }
    }

    let first_author = record.authors.first().map(String::as_str).unwrap_or("");
    IdentityKey(format!("work:{}", fingerprint(&record.title, first_author)))
}

/// Strip DOI resolver prefixes and lowercase.
fn normalize_doi(doi: &str) -> String {
    doi.trim()
        .trim_start_matches("https://doi.org/")
        .trim_start_matches("http://doi.org/")
        .trim_start_matches("doi:")
        .trim()
        .to_lowercase()
}

/// Normalize free text for fingerprinting: Unicode NFKC, case folding,
/// punctuation stripped, whitespace collapsed.
pub fn normalize_text(text: &str) -> String {
    let folded: String = text.nfkc().collect::<String>().to_lowercase();

    let mut out = String::with_capacity(folded.len());
    let mut pending_space = false;
    for ch in folded.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Stable content hash over the normalized (title, first author) pair.
fn fingerprint(title: &str, first_author: &str) -> Uuid {
    let material = format!("{}\n{}", normalize_text(title), normalize_text(first_author));
    Uuid::new_v5(&Uuid::NAMESPACE_OID, material.as_bytes())
}

/// Whether `candidate` should supersede `current` for display when both
/// collapse to the same identity within a run. Journal sightings carry
/// richer metadata than preprints; on a tie the longer abstract wins.
pub fn is_richer(candidate: &RawRecord, current: &RawRecord) -> bool {
    use crate::SourceKind;
    match (candidate.source, current.source) {
        (SourceKind::Journal, SourceKind::Preprint) => true,
        (SourceKind::Preprint, SourceKind::Journal) => false,
        _ => candidate.abstract_text.len() > current.abstract_text.len(),
    }
}
