//! Citation extraction, validation, and coverage measurement.
//!
//! Generated responses cite sources inline with markers of the form
//! `[Source: <free text>]` — ASCII brackets, the literal word `Source:`
//! followed by one space. The wire format is preserved bit-exact for
//! compatibility with previously generated text.
//!
//! Extraction matches each marker against the retrieved context and
//! scores the match; validation measures how well the cited chunk
//! supports the surrounding claim; coverage estimates what fraction of
//! factual claims in a response carry a citation.
//!
//! Unmatched markers and marker-free responses are expected outcomes,
//! never errors — they surface as lower coverage, not faults.

use std::collections::HashSet;

use serde::Serialize;

use crate::models::{Citation, ContextChunk};

/// Opening delimiter of a citation marker. Wire format — do not change.
pub const MARKER_OPEN: &str = "[Source: ";
/// Closing delimiter of a citation marker.
pub const MARKER_CLOSE: char = ']';

/// Match-score awarded when the marker and source title contain each
/// other (either direction).
const TITLE_SCORE: u32 = 2;
/// Match-score awarded when the source author appears in the marker.
const AUTHOR_SCORE: u32 = 1;
/// Divisor turning a match score into a confidence in `[0, 1]`.
const CONFIDENCE_SCALE: f32 = 3.0;

/// Characters of response text taken on each side of a marker when
/// reconstructing the claim a citation supports.
const CLAIM_WINDOW: usize = 200;

/// Accuracy weights. They sum to 1.0; the final score is clamped anyway.
const SIMILARITY_WEIGHT: f32 = 0.4;
const QUOTE_WEIGHT: f32 = 0.3;
const RELIABILITY_WEIGHT: f32 = 0.2;
const CONFIDENCE_WEIGHT: f32 = 0.1;

/// Words whose presence marks a sentence as a factual claim.
const CLAIM_INDICATORS: &[&str] = &[
    "in", "on", "during", "said", "wrote", "declared", "signed", "passed", "enacted",
    "established", "born", "died", "elected", "appointed",
];

/// Tunable validation thresholds. These are policy, not invariants: the
/// defaults are carried over from the system this replaces and have no
/// empirical justification beyond that corpus.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationPolicy {
    /// Minimum accuracy score for a citation to count as valid.
    pub accuracy_threshold: f32,
    /// Minimum coverage percentage for a response to meet requirements.
    pub coverage_requirement: f32,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            accuracy_threshold: 0.7,
            coverage_requirement: 90.0,
        }
    }
}

/// Outcome of validating a single citation against its source chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub accuracy_score: f32,
    pub similarity: f32,
    pub quote_match: bool,
    pub source_reliability: f32,
    pub claim_context: String,
}

impl ValidationReport {
    /// Report for a citation whose chunk no longer exists.
    pub fn failed(reason: &str) -> Self {
        Self {
            valid: false,
            accuracy_score: 0.0,
            similarity: 0.0,
            quote_match: false,
            source_reliability: 0.0,
            claim_context: reason.to_string(),
        }
    }
}

/// Per-response citation coverage figures.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    pub total_sentences: usize,
    pub factual_claims: usize,
    pub citation_count: usize,
    /// Always in `[0, 100]`.
    pub coverage_pct: f32,
    pub meets_requirement: bool,
    pub missing_citations: usize,
}

/// Scan `response_text` for citation markers and match each against the
/// retrieved context.
///
/// Per marker, every context chunk's source is scored: +2 when marker
/// and title contain each other case-insensitively, +1 when the author's
/// name appears in the marker. The best-scoring chunk wins, ties broken
/// by retrieval order (first seen). Markers scoring zero are silently
/// skipped. Confidence = `min(score / 3, 1)`.
pub fn extract_citations(response_text: &str, context: &[ContextChunk]) -> Vec<Citation> {
    let mut citations = Vec::new();

    for marker in find_markers(response_text) {
        let marker_lower = marker.to_lowercase();
        let mut best: Option<(&ContextChunk, u32)> = None;

        for cc in context {
            let mut score = 0u32;
            let title_lower = cc.source.title.to_lowercase();
            if !title_lower.is_empty()
                && (title_lower.contains(&marker_lower) || marker_lower.contains(&title_lower))
            {
                score += TITLE_SCORE;
            }
            if let Some(author) = &cc.source.author {
                let author_lower = author.to_lowercase();
                if !author_lower.trim().is_empty() && marker_lower.contains(&author_lower) {
                    score += AUTHOR_SCORE;
                }
            }
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((cc, score));
            }
        }

        if let Some((cc, score)) = best {
            let confidence = (score as f32 / CONFIDENCE_SCALE).min(1.0);
            let mut citation = Citation::new(cc, marker, confidence);
            let _ = citation.metadata.set("extraction_method", "pattern_matching");
            let _ = citation.metadata.set("original_text", marker);
            citations.push(citation);
        }
    }

    citations
}

/// All marker inner texts in order of appearance. Unterminated markers
/// are ignored.
fn find_markers(text: &str) -> Vec<&str> {
    let mut markers = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find(MARKER_OPEN) {
        let inner_start = open + MARKER_OPEN.len();
        match rest[inner_start..].find(MARKER_CLOSE) {
            Some(close) => {
                markers.push(&rest[inner_start..inner_start + close]);
                rest = &rest[inner_start + close + 1..];
            }
            None => break,
        }
    }
    markers
}

/// Validate that a citation's chunk actually supports the claim made
/// around it in the response.
///
/// The claim context is the response text within 200 characters of the
/// marker (clipped to bounds; empty when the marker is absent, which
/// should not occur for extractor-produced citations). Accuracy is the
/// weighted sum of word-set similarity, direct-quote presence, source
/// reliability, and extraction confidence, clamped to 1.0.
pub fn validate_citation(
    citation: &Citation,
    response_text: &str,
    chunk_text: &str,
    source_reliability: f32,
    policy: &ValidationPolicy,
) -> ValidationReport {
    let claim_context = extract_claim_context(response_text, &citation.citation_text);
    let similarity = word_set_similarity(&claim_context, chunk_text);
    let quote_match = has_direct_quote(&claim_context, chunk_text);

    let quote_score = if quote_match { 1.0 } else { 0.0 };
    let accuracy = (SIMILARITY_WEIGHT * similarity
        + QUOTE_WEIGHT * quote_score
        + RELIABILITY_WEIGHT * source_reliability
        + CONFIDENCE_WEIGHT * citation.confidence)
        .min(1.0);

    ValidationReport {
        valid: accuracy >= policy.accuracy_threshold,
        accuracy_score: accuracy,
        similarity,
        quote_match,
        source_reliability,
        claim_context,
    }
}

/// Response text within [`CLAIM_WINDOW`] characters of the citation's
/// marker. Empty when the marker is not found verbatim.
fn extract_claim_context(response_text: &str, citation_text: &str) -> String {
    let marker = format!("{MARKER_OPEN}{citation_text}{MARKER_CLOSE}");
    let Some(pos) = response_text.find(&marker) else {
        return String::new();
    };

    let start = snap_back(response_text, pos.saturating_sub(CLAIM_WINDOW));
    let end = snap_back(
        response_text,
        (pos + marker.len() + CLAIM_WINDOW).min(response_text.len()),
    );
    response_text[start..end].trim().to_string()
}

fn snap_back(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Jaccard similarity of the lower-cased word sets of two texts.
/// 0.0 when either set is empty.
fn word_set_similarity(a: &str, b: &str) -> f32 {
    let set_a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let set_b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();

    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f32 / union as f32
}

/// True when any double-quoted substring of the claim appears in the
/// chunk text, case-insensitively.
fn has_direct_quote(claim: &str, chunk_text: &str) -> bool {
    let chunk_lower = chunk_text.to_lowercase();
    let mut rest = claim;
    while let Some(open) = rest.find('"') {
        let inner = &rest[open + 1..];
        match inner.find('"') {
            Some(close) => {
                let quoted = &inner[..close];
                if !quoted.is_empty() && chunk_lower.contains(&quoted.to_lowercase()) {
                    return true;
                }
                rest = &inner[close + 1..];
            }
            None => break,
        }
    }
    false
}

/// Measure citation coverage of a response.
///
/// Sentences are split on periods; a sentence is a factual claim when it
/// contains any claim-indicator word. `coverage_pct` is always within
/// `[0, 100]` regardless of extremes (including zero factual claims).
pub fn coverage(
    response_text: &str,
    citation_count: usize,
    policy: &ValidationPolicy,
) -> CoverageReport {
    let sentences: Vec<&str> = response_text.split('.').collect();
    let factual_claims = sentences.iter().filter(|s| is_factual_claim(s)).count();

    let coverage_pct =
        (citation_count as f32 / factual_claims.max(1) as f32).min(1.0) * 100.0;

    CoverageReport {
        total_sentences: sentences.len(),
        factual_claims,
        citation_count,
        coverage_pct,
        meets_requirement: coverage_pct >= policy.coverage_requirement,
        missing_citations: factual_claims.saturating_sub(citation_count),
    }
}

/// Whole-word match against the claim-indicator lexicon.
fn is_factual_claim(sentence: &str) -> bool {
    sentence
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .any(|w| CLAIM_INDICATORS.contains(&w.as_str()))
}
