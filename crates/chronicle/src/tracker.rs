//! Citation tracking: persistence and aggregate accuracy statistics.
//!
//! Thin orchestration over the [`Store`] and the core validator. The
//! one invariant enforced here: every persisted citation references an
//! existing chunk — a citation whose chunk has vanished is dropped with
//! a warning rather than aborting the batch. Validation can run
//! synchronously per citation or deferred in bulk per episode.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use chronicle_core::citation::{validate_citation, ValidationPolicy, ValidationReport};
use chronicle_core::error::Result;
use chronicle_core::models::Citation;
use chronicle_core::store::Store;

pub struct CitationTracker {
    store: Arc<dyn Store>,
    policy: ValidationPolicy,
}

/// Aggregate citation report for one episode.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeReport {
    pub episode_id: String,
    pub total_citations: usize,
    pub valid_citations: usize,
    /// Share of citations whose validation score clears the threshold.
    pub valid_percentage: f32,
    pub average_accuracy: f32,
    pub sources_used: usize,
    pub source_breakdown: Vec<SourceUsage>,
}

/// Per-source usage within an episode report.
#[derive(Debug, Clone, Serialize)]
pub struct SourceUsage {
    pub source_id: String,
    pub title: String,
    pub author: Option<String>,
    pub reliability: f32,
    pub citation_count: usize,
}

/// Citation statistics for one source across all episodes.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub source_id: String,
    pub total_citations: usize,
    pub average_accuracy: f32,
    pub episodes_referenced: usize,
}

/// Outcome of a deferred bulk validation pass.
#[derive(Debug, Clone, Serialize)]
pub struct BulkValidation {
    pub episode_id: String,
    pub total_citations: usize,
    pub validated_citations: usize,
}

impl CitationTracker {
    pub fn new(store: Arc<dyn Store>, policy: ValidationPolicy) -> Self {
        Self { store, policy }
    }

    /// Persist citations for a response, linking them to their episode
    /// and beat. Returns the persisted citations; ones referencing a
    /// missing chunk are dropped.
    pub async fn track(
        &self,
        episode_id: &str,
        beat_id: Option<&str>,
        citations: Vec<Citation>,
    ) -> Result<Vec<Citation>> {
        let mut saved = Vec::with_capacity(citations.len());

        for mut citation in citations {
            if self.store.get_chunk(&citation.chunk_id).await?.is_none() {
                tracing::warn!(
                    chunk_id = %citation.chunk_id,
                    citation = %citation.citation_text,
                    "dropping citation referencing a missing chunk"
                );
                continue;
            }
            citation.episode_id = Some(episode_id.to_string());
            citation.beat_id = beat_id.map(str::to_string);
            self.store.insert_citation(&citation).await?;
            saved.push(citation);
        }

        tracing::info!(episode_id, tracked = saved.len(), "tracked citations");
        Ok(saved)
    }

    /// Validate one citation against the response text it appeared in,
    /// recording the accuracy score. A missing chunk/document/source
    /// yields a failed report, not an error.
    pub async fn validate(
        &self,
        citation: &Citation,
        response_text: &str,
    ) -> Result<ValidationReport> {
        let Some(chunk) = self.store.get_chunk(&citation.chunk_id).await? else {
            return Ok(ValidationReport::failed("source chunk not found"));
        };
        let Some(document) = self.store.get_document(&chunk.document_id).await? else {
            return Ok(ValidationReport::failed("source document not found"));
        };
        let Some(source) = self.store.get_source(&document.source_id).await? else {
            return Ok(ValidationReport::failed("source not found"));
        };

        let report = validate_citation(
            citation,
            response_text,
            &chunk.text,
            source.reliability,
            &self.policy,
        );
        self.store
            .set_citation_validation(&citation.id, report.accuracy_score)
            .await?;
        Ok(report)
    }

    /// Deferred validation of every citation in an episode against its
    /// beat's response text. Citations without a resolvable beat are
    /// skipped.
    pub async fn bulk_validate(&self, episode_id: &str) -> Result<BulkValidation> {
        let citations = self.store.citations_for_episode(episode_id).await?;
        let beats = self.store.beats_for_episode(episode_id).await?;
        let responses: HashMap<&str, &str> = beats
            .iter()
            .map(|b| (b.id.as_str(), b.response_text.as_str()))
            .collect();

        let mut validated = 0usize;
        for citation in &citations {
            let Some(response) = citation
                .beat_id
                .as_deref()
                .and_then(|id| responses.get(id).copied())
            else {
                continue;
            };
            self.validate(citation, response).await?;
            validated += 1;
        }

        Ok(BulkValidation {
            episode_id: episode_id.to_string(),
            total_citations: citations.len(),
            validated_citations: validated,
        })
    }

    /// Aggregate citation statistics for an episode.
    pub async fn episode_report(&self, episode_id: &str) -> Result<EpisodeReport> {
        let citations = self.store.citations_for_episode(episode_id).await?;

        if citations.is_empty() {
            return Ok(EpisodeReport {
                episode_id: episode_id.to_string(),
                total_citations: 0,
                valid_citations: 0,
                valid_percentage: 0.0,
                average_accuracy: 0.0,
                sources_used: 0,
                source_breakdown: Vec::new(),
            });
        }

        let total = citations.len();
        let valid = citations
            .iter()
            .filter(|c| c.validation_score.is_some_and(|s| s >= self.policy.accuracy_threshold))
            .count();
        let average_accuracy = citations
            .iter()
            .map(|c| c.validation_score.unwrap_or(0.0))
            .sum::<f32>()
            / total as f32;

        let mut breakdown: Vec<SourceUsage> = Vec::new();
        for citation in &citations {
            if let Some(usage) = breakdown.iter_mut().find(|u| u.source_id == citation.source_id) {
                usage.citation_count += 1;
                continue;
            }
            let (title, author, reliability) =
                match self.store.get_source(&citation.source_id).await? {
                    Some(s) => (s.title, s.author, s.reliability),
                    None => ("unknown".to_string(), None, 0.0),
                };
            breakdown.push(SourceUsage {
                source_id: citation.source_id.clone(),
                title,
                author,
                reliability,
                citation_count: 1,
            });
        }

        Ok(EpisodeReport {
            episode_id: episode_id.to_string(),
            total_citations: total,
            valid_citations: valid,
            valid_percentage: valid as f32 / total as f32 * 100.0,
            average_accuracy,
            sources_used: breakdown.len(),
            source_breakdown: breakdown,
        })
    }

    /// Citation statistics for one source across all episodes.
    pub async fn source_stats(&self, source_id: &str) -> Result<SourceStats> {
        let citations = self.store.citations_for_source(source_id).await?;

        if citations.is_empty() {
            return Ok(SourceStats {
                source_id: source_id.to_string(),
                total_citations: 0,
                average_accuracy: 0.0,
                episodes_referenced: 0,
            });
        }

        let total = citations.len();
        let average_accuracy = citations
            .iter()
            .map(|c| c.validation_score.unwrap_or(0.0))
            .sum::<f32>()
            / total as f32;
        let episodes: std::collections::HashSet<&str> = citations
            .iter()
            .filter_map(|c| c.episode_id.as_deref())
            .collect();

        Ok(SourceStats {
            source_id: source_id.to_string(),
            total_citations: total,
            average_accuracy,
            episodes_referenced: episodes.len(),
        })
    }
}
