//! Context retrieval: query embedding, candidate search, and diversity
//! filtering.
//!
//! Overfetches `2 × max_chunks` candidates from the similarity index,
//! then keeps at most `max_per_document` chunks per document while
//! scanning in descending similarity, so one verbose document cannot
//! crowd out other sources.
//!
//! Returning fewer than `max_chunks` results — or none at all — is a
//! valid degraded outcome, never an error. Candidates whose chunk,
//! document, or source can no longer be loaded are skipped with a
//! warning.

use std::collections::HashMap;
use std::sync::Arc;

use chronicle_core::error::Result;
use chronicle_core::models::ContextChunk;
use chronicle_core::store::{SimilarityIndex, Store};

use crate::gateway::EmbeddingGateway;

pub struct ContextRetriever {
    gateway: Arc<EmbeddingGateway>,
    index: Arc<dyn SimilarityIndex>,
    store: Arc<dyn Store>,
    max_per_document: usize,
}

impl ContextRetriever {
    pub fn new(
        gateway: Arc<EmbeddingGateway>,
        index: Arc<dyn SimilarityIndex>,
        store: Arc<dyn Store>,
        max_per_document: usize,
    ) -> Self {
        Self {
            gateway,
            index,
            store,
            max_per_document,
        }
    }

    /// Retrieve up to `max_chunks` context chunks for a question.
    pub async fn retrieve(
        &self,
        query: &str,
        max_chunks: usize,
        similarity_threshold: f32,
        source_filter: Option<&[String]>,
    ) -> Result<Vec<ContextChunk>> {
        let query_vec = self.gateway.embed(query).await?;

        let mut hits = self
            .index
            .search(&query_vec, max_chunks * 2, similarity_threshold, source_filter)
            .await?;
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut selected: Vec<ContextChunk> = Vec::new();
        let mut per_document: HashMap<String, usize> = HashMap::new();

        for hit in hits {
            if selected.len() >= max_chunks {
                break;
            }

            let Some(chunk) = self.store.get_chunk(&hit.chunk_id).await? else {
                tracing::warn!(chunk_id = %hit.chunk_id, "candidate chunk missing, skipping");
                continue;
            };
            let count = per_document.entry(chunk.document_id.clone()).or_insert(0);
            if *count >= self.max_per_document {
                continue;
            }

            let Some(document) = self.store.get_document(&chunk.document_id).await? else {
                tracing::warn!(document_id = %chunk.document_id, "candidate document missing, skipping");
                continue;
            };
            let Some(source) = self.store.get_source(&document.source_id).await? else {
                tracing::warn!(source_id = %document.source_id, "candidate source missing, skipping");
                continue;
            };

            *count += 1;
            selected.push(ContextChunk {
                chunk,
                source,
                similarity: hit.similarity,
            });
        }

        tracing::debug!(
            selected = selected.len(),
            requested = max_chunks,
            "context retrieval complete"
        );
        Ok(selected)
    }
}
