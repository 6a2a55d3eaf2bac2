//! In-memory [`Store`] and [`SimilarityIndex`] implementation.
//!
//! Backs tests and the CLI demo. Uses `HashMap`/`Vec` behind
//! `std::sync::RwLock`; vector search is brute-force cosine similarity
//! over all embedded chunks.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{ChronicleError, Result};
use crate::models::{Beat, Chunk, Citation, Document, ProcessingStatus, Source};

use super::{SimilarityHit, SimilarityIndex, Store};

/// In-memory store for tests and single-process use.
#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<HashMap<String, Chunk>>,
    sources: RwLock<HashMap<String, Source>>,
    documents: RwLock<HashMap<String, Document>>,
    citations: RwLock<Vec<Citation>>,
    beats: RwLock<Vec<Beat>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut stored = self.chunks.write().unwrap();
        for chunk in chunks {
            stored.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        Ok(self.chunks.read().unwrap().get(id).cloned())
    }

    async fn attach_embedding(&self, chunk_id: &str, vector: &[f32], model: &str) -> Result<()> {
        let mut stored = self.chunks.write().unwrap();
        let chunk = stored
            .get_mut(chunk_id)
            .ok_or_else(|| ChronicleError::NotFound(format!("chunk {chunk_id}")))?;
        chunk.embedding = Some(vector.to_vec());
        chunk.embedding_model = Some(model.to_string());
        Ok(())
    }

    async fn delete_document_chunks(&self, document_id: &str) -> Result<()> {
        self.chunks
            .write()
            .unwrap()
            .retain(|_, c| c.document_id != document_id);
        Ok(())
    }

    async fn upsert_source(&self, source: &Source) -> Result<()> {
        self.sources
            .write()
            .unwrap()
            .insert(source.id.clone(), source.clone());
        Ok(())
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        Ok(self.sources.read().unwrap().get(id).cloned())
    }

    async fn upsert_document(&self, document: &Document) -> Result<()> {
        self.documents
            .write()
            .unwrap()
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.documents.read().unwrap().get(id).cloned())
    }

    async fn set_document_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut docs = self.documents.write().unwrap();
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| ChronicleError::NotFound(format!("document {id}")))?;
        doc.status = status;
        doc.error_message = error.map(str::to_string);
        doc.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn insert_citation(&self, citation: &Citation) -> Result<()> {
        self.citations.write().unwrap().push(citation.clone());
        Ok(())
    }

    async fn get_citation(&self, id: &str) -> Result<Option<Citation>> {
        Ok(self
            .citations
            .read()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn set_citation_validation(&self, id: &str, score: f32) -> Result<()> {
        let mut citations = self.citations.write().unwrap();
        let citation = citations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ChronicleError::NotFound(format!("citation {id}")))?;
        citation.validation_score = Some(score);
        Ok(())
    }

    async fn citations_for_episode(&self, episode_id: &str) -> Result<Vec<Citation>> {
        Ok(self
            .citations
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.episode_id.as_deref() == Some(episode_id))
            .cloned()
            .collect())
    }

    async fn citations_for_source(&self, source_id: &str) -> Result<Vec<Citation>> {
        Ok(self
            .citations
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.source_id == source_id)
            .cloned()
            .collect())
    }

    async fn append_beat(&self, beat: &Beat) -> Result<()> {
        self.beats.write().unwrap().push(beat.clone());
        Ok(())
    }

    async fn beats_for_episode(&self, episode_id: &str) -> Result<Vec<Beat>> {
        let mut beats: Vec<Beat> = self
            .beats
            .read()
            .unwrap()
            .iter()
            .filter(|b| b.episode_id == episode_id)
            .cloned()
            .collect();
        beats.sort_by_key(|b| b.sequence_number);
        Ok(beats)
    }

    async fn next_beat_sequence(&self, episode_id: &str) -> Result<i64> {
        let max = self
            .beats
            .read()
            .unwrap()
            .iter()
            .filter(|b| b.episode_id == episode_id)
            .map(|b| b.sequence_number)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }
}

#[async_trait]
impl SimilarityIndex for InMemoryStore {
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        min_similarity: f32,
        source_filter: Option<&[String]>,
    ) -> Result<Vec<SimilarityHit>> {
        let documents = self.documents.read().unwrap();
        let chunks = self.chunks.read().unwrap();

        let mut hits: Vec<SimilarityHit> = chunks
            .values()
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_ref()?;
                if let Some(filter) = source_filter {
                    let source_id = documents.get(&chunk.document_id).map(|d| &d.source_id)?;
                    if !filter.contains(source_id) {
                        return None;
                    }
                }
                let similarity = cosine_similarity(vector, embedding).ok()?;
                if similarity < min_similarity {
                    return None;
                }
                Some(SimilarityHit {
                    chunk_id: chunk.id.clone(),
                    similarity,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}
