//! Storage and similarity-index abstractions.
//!
//! The pipeline never talks to a concrete database or vector index:
//! persistence is an external collaborator reached through the [`Store`]
//! trait (create/read/update-by-id operations) and nearest-neighbor
//! search through [`SimilarityIndex`]. Implementations must be
//! `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`insert_chunks`](Store::insert_chunks) | Persist a document's chunks |
//! | [`attach_embedding`](Store::attach_embedding) | Attach a vector to a chunk |
//! | [`get_chunk`](Store::get_chunk) | Fetch one chunk by id |
//! | [`delete_document_chunks`](Store::delete_document_chunks) | Cascade delete |
//! | [`set_document_status`](Store::set_document_status) | Advance the ingestion state machine |
//! | [`insert_citation`](Store::insert_citation) | Persist an extracted citation |
//! | [`append_beat`](Store::append_beat) | Append a conversation beat |

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Beat, Chunk, Citation, Document, ProcessingStatus, Source};

/// One nearest-neighbor hit from the similarity index.
#[derive(Debug, Clone)]
pub struct SimilarityHit {
    pub chunk_id: String,
    /// Normalized cosine similarity in `[0, 1]`.
    pub similarity: f32,
}

/// Approximate nearest-neighbor search over chunk embeddings.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Up to `k` hits with similarity ≥ `min_similarity`, descending by
    /// similarity, optionally restricted to the given source ids.
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        min_similarity: f32,
        source_filter: Option<&[String]>,
    ) -> Result<Vec<SimilarityHit>>;
}

/// Row-store collaborator for chunks, documents, sources, citations,
/// and beats.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>>;

    /// Attach an embedding produced by `model` to an existing chunk.
    async fn attach_embedding(&self, chunk_id: &str, vector: &[f32], model: &str) -> Result<()>;

    /// Delete all chunks of a document (cascade on document deletion).
    async fn delete_document_chunks(&self, document_id: &str) -> Result<()>;

    async fn upsert_source(&self, source: &Source) -> Result<()>;

    async fn get_source(&self, id: &str) -> Result<Option<Source>>;

    async fn upsert_document(&self, document: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Record ingestion progress. `error` is retained when `status` is
    /// [`ProcessingStatus::Error`].
    async fn set_document_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()>;

    async fn insert_citation(&self, citation: &Citation) -> Result<()>;

    async fn get_citation(&self, id: &str) -> Result<Option<Citation>>;

    /// Record a validation score on an existing citation.
    async fn set_citation_validation(&self, id: &str, score: f32) -> Result<()>;

    async fn citations_for_episode(&self, episode_id: &str) -> Result<Vec<Citation>>;

    async fn citations_for_source(&self, source_id: &str) -> Result<Vec<Citation>>;

    async fn append_beat(&self, beat: &Beat) -> Result<()>;

    /// Beats of an episode in sequence order.
    async fn beats_for_episode(&self, episode_id: &str) -> Result<Vec<Beat>>;

    /// Next free sequence number for an episode (starts at 1).
    async fn next_beat_sequence(&self, episode_id: &str) -> Result<i64>;
}
