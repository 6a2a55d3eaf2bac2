//! Core data models used throughout Chronicle.
//!
//! These types represent the chunks, sources, documents, citations, and
//! conversation beats that flow through the ingestion and answer pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{ChronicleError, Result};

/// A bounded, contiguous span of a document's text — the unit of
/// retrieval and citation.
///
/// Created once during ingestion. The embedding may be attached
/// asynchronously after creation; nothing else is ever mutated. Chunks
/// are destroyed together with their parent document.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Contiguous, strictly increasing within a document, starting at 0.
    pub chunk_index: i64,
    pub text: String,
    /// Character offset into the parent document. Best-effort: exact for
    /// fixed-window chunks, absent where whitespace was normalized.
    pub start_char: Option<usize>,
    pub end_char: Option<usize>,
    pub word_count: usize,
    pub char_count: usize,
    /// SHA-256 of the chunk text, for embedding staleness detection.
    pub hash: String,
    pub embedding: Option<Vec<f32>>,
    /// Identifier of the model that produced `embedding`.
    pub embedding_model: Option<String>,
}

impl Chunk {
    /// Build a chunk from its text, deriving word/char counts and the
    /// content hash. The embedding is attached later by the ingest flow.
    pub fn from_text(
        document_id: &str,
        chunk_index: i64,
        text: &str,
        span: Option<(usize, usize)>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let hash = format!("{:x}", hasher.finalize());

        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            chunk_index,
            text: text.to_string(),
            start_char: span.map(|(s, _)| s),
            end_char: span.map(|(_, e)| e),
            word_count: text.split_whitespace().count(),
            char_count: text.chars().count(),
            hash,
            embedding: None,
            embedding_model: None,
        }
    }
}

/// Provenance metadata for a curated source, consumed read-only by the
/// pipeline (prompt rendering and citation scoring).
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    /// book, letter, speech, newspaper, …
    pub source_type: String,
    /// Curator-assigned credibility in `[0, 1]`. A scoring input, not
    /// independently verified.
    pub reliability: f32,
}

/// Processing state of a document moving through ingestion.
///
/// `pending → chunking → indexing → completed`, or `→ error` from any
/// stage. The status is the durable record of ingestion progress; a
/// failure is recorded as `Error` with a retained message, never left
/// as an ambiguous in-progress state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Chunking,
    Indexing,
    Completed,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Chunking => "chunking",
            ProcessingStatus::Indexing => "indexing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Error => "error",
        }
    }
}

/// A single ingested document belonging to a source.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub source_id: String,
    pub title: Option<String>,
    pub status: ProcessingStatus,
    /// Retained when `status` is [`ProcessingStatus::Error`].
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(source_id: &str, title: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            title: title.map(str::to_string),
            status: ProcessingStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A retrieved chunk paired with its source and similarity score.
///
/// Ephemeral: exists only for the duration of one retrieval call, then
/// flows into prompt assembly and citation matching.
#[derive(Debug, Clone, Serialize)]
pub struct ContextChunk {
    pub chunk: Chunk,
    pub source: Source,
    /// Normalized cosine similarity in `[0, 1]`.
    pub similarity: f32,
}

/// A citation extracted from generated text, linking a factual claim
/// back to the chunk that supports it.
///
/// Created by the extractor at generation time; the validation score is
/// filled in by the validator (synchronously or deferred). Never mutated
/// after validation except for the validation fields.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub id: String,
    pub chunk_id: String,
    pub document_id: String,
    pub source_id: String,
    /// Literal marker text as it appeared between `[Source: ` and `]`.
    pub citation_text: String,
    /// Match quality against the retrieved chunk, in `[0, 1]`.
    pub confidence: f32,
    /// Claim-support quality, in `[0, 1]`, set by the validator.
    pub validation_score: Option<f32>,
    pub episode_id: Option<String>,
    pub beat_id: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Citation {
    pub fn new(context: &ContextChunk, citation_text: &str, confidence: f32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chunk_id: context.chunk.id.clone(),
            document_id: context.chunk.document_id.clone(),
            source_id: context.source.id.clone(),
            citation_text: citation_text.to_string(),
            confidence,
            validation_score: None,
            episode_id: None,
            beat_id: None,
            metadata: Metadata::for_citation(),
            created_at: Utc::now(),
        }
    }
}

/// One exchange within an episode: the user message, the generated
/// response, and response-level bookkeeping. Append-only, ordered by
/// `sequence_number` per episode.
#[derive(Debug, Clone, Serialize)]
pub struct Beat {
    pub id: String,
    pub episode_id: String,
    pub sequence_number: i64,
    pub user_message: String,
    pub response_text: String,
    pub citation_count: usize,
    pub response_time_ms: Option<u64>,
    pub token_count: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl Beat {
    pub fn new(episode_id: &str, sequence_number: i64, user_message: &str, response_text: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            episode_id: episode_id.to_string(),
            sequence_number,
            user_message: user_message.to_string(),
            response_text: response_text.to_string(),
            citation_count: 0,
            response_time_ms: None,
            token_count: None,
            created_at: Utc::now(),
        }
    }
}

/// Recognized metadata keys for [`Citation`] entries.
pub const CITATION_METADATA_KEYS: &[&str] =
    &["extraction_method", "original_text", "validation_timestamp"];

/// Recognized metadata keys for [`Beat`] entries.
pub const BEAT_METADATA_KEYS: &[&str] =
    &["citation_count", "average_citation_accuracy", "last_citation_update"];

/// Current metadata schema version.
pub const METADATA_VERSION: u32 = 1;

/// Typed, versioned key-value metadata attached to citations and beats.
///
/// Each entity declares its recognized key set. `set` rejects unknown
/// keys; bulk construction via [`Metadata::from_entries`] silently drops
/// them instead, so stored data from older schema versions loads without
/// failing.
#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub version: u32,
    #[serde(skip)]
    allowed: &'static [&'static str],
    entries: BTreeMap<String, String>,
}

impl Metadata {
    pub fn for_citation() -> Self {
        Self {
            version: METADATA_VERSION,
            allowed: CITATION_METADATA_KEYS,
            entries: BTreeMap::new(),
        }
    }

    pub fn for_beat() -> Self {
        Self {
            version: METADATA_VERSION,
            allowed: BEAT_METADATA_KEYS,
            entries: BTreeMap::new(),
        }
    }

    /// Set a recognized key. Unrecognized keys are rejected with
    /// [`ChronicleError::InvalidInput`].
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        if !self.allowed.contains(&key) {
            return Err(ChronicleError::InvalidInput(format!(
                "unrecognized metadata key: {key}"
            )));
        }
        self.entries.insert(key.to_string(), value.into());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Build from stored entries, dropping unrecognized keys.
    pub fn from_entries<I, K, V>(allowed: &'static [&'static str], entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| allowed.contains(&k.as_str()))
            .collect();
        Self {
            version: METADATA_VERSION,
            allowed,
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_from_text_stats() {
        let c = Chunk::from_text("doc1", 0, "Four score and seven", Some((0, 20)));
        assert_eq!(c.word_count, 4);
        assert_eq!(c.char_count, 20);
        assert_eq!(c.start_char, Some(0));
        assert_eq!(c.end_char, Some(20));
        assert!(c.embedding.is_none());
        assert_eq!(c.hash.len(), 64);
    }

    #[test]
    fn test_chunk_hash_is_content_addressed() {
        let a = Chunk::from_text("doc1", 0, "same text", None);
        let b = Chunk::from_text("doc2", 5, "same text", None);
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_metadata_rejects_unknown_key() {
        let mut m = Metadata::for_citation();
        assert!(m.set("extraction_method", "pattern_matching").is_ok());
        let err = m.set("favorite_color", "blue").unwrap_err();
        assert!(matches!(err, ChronicleError::InvalidInput(_)));
        assert_eq!(m.get("extraction_method"), Some("pattern_matching"));
    }

    #[test]
    fn test_metadata_from_entries_drops_unknown() {
        let m = Metadata::from_entries(
            CITATION_METADATA_KEYS,
            [("original_text", "x"), ("bogus", "y")],
        );
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("original_text"), Some("x"));
        assert!(m.get("bogus").is_none());
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(ProcessingStatus::Pending.as_str(), "pending");
        assert_eq!(ProcessingStatus::Error.as_str(), "error");
    }
}
