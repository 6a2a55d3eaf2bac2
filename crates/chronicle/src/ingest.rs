//! Document ingestion: chunk, embed, persist.
//!
//! Drives one document through the processing state machine —
//! `pending → chunking → indexing → completed` — recording `error` with
//! a retained message on failure, so the durable status is never left
//! ambiguous. Multiple documents may ingest concurrently via
//! [`spawn_ingest`]; chunks within one document keep their stable
//! identity and sequence order regardless of embedding completion
//! order.

use std::sync::Arc;

use chronicle_core::chunker::{ChunkStrategy, Chunker};
use chronicle_core::error::Result;
use chronicle_core::models::{Chunk, Document, ProcessingStatus};
use chronicle_core::store::Store;

use crate::gateway::EmbeddingGateway;

/// Counters reported after a successful ingest.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub document_id: String,
    pub chunks_written: usize,
    pub embeddings_written: usize,
}

/// Ingest one document's text: chunk it, persist the chunks, embed them
/// in batches, and attach the vectors.
pub async fn ingest_document(
    store: Arc<dyn Store>,
    gateway: Arc<EmbeddingGateway>,
    chunker: &Chunker,
    strategy: ChunkStrategy,
    document: &Document,
    text: &str,
    batch_size: usize,
) -> Result<IngestOutcome> {
    store.upsert_document(document).await?;

    match run(&store, &gateway, chunker, strategy, document, text, batch_size).await {
        Ok(outcome) => {
            store
                .set_document_status(&document.id, ProcessingStatus::Completed, None)
                .await?;
            tracing::info!(
                document_id = %document.id,
                chunks = outcome.chunks_written,
                embeddings = outcome.embeddings_written,
                "document ingested"
            );
            Ok(outcome)
        }
        Err(e) => {
            let message = e.to_string();
            tracing::error!(document_id = %document.id, error = %message, "ingest failed");
            store
                .set_document_status(&document.id, ProcessingStatus::Error, Some(&message))
                .await?;
            Err(e)
        }
    }
}

async fn run(
    store: &Arc<dyn Store>,
    gateway: &Arc<EmbeddingGateway>,
    chunker: &Chunker,
    strategy: ChunkStrategy,
    document: &Document,
    text: &str,
    batch_size: usize,
) -> Result<IngestOutcome> {
    store
        .set_document_status(&document.id, ProcessingStatus::Chunking, None)
        .await?;

    let pieces = chunker.chunk(text, strategy);
    let chunks = build_chunks(&document.id, text, &pieces);
    store.insert_chunks(&chunks).await?;

    store
        .set_document_status(&document.id, ProcessingStatus::Indexing, None)
        .await?;

    let model = gateway.model_name();
    let mut embeddings_written = 0usize;
    let batch_size = batch_size.max(1);

    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = gateway.embed_batch(&texts).await?;
        for (chunk, vector) in batch.iter().zip(vectors) {
            store.attach_embedding(&chunk.id, &vector, &model).await?;
            embeddings_written += 1;
        }
    }

    Ok(IngestOutcome {
        document_id: document.id.clone(),
        chunks_written: chunks.len(),
        embeddings_written,
    })
}

/// Build chunk models with contiguous indices and best-effort character
/// offsets. Offsets are exact where the chunk text is a literal
/// substring of the document (fixed-window chunks); strategies that
/// normalize whitespace leave them unset.
fn build_chunks(document_id: &str, text: &str, pieces: &[String]) -> Vec<Chunk> {
    let mut chunks = Vec::with_capacity(pieces.len());
    let mut cursor = 0usize;

    for (index, piece) in pieces.iter().enumerate() {
        let span = text[cursor..].find(piece.as_str()).map(|rel| {
            let start = cursor + rel;
            // Overlapping chunks may start before the previous chunk's
            // end, but never before its start.
            cursor = start;
            (start, start + piece.len())
        });
        chunks.push(Chunk::from_text(document_id, index as i64, piece, span));
    }

    chunks
}

/// Run ingestion as a background task, decoupled from the caller.
pub fn spawn_ingest(
    store: Arc<dyn Store>,
    gateway: Arc<EmbeddingGateway>,
    chunker: Chunker,
    strategy: ChunkStrategy,
    document: Document,
    text: String,
    batch_size: usize,
) -> tokio::task::JoinHandle<Result<IngestOutcome>> {
    tokio::spawn(async move {
        ingest_document(store, gateway, &chunker, strategy, &document, &text, batch_size).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_chunks_offsets_and_indices() {
        let text = "alpha beta gamma delta";
        let pieces = vec!["alpha beta".to_string(), "beta gamma delta".to_string()];
        let chunks = build_chunks("doc1", text, &pieces);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[0].start_char, Some(0));
        assert_eq!(chunks[0].end_char, Some(10));
        // Overlapping second chunk starts inside the first.
        assert_eq!(chunks[1].start_char, Some(6));
    }

    #[test]
    fn test_build_chunks_missing_span_is_none() {
        let text = "first paragraph\n\nsecond paragraph";
        let pieces = vec!["first paragraph second paragraph".to_string()];
        let chunks = build_chunks("doc1", text, &pieces);
        assert_eq!(chunks[0].start_char, None);
        assert_eq!(chunks[0].end_char, None);
    }
}
