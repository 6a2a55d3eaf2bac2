//! End-to-end pipeline tests over the in-memory store with scripted
//! embedding and language-model doubles.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use chronicle::gateway::{EmbeddingGateway, GatewayLimits};
use chronicle::generator::{LanguageModel, ResponseStream, StreamEvent};
use chronicle::ingest::ingest_document;
use chronicle::pipeline::{AskRequest, PipelineEvent, PipelineParams, RagPipeline};
use chronicle::retriever::ContextRetriever;
use chronicle::tracker::CitationTracker;
use chronicle_core::chunker::{ChunkStrategy, Chunker};
use chronicle_core::citation::ValidationPolicy;
use chronicle_core::embedding::EmbeddingModel;
use chronicle_core::error::{ChronicleError, Result};
use chronicle_core::models::{Chunk, Document, ProcessingStatus, Source};
use chronicle_core::prompt::{ChatMessage, DEFAULT_PERSONA_PROMPT};
use chronicle_core::store::memory::InMemoryStore;
use chronicle_core::store::Store;

/// Keyword-count embedder: deterministic, meaningful cosine geometry.
struct BagEmbedder {
    vocab: Vec<&'static str>,
}

impl BagEmbedder {
    fn lincoln() -> Self {
        Self {
            vocab: vec![
                "lincoln",
                "born",
                "1809",
                "kentucky",
                "war",
                "battle",
                "gettysburg",
            ],
        }
    }
}

#[async_trait]
impl EmbeddingModel for BagEmbedder {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }
    fn dims(&self) -> usize {
        self.vocab.len()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                let words: Vec<String> = lower
                    .split_whitespace()
                    .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
                    .collect();
                self.vocab
                    .iter()
                    .map(|v| words.iter().filter(|w| w == v).count() as f32)
                    .collect()
            })
            .collect())
    }
}

/// Embedder that always fails, for the ingest error path.
struct FailingEmbedder;

#[async_trait]
impl EmbeddingModel for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(ChronicleError::Upstream("embedding backend down".into()))
    }
}

/// Chat model returning a fixed response; streams it in three deltas.
struct ScriptedChat {
    response: String,
}

#[async_trait]
impl LanguageModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        Ok(self.response.clone())
    }

    async fn stream(&self, _messages: &[ChatMessage]) -> Result<ResponseStream> {
        let (tx, rx) = mpsc::channel(8);
        let response = self.response.clone();
        tokio::spawn(async move {
            let third = response.len() / 3;
            let mut cuts = vec![0, third, 2 * third, response.len()];
            cuts.dedup();
            for pair in cuts.windows(2) {
                let mut end = pair[1];
                while end < response.len() && !response.is_char_boundary(end) {
                    end += 1;
                }
                let mut start = pair[0];
                while start < response.len() && !response.is_char_boundary(start) {
                    start += 1;
                }
                if start < end {
                    let _ = tx.send(StreamEvent::Delta(response[start..end].to_string())).await;
                }
            }
            let _ = tx.send(StreamEvent::Done).await;
        });
        Ok(ResponseStream::new(rx))
    }
}

/// Chat model whose stream dies after one delta.
struct FailingStreamChat;

#[async_trait]
impl LanguageModel for FailingStreamChat {
    fn model_name(&self) -> &str {
        "failing-stream"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        Err(ChronicleError::Upstream("model unavailable".into()))
    }

    async fn stream(&self, _messages: &[ChatMessage]) -> Result<ResponseStream> {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            let _ = tx.send(StreamEvent::Delta("Lincoln ".to_string())).await;
            let _ = tx
                .send(StreamEvent::Error(ChronicleError::Upstream(
                    "connection reset".into(),
                )))
                .await;
        });
        Ok(ResponseStream::new(rx))
    }
}

fn gateway(model: Arc<dyn EmbeddingModel>) -> Arc<EmbeddingGateway> {
    Arc::new(EmbeddingGateway::new(
        model,
        GatewayLimits {
            max_requests_per_minute: 1000,
            max_tokens_per_minute: 1_000_000.0,
            cache_ttl: std::time::Duration::from_secs(600),
        },
    ))
}

async fn seed_source(
    store: &Arc<InMemoryStore>,
    title: &str,
    reliability: f32,
    text: &str,
    gw: &Arc<EmbeddingGateway>,
) -> (Source, Document) {
    let source = Source {
        id: uuid::Uuid::new_v4().to_string(),
        title: title.to_string(),
        author: None,
        source_type: "book".to_string(),
        reliability,
    };
    store.upsert_source(&source).await.unwrap();

    let document = Document::new(&source.id, Some(title));
    let chunker = Chunker::new(200, 20);
    let dyn_store: Arc<dyn Store> = store.clone();
    ingest_document(
        dyn_store,
        gw.clone(),
        &chunker,
        ChunkStrategy::SentenceAware,
        &document,
        text,
        16,
    )
    .await
    .unwrap();
    (source, document)
}

struct Fixture {
    store: Arc<InMemoryStore>,
    pipeline: Arc<RagPipeline>,
}

async fn fixture(chat: Arc<dyn LanguageModel>) -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let gw = gateway(Arc::new(BagEmbedder::lincoln()));

    seed_source(
        &store,
        "Lincoln Biography",
        0.9,
        "Lincoln was born in 1809 in Kentucky. Lincoln grew up on the frontier. \
         Lincoln taught himself the law.",
        &gw,
    )
    .await;
    seed_source(
        &store,
        "War Records",
        0.8,
        "The battle at Gettysburg turned the war. The war ended in 1865.",
        &gw,
    )
    .await;

    let policy = ValidationPolicy::default();
    let retriever = ContextRetriever::new(gw.clone(), store.clone(), store.clone(), 3);
    let tracker = CitationTracker::new(store.clone(), policy.clone());
    let params = PipelineParams {
        max_chunks: 5,
        similarity_threshold: 0.1,
        history_turns: 5,
        system_prompt: DEFAULT_PERSONA_PROMPT.to_string(),
    };
    let pipeline = Arc::new(RagPipeline::new(
        retriever,
        chat,
        tracker,
        store.clone(),
        gw,
        policy,
        params,
    ));

    Fixture { store, pipeline }
}

const SCRIPTED_RESPONSE: &str =
    "Lincoln was born in 1809 [Source: Lincoln Biography, p.12]. He later became President.";

#[tokio::test]
async fn test_ask_end_to_end() {
    let fx = fixture(Arc::new(ScriptedChat {
        response: SCRIPTED_RESPONSE.to_string(),
    }))
    .await;

    let response = fx
        .pipeline
        .ask(&AskRequest::question("When was Lincoln born?"))
        .await
        .unwrap();

    assert_eq!(response.response_text, SCRIPTED_RESPONSE);
    assert!(response.context_chunks_used > 0);
    assert_eq!(response.citations.len(), 1);
    assert_eq!(response.citations[0].citation_text, "Lincoln Biography, p.12");
    assert!((response.citations[0].confidence - 2.0 / 3.0).abs() < 1e-6);
    assert!(response.coverage.coverage_pct > 0.0);
    assert_eq!(response.model, "scripted");
}

#[tokio::test]
async fn test_ask_records_beat_and_citations() {
    let fx = fixture(Arc::new(ScriptedChat {
        response: SCRIPTED_RESPONSE.to_string(),
    }))
    .await;

    let mut request = AskRequest::question("When was Lincoln born?");
    request.episode_id = Some("ep1".to_string());
    fx.pipeline.ask(&request).await.unwrap();

    let beats = fx.store.beats_for_episode("ep1").await.unwrap();
    assert_eq!(beats.len(), 1);
    assert_eq!(beats[0].sequence_number, 1);
    assert_eq!(beats[0].citation_count, 1);
    assert!(beats[0].response_time_ms.is_some());

    let citations = fx.store.citations_for_episode("ep1").await.unwrap();
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0].beat_id.as_deref(), Some(beats[0].id.as_str()));

    // A second ask appends the next beat in sequence.
    fx.pipeline.ask(&request).await.unwrap();
    let beats = fx.store.beats_for_episode("ep1").await.unwrap();
    assert_eq!(beats.len(), 2);
    assert_eq!(beats[1].sequence_number, 2);
}

#[tokio::test]
async fn test_stream_deltas_and_completion_match_batch() {
    let fx = fixture(Arc::new(ScriptedChat {
        response: SCRIPTED_RESPONSE.to_string(),
    }))
    .await;

    let mut rx = fx
        .pipeline
        .clone()
        .ask_stream(AskRequest::question("When was Lincoln born?"));

    let mut streamed = String::new();
    let mut completed = None;
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::Delta(delta) => streamed.push_str(&delta),
            PipelineEvent::Completed(response) => completed = Some(*response),
            PipelineEvent::Error(message) => panic!("unexpected error: {message}"),
        }
    }

    let completed = completed.expect("terminal completion event");
    assert_eq!(streamed, SCRIPTED_RESPONSE);
    assert_eq!(completed.response_text, SCRIPTED_RESPONSE);
    assert_eq!(completed.citations.len(), 1);
}

#[tokio::test]
async fn test_stream_failure_emits_terminal_error() {
    let fx = fixture(Arc::new(FailingStreamChat)).await;

    let mut rx = fx
        .pipeline
        .clone()
        .ask_stream(AskRequest::question("When was Lincoln born?"));

    let mut saw_delta = false;
    let mut terminal_error = false;
    let mut completed = false;
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::Delta(_) => saw_delta = true,
            PipelineEvent::Error(_) => terminal_error = true,
            PipelineEvent::Completed(_) => completed = true,
        }
    }

    assert!(saw_delta);
    assert!(terminal_error);
    assert!(!completed);
}

#[tokio::test]
async fn test_retrieval_diversity_cap() {
    let store = Arc::new(InMemoryStore::new());
    let gw = gateway(Arc::new(BagEmbedder::lincoln()));

    // One verbose document with many near-identical chunks, one short
    // document. The verbose one must not contribute more than three.
    let verbose_source = Source {
        id: "src-verbose".to_string(),
        title: "Verbose".to_string(),
        author: None,
        source_type: "book".to_string(),
        reliability: 0.5,
    };
    store.upsert_source(&verbose_source).await.unwrap();
    let mut verbose_doc = Document::new("src-verbose", None);
    verbose_doc.id = "doc-verbose".to_string();
    store.upsert_document(&verbose_doc).await.unwrap();

    let mut chunks = Vec::new();
    for i in 0..8 {
        let mut chunk = Chunk::from_text("doc-verbose", i, &format!("lincoln passage {i}"), None);
        chunk.embedding = Some(vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        chunks.push(chunk);
    }
    let other_source = Source {
        id: "src-other".to_string(),
        title: "Other".to_string(),
        author: None,
        source_type: "book".to_string(),
        reliability: 0.5,
    };
    store.upsert_source(&other_source).await.unwrap();
    let mut other_doc = Document::new("src-other", None);
    other_doc.id = "doc-other".to_string();
    store.upsert_document(&other_doc).await.unwrap();
    for i in 0..2 {
        let mut chunk = Chunk::from_text("doc-other", i, &format!("lincoln note {i}"), None);
        chunk.embedding = Some(vec![0.9, 0.1, 0.0, 0.0, 0.0, 0.0, 0.0]);
        chunks.push(chunk);
    }
    store.insert_chunks(&chunks).await.unwrap();

    let retriever = ContextRetriever::new(gw, store.clone(), store.clone(), 3);
    let results = retriever.retrieve("lincoln", 10, 0.1, None).await.unwrap();

    let verbose_count = results
        .iter()
        .filter(|r| r.chunk.document_id == "doc-verbose")
        .count();
    assert!(verbose_count <= 3, "diversity cap violated: {verbose_count}");
    assert!(results.iter().any(|r| r.chunk.document_id == "doc-other"));
    // Descending similarity order.
    for pair in results.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
}

#[tokio::test]
async fn test_retrieval_high_threshold_returns_empty() {
    let fx = fixture(Arc::new(ScriptedChat {
        response: String::new(),
    }))
    .await;
    let gw = gateway(Arc::new(BagEmbedder::lincoln()));
    let retriever = ContextRetriever::new(gw, fx.store.clone(), fx.store.clone(), 3);

    // Nothing clears a 0.99 threshold for an off-topic query; empty is
    // a valid outcome, not an error.
    let results = retriever
        .retrieve("gettysburg kentucky war", 5, 0.99, None)
        .await
        .unwrap();
    assert!(results.len() <= 5);
    let strict = retriever.retrieve("born", 5, 0.999, None).await;
    assert!(strict.is_ok());
}

#[tokio::test]
async fn test_retrieval_source_filter() {
    let fx = fixture(Arc::new(ScriptedChat {
        response: String::new(),
    }))
    .await;
    let gw = gateway(Arc::new(BagEmbedder::lincoln()));
    let retriever = ContextRetriever::new(gw, fx.store.clone(), fx.store.clone(), 3);

    let unfiltered = retriever.retrieve("lincoln born", 10, 0.01, None).await.unwrap();
    assert!(!unfiltered.is_empty());
    let war_source = unfiltered
        .iter()
        .find(|r| r.source.title == "Lincoln Biography")
        .map(|r| r.source.id.clone())
        .expect("biography retrieved");

    let filter = vec![war_source.clone()];
    let filtered = retriever
        .retrieve("lincoln born", 10, 0.01, Some(&filter))
        .await
        .unwrap();
    assert!(!filtered.is_empty());
    assert!(filtered.iter().all(|r| r.source.id == war_source));
}

#[tokio::test]
async fn test_ingest_status_flow() {
    let store = Arc::new(InMemoryStore::new());
    let gw = gateway(Arc::new(BagEmbedder::lincoln()));
    let (_, document) = seed_source(
        &store,
        "Status Check",
        0.7,
        "Lincoln was born in 1809. Lincoln grew tall on the frontier.",
        &gw,
    )
    .await;

    let stored = store.get_document(&document.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ProcessingStatus::Completed);
    assert!(stored.error_message.is_none());
}

#[tokio::test]
async fn test_ingest_failure_records_error_status() {
    let store = Arc::new(InMemoryStore::new());
    let gw = gateway(Arc::new(FailingEmbedder));

    let source = Source {
        id: "src-fail".to_string(),
        title: "Fails".to_string(),
        author: None,
        source_type: "book".to_string(),
        reliability: 0.5,
    };
    store.upsert_source(&source).await.unwrap();
    let document = Document::new("src-fail", None);

    let chunker = Chunker::new(200, 20);
    let dyn_store: Arc<dyn Store> = store.clone();
    let result = ingest_document(
        dyn_store,
        gw,
        &chunker,
        ChunkStrategy::ParagraphAware,
        &document,
        "Some text that will fail to embed.",
        16,
    )
    .await;
    assert!(result.is_err());

    let stored = store.get_document(&document.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ProcessingStatus::Error);
    assert!(stored
        .error_message
        .as_deref()
        .unwrap()
        .contains("embedding backend down"));
}

#[tokio::test]
async fn test_tracker_drops_citation_with_missing_chunk() {
    let store = Arc::new(InMemoryStore::new());
    let tracker = CitationTracker::new(store.clone(), ValidationPolicy::default());

    let orphan = chronicle_core::models::Citation {
        id: "c1".to_string(),
        chunk_id: "gone".to_string(),
        document_id: "d1".to_string(),
        source_id: "s1".to_string(),
        citation_text: "Lost Book".to_string(),
        confidence: 0.5,
        validation_score: None,
        episode_id: None,
        beat_id: None,
        metadata: chronicle_core::models::Metadata::for_citation(),
        created_at: chrono::Utc::now(),
    };

    let saved = tracker.track("ep1", None, vec![orphan]).await.unwrap();
    assert!(saved.is_empty());
    assert!(store.citations_for_episode("ep1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tracker_validation_and_episode_report() {
    let fx = fixture(Arc::new(ScriptedChat {
        response: SCRIPTED_RESPONSE.to_string(),
    }))
    .await;

    let mut request = AskRequest::question("When was Lincoln born?");
    request.episode_id = Some("ep9".to_string());
    fx.pipeline.ask(&request).await.unwrap();

    let tracker = CitationTracker::new(fx.store.clone(), ValidationPolicy::default());
    let bulk = tracker.bulk_validate("ep9").await.unwrap();
    assert_eq!(bulk.total_citations, 1);
    assert_eq!(bulk.validated_citations, 1);

    let citations = fx.store.citations_for_episode("ep9").await.unwrap();
    let score = citations[0].validation_score.expect("validation recorded");
    assert!((0.0..=1.0).contains(&score));

    let report = tracker.episode_report("ep9").await.unwrap();
    assert_eq!(report.total_citations, 1);
    assert_eq!(report.sources_used, 1);
    assert_eq!(report.source_breakdown[0].title, "Lincoln Biography");
    assert!((report.average_accuracy - score).abs() < 1e-6);

    let stats = tracker
        .source_stats(&citations[0].source_id)
        .await
        .unwrap();
    assert_eq!(stats.total_citations, 1);
    assert_eq!(stats.episodes_referenced, 1);
}

#[tokio::test]
async fn test_stream_cancellation_is_clean() {
    let fx = fixture(Arc::new(ScriptedChat {
        response: SCRIPTED_RESPONSE.to_string(),
    }))
    .await;

    // Drop the receiver after the first delta; a later request on the
    // same pipeline must be unaffected.
    let mut rx = fx
        .pipeline
        .clone()
        .ask_stream(AskRequest::question("When was Lincoln born?"));
    let first = rx.recv().await;
    assert!(first.is_some());
    drop(rx);

    let response = fx
        .pipeline
        .ask(&AskRequest::question("When was Lincoln born?"))
        .await
        .unwrap();
    assert_eq!(response.citations.len(), 1);
}
