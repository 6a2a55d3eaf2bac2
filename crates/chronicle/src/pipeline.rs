//! The retrieval-augmented answer pipeline.
//!
//! One question flows retrieve → assemble → generate → extract →
//! coverage → track. Batch ([`RagPipeline::ask`]) returns the finished
//! [`PipelineResponse`]; streaming ([`RagPipeline::ask_stream`]) yields
//! [`PipelineEvent`]s — deltas while the model speaks, then a terminal
//! `Completed` carrying the same post-processed result, or a terminal
//! `Error`. Each request is an independent unit of work; the only state
//! shared between concurrent requests lives inside the embedding
//! gateway.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;

use chronicle_core::citation::{coverage, extract_citations, CoverageReport, ValidationPolicy};
use chronicle_core::error::Result;
use chronicle_core::models::{Beat, Citation, ContextChunk};
use chronicle_core::prompt::{build_messages, HistoryTurn};
use chronicle_core::store::Store;

use crate::gateway::EmbeddingGateway;
use crate::generator::{LanguageModel, StreamEvent};
use crate::retriever::ContextRetriever;
use crate::tracker::CitationTracker;

/// One question for the pipeline. Owned so a streaming request can move
/// into its background task.
#[derive(Debug, Clone, Default)]
pub struct AskRequest {
    pub user_message: String,
    pub history: Vec<HistoryTurn>,
    /// Restrict retrieval to these source ids.
    pub source_filter: Option<Vec<String>>,
    /// When set, citations and a beat are recorded under this episode.
    pub episode_id: Option<String>,
}

impl AskRequest {
    pub fn question(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            ..Self::default()
        }
    }
}

/// Finished answer with citations and coverage figures.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse {
    pub response_text: String,
    pub citations: Vec<Citation>,
    pub coverage: CoverageReport,
    pub context_chunks_used: usize,
    pub sources_searched: usize,
    pub model: String,
    pub elapsed_ms: u64,
}

/// Streaming pipeline event. `Completed` and `Error` are terminal.
#[derive(Debug)]
pub enum PipelineEvent {
    Delta(String),
    Completed(Box<PipelineResponse>),
    Error(String),
}

/// Pipeline tuning, lifted from configuration.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    pub max_chunks: usize,
    pub similarity_threshold: f32,
    pub history_turns: usize,
    pub system_prompt: String,
}

pub struct RagPipeline {
    retriever: ContextRetriever,
    model: Arc<dyn LanguageModel>,
    tracker: CitationTracker,
    store: Arc<dyn Store>,
    gateway: Arc<EmbeddingGateway>,
    policy: ValidationPolicy,
    params: PipelineParams,
}

impl RagPipeline {
    pub fn new(
        retriever: ContextRetriever,
        model: Arc<dyn LanguageModel>,
        tracker: CitationTracker,
        store: Arc<dyn Store>,
        gateway: Arc<EmbeddingGateway>,
        policy: ValidationPolicy,
        params: PipelineParams,
    ) -> Self {
        Self {
            retriever,
            model,
            tracker,
            store,
            gateway,
            policy,
            params,
        }
    }

    /// Answer a question in one call.
    pub async fn ask(&self, request: &AskRequest) -> Result<PipelineResponse> {
        let started = Instant::now();
        tracing::info!(
            question = %truncate(&request.user_message, 100),
            "generating response"
        );

        let context = self.retrieve_context(request).await?;
        let messages = build_messages(
            &self.params.system_prompt,
            &request.user_message,
            &context,
            &request.history,
            self.params.history_turns,
        );

        let response_text = self.model.complete(&messages).await?;
        self.finish(request, &context, response_text, started).await
    }

    /// Answer a question as a live event stream.
    ///
    /// Retrieval and prompt assembly run inside the task, so the caller
    /// gets the receiver immediately. Dropping the receiver cancels the
    /// request mid-stream without corrupting later ones.
    pub fn ask_stream(self: Arc<Self>, request: AskRequest) -> mpsc::Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel(32);
        let pipeline = self;

        tokio::spawn(async move {
            let started = Instant::now();

            let context = match pipeline.retrieve_context(&request).await {
                Ok(context) => context,
                Err(e) => {
                    let _ = tx.send(PipelineEvent::Error(e.to_string())).await;
                    return;
                }
            };
            let messages = build_messages(
                &pipeline.params.system_prompt,
                &request.user_message,
                &context,
                &request.history,
                pipeline.params.history_turns,
            );

            let mut stream = match pipeline.model.stream(&messages).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(PipelineEvent::Error(e.to_string())).await;
                    return;
                }
            };

            let mut full_text = String::new();
            loop {
                match stream.next().await {
                    Some(StreamEvent::Delta(delta)) => {
                        full_text.push_str(&delta);
                        if tx.send(PipelineEvent::Delta(delta)).await.is_err() {
                            // Consumer cancelled; dropping `stream`
                            // releases the model connection.
                            return;
                        }
                    }
                    Some(StreamEvent::Done) => break,
                    Some(StreamEvent::Error(e)) => {
                        let _ = tx.send(PipelineEvent::Error(e.to_string())).await;
                        return;
                    }
                    None => {
                        let _ = tx
                            .send(PipelineEvent::Error(
                                "stream ended without terminal event".to_string(),
                            ))
                            .await;
                        return;
                    }
                }
            }

            match pipeline.finish(&request, &context, full_text, started).await {
                Ok(response) => {
                    let _ = tx.send(PipelineEvent::Completed(Box::new(response))).await;
                }
                Err(e) => {
                    let _ = tx.send(PipelineEvent::Error(e.to_string())).await;
                }
            }
        });

        rx
    }

    /// Gateway statistics for introspection surfaces.
    pub fn gateway_stats(&self) -> crate::gateway::GatewayStats {
        self.gateway.stats()
    }

    async fn retrieve_context(&self, request: &AskRequest) -> Result<Vec<ContextChunk>> {
        self.retriever
            .retrieve(
                &request.user_message,
                self.params.max_chunks,
                self.params.similarity_threshold,
                request.source_filter.as_deref(),
            )
            .await
    }

    /// Shared post-processing: extract citations, measure coverage,
    /// record the beat and citations when an episode is given.
    async fn finish(
        &self,
        request: &AskRequest,
        context: &[ContextChunk],
        response_text: String,
        started: Instant,
    ) -> Result<PipelineResponse> {
        let citations = extract_citations(&response_text, context);
        let coverage_report = coverage(&response_text, citations.len(), &self.policy);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let citations = if let Some(episode_id) = &request.episode_id {
            let sequence = self.store.next_beat_sequence(episode_id).await?;
            let mut beat = Beat::new(episode_id, sequence, &request.user_message, &response_text);
            beat.citation_count = citations.len();
            beat.response_time_ms = Some(elapsed_ms);
            beat.token_count =
                Some(EmbeddingGateway::estimate_tokens(&response_text).round() as usize);
            self.store.append_beat(&beat).await?;

            self.tracker.track(episode_id, Some(&beat.id), citations).await?
        } else {
            citations
        };

        let sources_searched = {
            let mut ids: Vec<&str> = context.iter().map(|c| c.source.id.as_str()).collect();
            ids.sort_unstable();
            ids.dedup();
            ids.len()
        };

        tracing::info!(
            citations = citations.len(),
            coverage_pct = coverage_report.coverage_pct,
            elapsed_ms,
            "response complete"
        );

        Ok(PipelineResponse {
            response_text,
            citations,
            coverage: coverage_report,
            context_chunks_used: context.len(),
            sources_searched,
            model: self.model.model_name().to_string(),
            elapsed_ms,
        })
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
