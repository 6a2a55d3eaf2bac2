//! # Chronicle CLI (`chron`)
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chron chunk <file>` | Chunk a text file and print the quality report |
//! | `chron ask "<question>" --corpus <dir>` | Ingest a corpus directory and answer one question with citations |
//! | `chron stats` | Print pipeline configuration and gateway counters |
//!
//! All commands accept a `--config` flag pointing to a TOML
//! configuration file. See `config/chronicle.example.toml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use chronicle::config::{load_config, Config};
use chronicle::gateway::{EmbeddingGateway, GatewayLimits};
use chronicle::generator::create_language_model;
use chronicle::ingest::ingest_document;
use chronicle::pipeline::{AskRequest, PipelineEvent, PipelineParams, RagPipeline};
use chronicle::providers::create_embedding_model;
use chronicle::retriever::ContextRetriever;
use chronicle::tracker::CitationTracker;
use chronicle_core::chunker::{analyze_chunks, ChunkStrategy, Chunker};
use chronicle_core::citation::ValidationPolicy;
use chronicle_core::models::{Document, Source};
use chronicle_core::prompt::DEFAULT_PERSONA_PROMPT;
use chronicle_core::store::memory::InMemoryStore;

/// Chronicle — a retrieval-augmented conversation engine for historical
/// personas with verifiable citations.
#[derive(Parser)]
#[command(
    name = "chron",
    about = "Chronicle — historically grounded conversations with verifiable citations",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chronicle.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk a text file and print aggregate quality statistics.
    Chunk {
        /// Plain-text file to chunk.
        file: PathBuf,
        /// Override the configured strategy (fixed, sentence, paragraph, structural).
        #[arg(long)]
        strategy: Option<String>,
    },
    /// Ingest a directory of .txt/.md files into an in-memory index and
    /// answer one question with citations.
    Ask {
        /// The question to ask.
        question: String,
        /// Directory of source text files.
        #[arg(long)]
        corpus: PathBuf,
        /// Stream the response as it is generated.
        #[arg(long)]
        stream: bool,
    },
    /// Print pipeline configuration and gateway counters.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chronicle=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        toml::from_str("").expect("default config")
    };

    match cli.command {
        Commands::Chunk { file, strategy } => cmd_chunk(&config, &file, strategy.as_deref()),
        Commands::Ask {
            question,
            corpus,
            stream,
        } => cmd_ask(&config, &question, &corpus, stream).await,
        Commands::Stats => cmd_stats(&config),
    }
}

fn chunker_from(config: &Config) -> (Chunker, ChunkStrategy) {
    let chunker = Chunker::new(config.chunking.target_size, config.chunking.overlap)
        .with_abbreviations(config.chunking.abbreviations.clone());
    let strategy = config
        .chunking
        .strategy
        .parse::<ChunkStrategy>()
        .expect("validated at load");
    (chunker, strategy)
}

fn cmd_chunk(config: &Config, file: &Path, strategy_override: Option<&str>) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let (chunker, mut strategy) = chunker_from(config);
    if let Some(name) = strategy_override {
        strategy = name.parse::<ChunkStrategy>().map_err(|e| anyhow::anyhow!(e))?;
    }

    let chunks = chunker.chunk(&text, strategy);
    match analyze_chunks(&chunks) {
        Some(report) => {
            println!("chunks: {}", report.total_chunks);
            println!("  characters: {}", report.total_characters);
            println!("  average size: {:.0}", report.average_chunk_size);
            println!("  min/max size: {}/{}", report.min_chunk_size, report.max_chunk_size);
            println!(
                "  with citation markers: {} ({:.0}%)",
                report.chunks_with_citations,
                report.citation_coverage * 100.0
            );
            println!(
                "  with historical markers: {} ({:.0}%)",
                report.chunks_with_historical_markers,
                report.historical_marker_coverage * 100.0
            );
        }
        None => println!("no chunks produced (empty input)"),
    }
    Ok(())
}

async fn cmd_ask(config: &Config, question: &str, corpus: &Path, stream: bool) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("embedding.provider is disabled; configure openai or ollama to use `ask`");
    }

    let store = Arc::new(InMemoryStore::new());
    let embedding_model = create_embedding_model(&config.embedding)?;
    let gateway = Arc::new(EmbeddingGateway::new(
        embedding_model,
        GatewayLimits::from(&config.embedding),
    ));
    let (chunker, strategy) = chunker_from(config);

    // Ingest every text file in the corpus directory as its own source.
    let mut entries: Vec<PathBuf> = std::fs::read_dir(corpus)
        .with_context(|| format!("Failed to read corpus directory {}", corpus.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "txt" || e == "md")
        })
        .collect();
    entries.sort();

    if entries.is_empty() {
        bail!("no .txt or .md files found in {}", corpus.display());
    }

    use chronicle_core::store::Store;
    for path in &entries {
        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled")
            .replace(['_', '-'], " ");
        let source = Source {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.clone(),
            author: None,
            source_type: "document".to_string(),
            reliability: 0.8,
        };
        store.upsert_source(&source).await?;

        let document = Document::new(&source.id, Some(&title));
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let outcome = ingest_document(
            store.clone(),
            gateway.clone(),
            &chunker,
            strategy,
            &document,
            &text,
            config.embedding.batch_size,
        )
        .await?;
        println!(
            "ingested {} ({} chunks, {} embeddings)",
            title, outcome.chunks_written, outcome.embeddings_written
        );
    }

    let policy = ValidationPolicy {
        accuracy_threshold: config.validation.accuracy_threshold,
        coverage_requirement: config.validation.coverage_requirement,
    };
    let retriever = ContextRetriever::new(
        gateway.clone(),
        store.clone(),
        store.clone(),
        config.retrieval.max_chunks_per_document,
    );
    let model = create_language_model(&config.generation)?;
    let tracker = CitationTracker::new(store.clone(), policy.clone());
    let params = PipelineParams {
        max_chunks: config.retrieval.max_chunks,
        similarity_threshold: config.retrieval.similarity_threshold,
        history_turns: config.validation.history_turns,
        system_prompt: config
            .persona
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_PERSONA_PROMPT.to_string()),
    };
    let pipeline = Arc::new(RagPipeline::new(
        retriever, model, tracker, store, gateway, policy, params,
    ));

    let request = AskRequest::question(question);

    let response = if stream {
        let mut rx = pipeline.ask_stream(request);
        let mut completed = None;
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::Delta(delta) => {
                    use std::io::Write;
                    print!("{delta}");
                    std::io::stdout().flush().ok();
                }
                PipelineEvent::Completed(response) => {
                    println!();
                    completed = Some(*response);
                }
                PipelineEvent::Error(message) => bail!("generation failed: {message}"),
            }
        }
        completed.context("stream ended without completion")?
    } else {
        let response = pipeline.ask(&request).await?;
        println!("{}", response.response_text);
        response
    };

    println!();
    println!(
        "citations: {} | coverage: {:.0}% ({}) | context chunks: {} | {} ms",
        response.citations.len(),
        response.coverage.coverage_pct,
        if response.coverage.meets_requirement { "ok" } else { "below requirement" },
        response.context_chunks_used,
        response.elapsed_ms,
    );
    for citation in &response.citations {
        println!(
            "  [{}] confidence {:.2}",
            citation.citation_text, citation.confidence
        );
    }
    Ok(())
}

fn cmd_stats(config: &Config) -> Result<()> {
    let embedding_model = create_embedding_model(&config.embedding)?;
    let gateway = EmbeddingGateway::new(embedding_model, GatewayLimits::from(&config.embedding));
    let stats = gateway.stats();

    println!("embedding");
    println!("  provider: {}", config.embedding.provider);
    println!("  model: {} ({} dims)", stats.model, stats.dims);
    println!(
        "  rate limits: {} req/min, {:.0} tokens/min",
        stats.rate_limit_requests, stats.rate_limit_tokens
    );
    println!("generation");
    println!("  model: {}", config.generation.model);
    println!("  max tokens: {}", config.generation.max_tokens);
    println!("  temperature: {}", config.generation.temperature);
    println!("retrieval");
    println!("  max chunks: {}", config.retrieval.max_chunks);
    println!("  similarity threshold: {}", config.retrieval.similarity_threshold);
    println!(
        "  diversity cap: {} chunks/document",
        config.retrieval.max_chunks_per_document
    );
    println!("validation");
    println!("  accuracy threshold: {}", config.validation.accuracy_threshold);
    println!(
        "  coverage requirement: {}%",
        config.validation.coverage_requirement
    );
    println!("persona");
    println!("  name: {}", config.persona.name);
    println!(
        "  system prompt: {}",
        if config.persona.system_prompt.is_some() { "custom" } else { "built-in" }
    );
    Ok(())
}
