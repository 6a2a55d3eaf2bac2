use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use chronicle_core::chunker::{ChunkStrategy, DEFAULT_ABBREVIATIONS};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_size")]
    pub target_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_abbreviations")]
    pub abbreviations: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_size: default_target_size(),
            overlap: default_overlap(),
            strategy: default_strategy(),
            abbreviations: default_abbreviations(),
        }
    }
}

fn default_target_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    100
}
fn default_strategy() -> String {
    "fixed".to_string()
}
fn default_abbreviations() -> Vec<String> {
    DEFAULT_ABBREVIATIONS.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama defaults to `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Embedding cache entry lifetime.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Requests admitted per rolling 60-second window.
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: usize,
    /// Estimated tokens admitted per rolling 60-second window.
    #[serde(default = "default_rate_limit_tokens")]
    pub rate_limit_tokens: f64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_tokens: default_rate_limit_tokens(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_cache_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}
fn default_rate_limit_requests() -> usize {
    3000
}
fn default_rate_limit_tokens() -> f64 {
    1_000_000.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_url")]
    pub url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: default_generation_url(),
            model: default_generation_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_max_chunks_per_document")]
    pub max_chunks_per_document: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_chunks: default_max_chunks(),
            similarity_threshold: default_similarity_threshold(),
            max_chunks_per_document: default_max_chunks_per_document(),
        }
    }
}

fn default_max_chunks() -> usize {
    10
}
fn default_similarity_threshold() -> f32 {
    0.7
}
fn default_max_chunks_per_document() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    #[serde(default = "default_accuracy_threshold")]
    pub accuracy_threshold: f32,
    #[serde(default = "default_coverage_requirement")]
    pub coverage_requirement: f32,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            accuracy_threshold: default_accuracy_threshold(),
            coverage_requirement: default_coverage_requirement(),
            history_turns: default_history_turns(),
        }
    }
}

fn default_accuracy_threshold() -> f32 {
    0.7
}
fn default_coverage_requirement() -> f32 {
    90.0
}
fn default_history_turns() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersonaConfig {
    #[serde(default = "default_persona_name")]
    pub name: String,
    /// Full persona system prompt. When absent, the built-in persona
    /// constitution is used.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            system_prompt: None,
        }
    }
}

fn default_persona_name() -> String {
    "Abraham Lincoln".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.target_size == 0 {
        anyhow::bail!("chunking.target_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.target_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.target_size");
    }
    config
        .chunking
        .strategy
        .parse::<ChunkStrategy>()
        .map_err(|e| anyhow::anyhow!(e))?;

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.rate_limit_requests == 0 {
        anyhow::bail!("embedding.rate_limit_requests must be > 0");
    }
    if config.embedding.rate_limit_tokens <= 0.0 {
        anyhow::bail!("embedding.rate_limit_tokens must be > 0");
    }

    if config.retrieval.max_chunks == 0 {
        anyhow::bail!("retrieval.max_chunks must be > 0");
    }
    if !(0.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        anyhow::bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
    }
    if config.retrieval.max_chunks_per_document == 0 {
        anyhow::bail!("retrieval.max_chunks_per_document must be > 0");
    }

    if !(0.0..=1.0).contains(&config.validation.accuracy_threshold) {
        anyhow::bail!("validation.accuracy_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=100.0).contains(&config.validation.coverage_requirement) {
        anyhow::bail!("validation.coverage_requirement must be in [0.0, 100.0]");
    }

    Ok(())
}
