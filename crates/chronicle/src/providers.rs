//! Embedding provider implementations.
//!
//! Concrete [`EmbeddingModel`] backends behind the gateway:
//! - **[`OpenAiEmbedding`]** — the OpenAI embeddings API.
//! - **[`OllamaEmbedding`]** — a local Ollama instance's `/api/embed`.
//! - **[`DisabledEmbedding`]** — always fails; used when embeddings are
//!   not configured.
//!
//! # Retry strategy
//!
//! Retry policy lives here, in the collaborator layer — the gateway and
//! pipeline above never retry. Transient failures use exponential
//! backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use chronicle_core::embedding::EmbeddingModel;
use chronicle_core::error::{ChronicleError, Result};

use crate::config::EmbeddingConfig;

/// Map a transport error onto the taxonomy.
pub(crate) fn http_error(context: &str, err: reqwest::Error) -> ChronicleError {
    if err.is_timeout() {
        ChronicleError::Timeout(format!("{context}: {err}"))
    } else {
        ChronicleError::Upstream(format!("{context}: {err}"))
    }
}

/// A no-op embedding backend that always returns an error.
pub struct DisabledEmbedding;

#[async_trait]
impl EmbeddingModel for DisabledEmbedding {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(ChronicleError::Upstream(
            "embedding provider is disabled".to_string(),
        ))
    }
}

/// Embedding backend using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable.
pub struct OpenAiEmbedding {
    model: String,
    dims: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEmbedding {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            ChronicleError::InvalidInput("embedding.model required for OpenAI provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            ChronicleError::InvalidInput("embedding.dims required for OpenAI provider".to_string())
        })?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(ChronicleError::InvalidInput(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChronicleError::Upstream(format!("http client: {e}")))?;

        Ok(Self {
            model,
            dims,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbedding {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ChronicleError::InvalidInput("OPENAI_API_KEY not set".to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "encoding_format": "float",
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {api_key}"))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| http_error("OpenAI response body", e))?;
                        return parse_openai_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(status = %status, "OpenAI embeddings retryable error");
                        last_err = Some(ChronicleError::Upstream(format!(
                            "OpenAI API error {status}: {body_text}"
                        )));
                        continue;
                    }

                    return Err(ChronicleError::Upstream(format!(
                        "OpenAI API error {status}: {body_text}"
                    )));
                }
                Err(e) => {
                    last_err = Some(http_error("OpenAI embeddings", e));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ChronicleError::Upstream("embedding failed after retries".into())))
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
        ChronicleError::Upstream("invalid OpenAI response: missing data array".to_string())
    })?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                ChronicleError::Upstream("invalid OpenAI response: missing embedding".to_string())
            })?;
        embeddings.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(embeddings)
}

/// Embedding backend using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default
/// `http://localhost:11434`). Requires an embedding model pulled, e.g.
/// `ollama pull nomic-embed-text`.
pub struct OllamaEmbedding {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedding {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            ChronicleError::InvalidInput("embedding.model required for Ollama provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            ChronicleError::InvalidInput("embedding.dims required for Ollama provider".to_string())
        })?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChronicleError::Upstream(format!("http client: {e}")))?;

        Ok(Self {
            model,
            dims,
            url,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingModel for OllamaEmbedding {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/embed", self.url))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| http_error("Ollama response body", e))?;
                        return parse_ollama_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(ChronicleError::Upstream(format!(
                            "Ollama API error {status}: {body_text}"
                        )));
                        continue;
                    }

                    return Err(ChronicleError::Upstream(format!(
                        "Ollama API error {status}: {body_text}"
                    )));
                }
                Err(e) => {
                    last_err = Some(ChronicleError::Upstream(format!(
                        "Ollama connection error (is Ollama running at {}?): {e}",
                        self.url
                    )));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ChronicleError::Upstream("Ollama embedding failed after retries".into())))
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            ChronicleError::Upstream("invalid Ollama response: missing embeddings array".to_string())
        })?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| {
                ChronicleError::Upstream(
                    "invalid Ollama response: embedding is not an array".to_string(),
                )
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

/// Create the configured embedding backend.
///
/// | Config value | Backend |
/// |--------------|---------|
/// | `"disabled"` | [`DisabledEmbedding`] |
/// | `"openai"` | [`OpenAiEmbedding`] |
/// | `"ollama"` | [`OllamaEmbedding`] |
pub fn create_embedding_model(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedding)),
        "openai" => Ok(Arc::new(OpenAiEmbedding::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedding::new(config)?)),
        other => Err(ChronicleError::InvalidInput(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openai_response_order() {
        let json = serde_json::json!({
            "data": [
                {"embedding": [1.0, 2.0], "index": 0},
                {"embedding": [3.0, 4.0], "index": 1},
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn test_parse_openai_response_malformed() {
        let json = serde_json::json!({"unexpected": true});
        assert!(parse_openai_response(&json).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({"embeddings": [[0.5, -0.5]]});
        let vecs = parse_ollama_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![0.5, -0.5]]);
    }

    #[tokio::test]
    async fn test_disabled_provider_fails() {
        let provider = DisabledEmbedding;
        let err = provider.embed(&["text".to_string()]).await.unwrap_err();
        assert!(matches!(err, ChronicleError::Upstream(_)));
    }

    #[test]
    fn test_create_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "mystery".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedding_model(&config).is_err());
    }
}
