//! Response generation against the language model.
//!
//! The [`LanguageModel`] trait is the seam to the chat-completion
//! collaborator. Streaming uses an explicit cancellable pull interface:
//! the producer task feeds an mpsc channel of [`StreamEvent`]s and every
//! stream terminates with `Done` or `Error` — a mid-stream failure is
//! surfaced, never silently truncated. Dropping the [`ResponseStream`]
//! cancels the producer and releases the underlying connection; all
//! state is per-call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use chronicle_core::error::{ChronicleError, Result};
use chronicle_core::prompt::ChatMessage;

use crate::config::GenerationConfig;
use crate::providers::http_error;

/// One event from a response stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A fragment of the response text. Concatenating all deltas yields
    /// the full text.
    Delta(String),
    /// Terminal: the response completed.
    Done,
    /// Terminal: the stream failed mid-delivery.
    Error(ChronicleError),
}

/// Consumer-driven pull over a finite, non-restartable delta sequence.
pub struct ResponseStream {
    rx: mpsc::Receiver<StreamEvent>,
}

impl ResponseStream {
    pub fn new(rx: mpsc::Receiver<StreamEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` if the producer vanished without a
    /// terminal event (treated as an upstream failure by callers).
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Drain the stream into the full response text.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Delta(delta) => text.push_str(&delta),
                StreamEvent::Done => return Ok(text),
                StreamEvent::Error(e) => return Err(e),
            }
        }
        Err(ChronicleError::Upstream(
            "stream ended without terminal event".to_string(),
        ))
    }
}

/// External chat-completion model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Full response in one call.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Live delta sequence. The returned stream is finite and not
    /// restartable; cancellation is dropping it.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<ResponseStream>;
}

/// Chat model speaking the OpenAI-compatible completions API
/// (OpenAI itself, or any server exposing `/chat/completions`).
pub struct OpenAiChatModel {
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();

        // No whole-request timeout on the shared client: streamed
        // generations legitimately outlive it. `complete` applies the
        // deadline per request.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ChronicleError::Upstream(format!("http client: {e}")))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
            api_key,
            client,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "presence_penalty": 0.1,
            "frequency_penalty": 0.1,
            "stream": stream,
        })
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&self.request_body(messages, false));

        let resp = self
            .apply_auth(req)
            .send()
            .await
            .map_err(|e| http_error("chat completion", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChronicleError::Upstream(format!(
                "chat API error {status}: {body}"
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| http_error("chat response body", e))?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ChronicleError::Upstream("chat response missing content".to_string())
            })?;
        Ok(content.trim().to_string())
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<ResponseStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.request_body(messages, true));

        let resp = self
            .apply_auth(req)
            .send()
            .await
            .map_err(|e| http_error("chat stream", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChronicleError::Upstream(format!(
                "chat API error {status}: {body}"
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(pump_sse(resp, tx));
        Ok(ResponseStream::new(rx))
    }
}

/// Read the SSE body incrementally and forward deltas. Always ends with
/// a terminal event; stops early when the receiver is dropped, which
/// drops the response and releases the connection.
async fn pump_sse(mut resp: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    let mut buffer = String::new();

    loop {
        match resp.chunk().await {
            Ok(Some(bytes)) => {
                buffer.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        let _ = tx.send(StreamEvent::Done).await;
                        return;
                    }
                    let Ok(json) = serde_json::from_str::<serde_json::Value>(data) else {
                        continue;
                    };
                    if let Some(delta) = json["choices"][0]["delta"]["content"].as_str() {
                        if !delta.is_empty()
                            && tx.send(StreamEvent::Delta(delta.to_string())).await.is_err()
                        {
                            // Consumer cancelled; stop reading.
                            return;
                        }
                    }
                }
            }
            Ok(None) => {
                let _ = tx.send(StreamEvent::Done).await;
                return;
            }
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error(http_error("chat stream body", e)))
                    .await;
                return;
            }
        }
    }
}

/// Create the configured chat model.
pub fn create_language_model(config: &GenerationConfig) -> Result<Arc<dyn LanguageModel>> {
    Ok(Arc::new(OpenAiChatModel::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_text_concatenates_deltas() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(StreamEvent::Delta("Four score ".to_string())).await.unwrap();
        tx.send(StreamEvent::Delta("and seven".to_string())).await.unwrap();
        tx.send(StreamEvent::Done).await.unwrap();
        drop(tx);

        let text = ResponseStream::new(rx).collect_text().await.unwrap();
        assert_eq!(text, "Four score and seven");
    }

    #[tokio::test]
    async fn test_collect_text_surfaces_stream_error() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(StreamEvent::Delta("partial".to_string())).await.unwrap();
        tx.send(StreamEvent::Error(ChronicleError::Upstream("lost".into())))
            .await
            .unwrap();
        drop(tx);

        let err = ResponseStream::new(rx).collect_text().await.unwrap_err();
        assert!(matches!(err, ChronicleError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_collect_text_without_terminal_is_error() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(StreamEvent::Delta("partial".to_string())).await.unwrap();
        drop(tx);

        assert!(ResponseStream::new(rx).collect_text().await.is_err());
    }
}
