//! Embedding gateway: cache + rate limiting in front of the embedding
//! model.
//!
//! An explicit, injectable component — one instance is shared by
//! reference among all callers in a process, so the cache and the rate
//! windows are process-wide without hidden global state.
//!
//! - **Cache**: content-addressed by `sha256(text)` + model id, entries
//!   expire after a configurable TTL (default 7 days). A cache hit
//!   returns immediately and leaves the rate counters untouched.
//! - **Rate limiting**: two independent rolling 60-second windows —
//!   request count and estimated token count (word count × 1.3). When a
//!   limit would be exceeded the caller sleeps until the window frees;
//!   backpressure, not an error.
//!
//! Locks are `std::sync::Mutex` held only for bookkeeping; no lock is
//! ever held across an await, so a slow provider call cannot stall
//! concurrent requests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};

use chronicle_core::embedding::EmbeddingModel;
use chronicle_core::error::{ChronicleError, Result};

use crate::config::EmbeddingConfig;

/// Rolling window length for both rate limits.
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Rough tokens-per-word ratio used for the token rate estimate.
const TOKENS_PER_WORD: f64 = 1.3;

/// Gateway tuning, lifted from [`EmbeddingConfig`].
#[derive(Debug, Clone)]
pub struct GatewayLimits {
    pub max_requests_per_minute: usize,
    pub max_tokens_per_minute: f64,
    pub cache_ttl: Duration,
}

impl From<&EmbeddingConfig> for GatewayLimits {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            max_requests_per_minute: config.rate_limit_requests,
            max_tokens_per_minute: config.rate_limit_tokens,
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
        }
    }
}

struct CacheEntry {
    vector: Vec<f32>,
    inserted_at: Instant,
}

struct RateWindow {
    request_times: VecDeque<Instant>,
    token_count: f64,
    token_window_start: Instant,
}

/// Gateway introspection snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub model: String,
    pub dims: usize,
    pub recent_requests: usize,
    pub current_token_count: f64,
    pub cache_entries: usize,
    pub rate_limit_requests: usize,
    pub rate_limit_tokens: f64,
}

/// Rate-limited, cached front of an [`EmbeddingModel`].
pub struct EmbeddingGateway {
    model: Arc<dyn EmbeddingModel>,
    limits: GatewayLimits,
    cache: Mutex<HashMap<String, CacheEntry>>,
    window: Mutex<RateWindow>,
}

impl EmbeddingGateway {
    pub fn new(model: Arc<dyn EmbeddingModel>, limits: GatewayLimits) -> Self {
        Self {
            model,
            limits,
            cache: Mutex::new(HashMap::new()),
            window: Mutex::new(RateWindow {
                request_times: VecDeque::new(),
                token_count: 0.0,
                token_window_start: Instant::now(),
            }),
        }
    }

    pub fn model_name(&self) -> String {
        self.model.model_name().to_string()
    }

    pub fn dims(&self) -> usize {
        self.model.dims()
    }

    /// Estimated token cost of a text: word count × 1.3.
    pub fn estimate_tokens(text: &str) -> f64 {
        text.split_whitespace().count() as f64 * TOKENS_PER_WORD
    }

    /// Embed a single text.
    ///
    /// Rejects empty/whitespace-only input before any cache, rate, or
    /// network work. A cache hit returns without touching the rate
    /// windows or the provider.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(ChronicleError::InvalidInput(
                "text cannot be empty".to_string(),
            ));
        }

        let key = self.cache_key(text);
        if let Some(vector) = self.cache_get(&key) {
            tracing::debug!(len = text.len(), "embedding cache hit");
            return Ok(vector);
        }

        self.acquire(1, Self::estimate_tokens(text)).await;

        let trimmed = text.trim().to_string();
        let mut vectors = self.model.embed(&[trimmed]).await?;
        let vector = vectors.pop().ok_or_else(|| {
            ChronicleError::Upstream("provider returned empty embedding response".to_string())
        })?;
        self.check_dims(&vector);

        self.cache_put(key, vector.clone());
        tracing::debug!(len = text.len(), "generated embedding");
        Ok(vector)
    }

    /// Embed a batch, preserving input order in the output.
    ///
    /// Inputs are partitioned into cached and uncached; one provider
    /// call covers the uncached subset and the results are reassembled
    /// into the original ordering. Any empty input rejects the whole
    /// call before external work.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(ChronicleError::InvalidInput(
                "batch contains empty text".to_string(),
            ));
        }

        let mut slots: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut uncached_texts: Vec<String> = Vec::new();
        let mut uncached_indices: Vec<usize> = Vec::new();
        let mut keys: Vec<String> = Vec::with_capacity(texts.len());

        {
            let mut cache = self.cache.lock().unwrap();
            for (i, text) in texts.iter().enumerate() {
                let key = self.cache_key(text);
                let cached = cache.get(&key).and_then(|entry| {
                    (entry.inserted_at.elapsed() < self.limits.cache_ttl)
                        .then(|| entry.vector.clone())
                });
                match cached {
                    Some(vector) => slots[i] = Some(vector),
                    None => {
                        cache.remove(&key);
                        uncached_texts.push(text.trim().to_string());
                        uncached_indices.push(i);
                    }
                }
                keys.push(key);
            }
        }

        if !uncached_texts.is_empty() {
            let tokens: f64 = uncached_texts
                .iter()
                .map(|t| Self::estimate_tokens(t))
                .sum();
            self.acquire(1, tokens).await;

            let vectors = self.model.embed(&uncached_texts).await?;
            if vectors.len() != uncached_texts.len() {
                return Err(ChronicleError::Upstream(format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    uncached_texts.len()
                )));
            }

            for (slot_pos, vector) in uncached_indices.iter().zip(vectors) {
                self.check_dims(&vector);
                self.cache_put(keys[*slot_pos].clone(), vector.clone());
                slots[*slot_pos] = Some(vector);
            }
        }

        tracing::debug!(
            total = texts.len(),
            fetched = uncached_indices.len(),
            "batch embedding complete"
        );
        Ok(slots.into_iter().map(|s| s.expect("slot filled")).collect())
    }

    pub fn stats(&self) -> GatewayStats {
        let cache_entries = self.cache.lock().unwrap().len();
        let (recent_requests, current_token_count) = {
            let mut window = self.window.lock().unwrap();
            prune(&mut window);
            (window.request_times.len(), window.token_count)
        };
        GatewayStats {
            model: self.model.model_name().to_string(),
            dims: self.model.dims(),
            recent_requests,
            current_token_count,
            cache_entries,
            rate_limit_requests: self.limits.max_requests_per_minute,
            rate_limit_tokens: self.limits.max_tokens_per_minute,
        }
    }

    fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        format!("embedding:{}:{}", self.model.model_name(), &hash[..16])
    }

    fn cache_get(&self, key: &str) -> Option<Vec<f32>> {
        let mut cache = self.cache.lock().unwrap();
        let stale = match cache.get(key) {
            Some(entry) => {
                if entry.inserted_at.elapsed() < self.limits.cache_ttl {
                    return Some(entry.vector.clone());
                }
                true
            }
            None => false,
        };
        if stale {
            cache.remove(key);
        }
        None
    }

    fn cache_put(&self, key: String, vector: Vec<f32>) {
        self.cache.lock().unwrap().insert(
            key,
            CacheEntry {
                vector,
                inserted_at: Instant::now(),
            },
        );
    }

    fn check_dims(&self, vector: &[f32]) {
        let expected = self.model.dims();
        if expected > 0 && vector.len() != expected {
            tracing::warn!(
                expected,
                actual = vector.len(),
                model = self.model.model_name(),
                "embedding dimensionality differs from configuration"
            );
        }
    }

    /// Admit `requests`/`tokens` against the rolling windows, sleeping
    /// until there is room. Admission is recorded atomically under the
    /// lock; the sleep happens outside it.
    async fn acquire(&self, requests: usize, tokens: f64) {
        loop {
            let wait = {
                let mut window = self.window.lock().unwrap();
                let now = Instant::now();
                prune(&mut window);

                if window.request_times.len() + requests > self.limits.max_requests_per_minute {
                    let oldest = window.request_times.front().copied().unwrap_or(now);
                    Some(RATE_WINDOW.saturating_sub(now.duration_since(oldest)))
                } else if window.token_count + tokens > self.limits.max_tokens_per_minute {
                    Some(
                        RATE_WINDOW
                            .saturating_sub(now.duration_since(window.token_window_start)),
                    )
                } else {
                    for _ in 0..requests {
                        window.request_times.push_back(now);
                    }
                    window.token_count += tokens;
                    None
                }
            };

            match wait {
                None => return,
                Some(delay) => {
                    let delay = delay.max(Duration::from_millis(10));
                    tracing::info!(?delay, "embedding rate limit reached, waiting");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Drop request timestamps older than the window and reset the token
/// counter once its window has fully elapsed.
fn prune(window: &mut RateWindow) {
    let now = Instant::now();
    while window
        .request_times
        .front()
        .is_some_and(|t| now.duration_since(*t) >= RATE_WINDOW)
    {
        window.request_times.pop_front();
    }
    if now.duration_since(window.token_window_start) >= RATE_WINDOW {
        window.token_count = 0.0;
        window.token_window_start = now;
    }
}
