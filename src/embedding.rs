//! Embedding client.
//!
//! Defines the [`Embedder`] trait and [`OpenAIEmbedder`], which calls an
//! OpenAI-compatible `POST {base_url}/embeddings` endpoint. Also provides
//! [`cosine_similarity`] for comparing the resulting vectors.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Unparseable or incomplete 200 body → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{Credential, EmbeddingConfig};
use crate::error::ProviderError;

/// Maps text to a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Embedder backed by an OpenAI-compatible embeddings API.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    credential: Credential,
    max_retries: u32,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            credential: config.credential(),
            max_retries: config.max_retries,
        })
    }

    /// Replace where the API key is read from.
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    async fn request_once(&self, api_key: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let json: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("response is not JSON: {}", e)))?;
        parse_embedding_response(&json)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let api_key = self.credential.resolve().ok_or_else(|| {
            ProviderError::MissingCredential(self.credential.source_name().to_string())
        })?;

        let mut attempt = 0;
        loop {
            match self.request_once(&api_key, text).await {
                Ok(vector) => {
                    debug!(model = %self.model, dims = vector.len(), "embedded text");
                    return Ok(vector);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    // Exponential backoff: 1s, 2s, 4s, 8s, ...
                    let delay = Duration::from_secs(1 << attempt.min(5));
                    warn!(error = %e, attempt = attempt + 1, ?delay, "embedding request failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Extract `data[0].embedding` from an embeddings API response.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>, ProviderError> {
    let item = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .ok_or_else(|| ProviderError::Malformed("missing data array".to_string()))?;

    let values = item
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ProviderError::Malformed("missing embedding".to_string()))?;

    if values.is_empty() {
        return Err(ProviderError::Malformed("empty embedding".to_string()));
    }

    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ProviderError::Malformed(format!("non-numeric embedding value: {}", v)))
        })
        .collect()
}

/// Cosine of the angle between `a` and `b`, clamped to `[-1, 1]`.
///
/// Scores `0.0` when the lengths differ or either vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, len_a, len_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, la, lb), (x, y)| {
            (dot + x * y, la + x * x, lb + y * y)
        });

    let magnitude = (len_a * len_b).sqrt();
    if magnitude <= f32::EPSILON {
        return 0.0;
    }
    (dot / magnitude).clamp(-1.0, 1.0)
}
