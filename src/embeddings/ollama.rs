// src/embeddings/ollama.rs
// Embeddings via an OpenAI-compatible /v1/embeddings endpoint (Ollama by default)

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::embeddings::Embedder;
use crate::error::{RecallError, Result};

/// Max characters to send per text (conservative limit for local models)
const MAX_TEXT_CHARS: usize = 8192 * 4;

/// Retry attempts after the first failure
const RETRY_ATTEMPTS: usize = 1;

/// OpenAI-compatible embedding response types
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Embeddings client for an OpenAI-compatible endpoint (no auth required)
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
    http_client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(
        base_url: String,
        model: String,
        dimensions: usize,
        batch_size: usize,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dimensions,
            batch_size: batch_size.max(1),
            http_client,
        }
    }

    /// Build from the embedding config section with a shared HTTP client.
    pub fn from_config(config: &EmbeddingConfig, http_client: reqwest::Client) -> Self {
        Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            config.dimensions,
            config.batch_size,
            http_client,
        )
    }

    /// Core embedding call for one sub-batch.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<&str> = texts
            .iter()
            .map(|t| {
                if t.len() > MAX_TEXT_CHARS {
                    debug!(
                        len = t.len(),
                        max = MAX_TEXT_CHARS,
                        "Truncating text for embedding"
                    );
                    clip(t, MAX_TEXT_CHARS)
                } else {
                    t.as_str()
                }
            })
            .collect();

        let body = serde_json::json!({
            "input": inputs,
            "model": self.model,
        });

        let url = format!("{}/v1/embeddings", self.base_url);

        let mut last_error = None;
        for attempt in 0..=RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(1000)).await;
            }

            match self
                .http_client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(response) => {
                    if response.status().is_success() {
                        let resp: EmbeddingResponse = response.json().await.map_err(|e| {
                            RecallError::Embedding(format!(
                                "failed to parse embedding response: {e}"
                            ))
                        })?;

                        let mut data = resp.data;
                        data.sort_by_key(|d| d.index);

                        if data.len() != texts.len() {
                            return Err(RecallError::Embedding(format!(
                                "embedding count mismatch: sent {}, got {}",
                                texts.len(),
                                data.len()
                            )));
                        }
                        for d in &data {
                            if d.embedding.len() != self.dimensions {
                                return Err(RecallError::Embedding(format!(
                                    "dimension mismatch: expected {}, got {}",
                                    self.dimensions,
                                    d.embedding.len()
                                )));
                            }
                        }

                        return Ok(data.into_iter().map(|d| d.embedding).collect());
                    }

                    let status = response.status();
                    let body_text = response.text().await.unwrap_or_default();
                    last_error = Some(RecallError::Embedding(format!(
                        "embedding request failed ({status}): {body_text}"
                    )));
                }
                Err(e) => {
                    last_error = Some(RecallError::Embedding(format!(
                        "embedding request error: {e}"
                    )));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| RecallError::Embedding("embedding request failed".to_string())))
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        if texts.len() <= self.batch_size {
            return self.embed_texts(texts).await;
        }

        // Process in chunks so one failed request doesn't discard
        // embeddings from earlier sub-batches.
        let mut all_results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            all_results.extend(self.embed_texts(chunk).await?);
        }
        Ok(all_results)
    }
}

/// Clip a string to at most `max` bytes at a char boundary.
fn clip(s: &str, max: usize) -> &str {
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
