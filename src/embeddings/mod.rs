// src/embeddings/mod.rs
// Embedding provider seam
//
// The index treats the embedder as an external black box: deterministic,
// pure, and slow enough to justify caching. Tests plug in their own
// implementations through the trait.

mod ollama;

pub use self::ollama::OllamaEmbedder;

use async_trait::async_trait;

use crate::error::{RecallError, Result};

/// A batch text-to-vector function.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier; versions the on-disk cache.
    fn model_id(&self) -> &str;

    /// Vector dimensionality every call must return.
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_batch(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| RecallError::Embedding("empty embedding response".to_string()))
    }
}
