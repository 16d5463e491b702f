//! Provider interfaces consumed by the knowledge engine
//!
//! Implementations live in `opskb-providers` (HTTP clients, mocks); the
//! engine only ever sees these traits.

use crate::error::ProviderError;
use async_trait::async_trait;

/// Interface for embedding providers
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Embed a batch of texts, one vector per input in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ProviderError::Unavailable("provider returned no vector".to_string()))
    }
}

/// Interface for cross-encoder relevance scorers
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Model name for logs
    fn name(&self) -> &str;

    /// Score every `(query, passage)` pair; one score per passage, same order
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, ProviderError>;
}
