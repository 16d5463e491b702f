//! Embedding client
//!
//! Wraps an [`EmbeddingProvider`] with per-attempt timeouts, bounded retry
//! with exponential backoff for transient failures, sub-batching and
//! dimension validation.

use opskb_core::config::EmbeddingConfig;
use opskb_core::error::{Error, ProviderError, Result};
use opskb_core::rag::EmbeddingProvider;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retrying embedding client with a fixed output dimension
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    config: EmbeddingConfig,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbeddingConfig) -> Self {
        Self { provider, config }
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Embed a single text
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::EmbeddingUnavailable("provider returned no vector".to_string()))
    }

    /// Embed texts in order, splitting into provider-sized batches
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let embedded = self.embed_with_retry(batch).await?;
            if embedded.len() != batch.len() {
                return Err(Error::EmbeddingUnavailable(format!(
                    "provider returned {} vectors for {} inputs",
                    embedded.len(),
                    batch.len()
                )));
            }
            for vector in &embedded {
                if vector.len() != self.config.dimension {
                    return Err(Error::DimensionMismatch {
                        expected: self.config.dimension,
                        actual: vector.len(),
                    });
                }
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    async fn embed_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.initial_backoff();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.config.timeout(), self.provider.embed_batch(batch)).await {
                Ok(Ok(vectors)) => return Ok(vectors),
                Ok(Err(ProviderError::Rejected(reason))) => {
                    warn!(provider = self.provider.name(), %reason, "Embedding request rejected");
                    return Err(Error::EmbeddingRejected(reason));
                }
                Ok(Err(ProviderError::Unavailable(reason))) => {
                    warn!(provider = self.provider.name(), attempt, %reason, "Embedding request failed");
                    last_error = reason;
                }
                Err(_) => {
                    warn!(
                        provider = self.provider.name(),
                        attempt,
                        timeout = ?self.config.timeout(),
                        "Embedding request timed out"
                    );
                    last_error = format!("timed out after {:?}", self.config.timeout());
                }
            }

            if attempt < attempts {
                debug!(attempt, ?backoff, "Retrying embedding request");
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2).min(Duration::from_secs(30));
            }
        }

        Err(Error::EmbeddingUnavailable(format!(
            "{} attempts exhausted: {}",
            attempts, last_error
        )))
    }
}
