//! # opskb Providers
//!
//! Embedding and cross-encoder implementations for the opskb knowledge
//! engine: OpenAI-compatible HTTP clients plus deterministic mocks for tests.

#![warn(missing_docs)]

// Re-export core types for convenience
pub use opskb_core::error::{Error, ProviderError, Result};
pub use opskb_core::rag::{CrossEncoder, EmbeddingProvider};

pub mod mock;
pub mod openai;
pub mod rerank;
pub mod utils;

pub use mock::{FailingEmbedder, HashEmbedder, ScriptedCrossEncoder};
pub use openai::OpenAiEmbeddings;
pub use rerank::HttpCrossEncoder;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Connection pool idle timeout
    pub pool_idle_timeout_secs: u64,
    /// Max idle connections per host
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            pool_idle_timeout_secs: 90,
            pool_max_idle_per_host: 16,
        }
    }
}

impl HttpConfig {
    /// Build a reqwest client
    pub fn build_client(&self) -> Result<reqwest::Client> {
        use std::time::Duration;

        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .pool_idle_timeout(Duration::from_secs(self.pool_idle_timeout_secs))
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))
    }
}
