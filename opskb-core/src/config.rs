//! Process-wide configuration
//!
//! Built once at startup (usually from YAML), validated, then shared
//! immutably behind an `Arc` by every component.
//!
//! ```rust
//! use opskb_core::config::KnowledgeConfig;
//!
//! let config = KnowledgeConfig::from_yaml_str(
//!     "embedding:\n  dimension: 384\nfusion:\n  candidate_n: 20\n",
//! ).unwrap();
//! assert_eq!(config.embedding.dimension, 384);
//! assert_eq!(config.fusion.rrf_k, 60);
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub store: StoreConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub fusion: FusionConfig,
    pub rerank: RerankConfig,
    pub search: SearchConfig,
    pub trigger: TriggerConfig,
}

/// Index store location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path
    pub db_path: PathBuf,
    /// Number of read-only connections used by searches
    pub read_pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("knowledge.db"),
            read_pool_size: 4,
        }
    }
}

/// How token counts are computed while chunking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    /// cl100k_base byte-pair encoding
    #[default]
    Bpe,
    /// One token per whitespace-separated word
    Whitespace,
}

/// Chunking parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Budget of new content per chunk (default: 400)
    pub max_tokens: usize,
    /// Context carried over from the previous chunk (default: 60)
    pub overlap_tokens: usize,
    pub tokenizer: TokenizerKind,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 400,
            overlap_tokens: 60,
            tokenizer: TokenizerKind::Bpe,
        }
    }
}

/// Embedding client behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model name, part of the indexing fingerprint
    pub model: String,
    /// Fixed vector dimensionality for the whole process
    pub dimension: usize,
    /// Max texts per provider call
    pub batch_size: usize,
    /// Per-attempt timeout
    pub timeout_ms: u64,
    /// Total attempts for transient failures
    pub max_attempts: u32,
    /// First backoff delay, doubled on each retry
    pub initial_backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            batch_size: 32,
            timeout_ms: 10_000,
            max_attempts: 3,
            initial_backoff_ms: 200,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

/// Reciprocal Rank Fusion parameters
///
/// The 0.7/0.3 weights and k=60 are empirical defaults, not tuned constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub vector_weight: f64,
    pub keyword_weight: f64,
    pub rrf_k: usize,
    /// Candidates fetched from each signal, independent of top_k
    pub candidate_n: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            keyword_weight: 0.3,
            rrf_k: 60,
            candidate_n: 50,
        }
    }
}

/// Cross-encoder re-ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub enabled: bool,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Query defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_top_k: usize,
    /// Applied when the caller does not pass its own timeout
    pub timeout_ms: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            timeout_ms: None,
        }
    }
}

/// Background indexing pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub workers: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self { workers: 2 }
    }
}

impl KnowledgeConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.max_tokens == 0 {
            return Err(Error::config("chunking.max_tokens must be greater than 0"));
        }
        if c.overlap_tokens >= c.max_tokens {
            return Err(Error::config(format!(
                "chunking.overlap_tokens ({}) must be smaller than max_tokens ({})",
                c.overlap_tokens, c.max_tokens
            )));
        }

        let e = &self.embedding;
        if e.dimension == 0 {
            return Err(Error::config("embedding.dimension must be greater than 0"));
        }
        if e.batch_size == 0 || e.max_attempts == 0 {
            return Err(Error::config(
                "embedding.batch_size and embedding.max_attempts must be at least 1",
            ));
        }

        let f = &self.fusion;
        if !(f.vector_weight >= 0.0 && f.keyword_weight >= 0.0) {
            return Err(Error::config("fusion weights must be non-negative"));
        }
        if f.vector_weight + f.keyword_weight == 0.0 {
            return Err(Error::config("at least one fusion weight must be positive"));
        }
        if f.candidate_n == 0 {
            return Err(Error::config("fusion.candidate_n must be at least 1"));
        }

        if self.store.read_pool_size == 0 {
            return Err(Error::config("store.read_pool_size must be at least 1"));
        }
        if self.trigger.workers == 0 {
            return Err(Error::config("trigger.workers must be at least 1"));
        }
        Ok(())
    }
}
