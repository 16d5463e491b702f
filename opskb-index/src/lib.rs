//! # opskb-index: hybrid knowledge index with continuous learning
//!
//! Turns operational knowledge (reports, solutions, alias tables, skill
//! docs) into searchable chunks and answers natural-language queries with
//! ranked passages:
//! - **Chunking**: token-bounded, overlapping, paragraph/sentence aware
//! - **Embeddings**: retrying client over any [`EmbeddingProvider`](opskb_core::rag::EmbeddingProvider)
//! - **Index store**: SQLite with FTS5 (BM25) and stored vectors, atomic per-source replace
//! - **Hybrid retrieval**: keyword + vector search merged with weighted RRF
//! - **Re-ranking**: optional cross-encoder, never fails a search
//! - **Learning trigger**: producers write, a worker pool indexes in the background
//!
//! ## Architecture
//!
//! ```text
//! producer ──▶ KnowledgeWriter ──▶ LearningTrigger ──▶ Indexer ──▶ IndexStore
//!                                   (worker pool)    (Chunker,      (SQLite +
//!                                                    EmbeddingClient) FTS5)
//!
//! caller ──▶ KnowledgeEngine::search ──▶ HybridRetriever ──▶ RRF ──▶ Reranker
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use opskb_core::prelude::*;
//! use opskb_index::{KnowledgeEngine, SearchOptions};
//!
//! # async fn run(provider: Arc<dyn EmbeddingProvider>) -> Result<()> {
//! let engine = KnowledgeEngine::builder()
//!     .config(Arc::new(KnowledgeConfig::default()))
//!     .embedding_provider(provider)
//!     .build()?;
//!
//! // Producers write; indexing happens in the background
//! let writer = engine.writer("kb");
//! writer
//!     .save_solution("bgp flap core1", "Cleared the session after MTU fix", Some("junos".into()))
//!     .await?;
//!
//! let hits = engine
//!     .search("bgp session flapping", SearchOptions::default().top_k(5))
//!     .await?;
//! for hit in hits {
//!     println!("{} ({:.4}): {}", hit.source_path, hit.score, hit.text);
//! }
//! # Ok(())
//! # }
//! ```

pub mod chunker;
pub mod content_hash;
pub mod embedder;
pub mod engine;
mod error_ext;
pub mod hybrid_search;
pub mod indexer;
pub mod producer;
pub mod rerank;
pub mod rrf;
pub mod store;
pub mod trigger;
pub mod watcher;

pub use chunker::{Chunk, Chunker, TokenCounter};
pub use content_hash::{fingerprint, hash_content};
pub use embedder::EmbeddingClient;
pub use engine::{EngineStats, KnowledgeEngine, KnowledgeEngineBuilder, SearchOptions};
pub use hybrid_search::HybridRetriever;
pub use indexer::{path_key, Indexer};
pub use producer::KnowledgeWriter;
pub use rerank::{Reranker, RerankerMode};
pub use rrf::{FusedResult, RrfConfig, RrfFusion};
pub use store::{IndexStore, ScoredChunk, SqliteIndexStore, StoreStats};
pub use trigger::{IndexFailure, LearningTrigger, TriggerStats};
pub use watcher::KnowledgeWatcher;
