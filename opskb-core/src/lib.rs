//! # opskb-core
//!
//! Core types, configuration and provider traits shared by the opskb
//! knowledge engine.
//!
//! This crate provides:
//! - Error taxonomy (`error`) - read, embedding, store and config failures
//! - Configuration (`config`) - immutable, YAML-loadable settings
//! - Logging (`logging`) - tracing setup with file rotation
//! - Data model (`knowledge`) - sources, chunks, filters, search results
//! - Provider traits (`rag`) - embedding providers and cross-encoders

pub mod config;
pub mod error;
pub mod knowledge;
pub mod logging;
pub mod rag;

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::config::KnowledgeConfig;
    pub use crate::error::{Error, ProviderError, Result};
    pub use crate::knowledge::{
        KnowledgeChunk, KnowledgeSource, NewChunk, ProducerEvent, SearchFilter, SearchHit,
        SearchResult, SourceRecord, SourceType,
    };
    pub use crate::rag::{CrossEncoder, EmbeddingProvider};
}
