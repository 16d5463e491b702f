//! `KnowledgeEngine`: one handle over indexing, retrieval and learning
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use opskb_core::prelude::*;
//! # use opskb_index::{KnowledgeEngine, SearchOptions};
//! # async fn run(provider: Arc<dyn EmbeddingProvider>) -> Result<()> {
//! let config = Arc::new(KnowledgeConfig::from_file("opskb.yaml")?);
//! let engine = KnowledgeEngine::builder()
//!     .config(config)
//!     .embedding_provider(provider)
//!     .build()?;
//!
//! engine.index("kb/solutions/bgp-flap.md", SourceType::Solution, Some("junos".into())).await?;
//! let hits = engine
//!     .search("bgp neighbor flapping", SearchOptions::default().top_k(3))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::chunker::Chunker;
use crate::embedder::EmbeddingClient;
use crate::hybrid_search::HybridRetriever;
use crate::indexer::Indexer;
use crate::producer::KnowledgeWriter;
use crate::rerank::{Reranker, RerankerMode};
use crate::store::{IndexStore, SqliteIndexStore, StoreStats};
use crate::trigger::{LearningTrigger, TriggerStats};
use crate::watcher::KnowledgeWatcher;
use opskb_core::config::KnowledgeConfig;
use opskb_core::error::{Error, Result};
use opskb_core::knowledge::{SearchFilter, SearchHit, SearchResult, SourceType};
use opskb_core::rag::{CrossEncoder, EmbeddingProvider};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Per-call search options
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Results wanted; the configured default when unset
    pub top_k: Option<usize>,
    pub filter: SearchFilter,
    /// Apply the cross-encoder when one is active
    pub rerank: bool,
    /// Deadline for the retrieval phase; the configured one when unset
    pub timeout: Option<Duration>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: None,
            filter: SearchFilter::default(),
            rerank: true,
            timeout: None,
        }
    }
}

impl SearchOptions {
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn filter(mut self, filter: SearchFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn rerank(mut self, rerank: bool) -> Self {
        self.rerank = rerank;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Engine-wide statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub store: StoreStats,
    pub trigger: TriggerStats,
    pub reranker: String,
    pub embedding_provider: String,
}

/// Knowledge retrieval and continuous-learning engine
pub struct KnowledgeEngine {
    config: Arc<KnowledgeConfig>,
    store: Arc<dyn IndexStore>,
    embedder: Arc<EmbeddingClient>,
    indexer: Arc<Indexer>,
    retriever: HybridRetriever,
    reranker: Reranker,
    trigger: Arc<LearningTrigger>,
}

impl KnowledgeEngine {
    pub fn builder() -> KnowledgeEngineBuilder {
        KnowledgeEngineBuilder::default()
    }

    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn IndexStore> {
        Arc::clone(&self.store)
    }

    pub fn indexer(&self) -> Arc<Indexer> {
        Arc::clone(&self.indexer)
    }

    pub fn reranker_mode(&self) -> &RerankerMode {
        self.reranker.mode()
    }

    /// Index one document, returning its chunk count
    pub async fn index(&self, path: impl AsRef<Path>, source_type: SourceType, platform: Option<String>) -> Result<usize> {
        self.indexer.index(path, source_type, platform).await
    }

    /// Index every `.md`/`.txt` file under `root`
    pub async fn index_directory(&self, root: impl AsRef<Path>, source_type: SourceType, platform: Option<String>) -> Result<usize> {
        self.indexer.index_directory(root, source_type, platform).await
    }

    pub async fn remove(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.indexer.remove(path).await
    }

    /// Ranked passages for `query`
    ///
    /// An empty list means nothing matched; a failed search is an error.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<SearchHit>> {
        Ok(self
            .search_results(query, options)
            .await?
            .into_iter()
            .map(SearchHit::from)
            .collect())
    }

    /// Like [`search`](Self::search), keeping chunk ids and ranks
    pub async fn search_results(&self, query: &str, options: SearchOptions) -> Result<Vec<SearchResult>> {
        let top_k = options.top_k.unwrap_or(self.config.search.default_top_k);
        let timeout = options
            .timeout
            .or_else(|| self.config.search.timeout_ms.map(Duration::from_millis));

        let candidates = self
            .retriever
            .candidates(query, &options.filter, timeout)
            .await?;

        let results = if options.rerank && self.reranker.is_active() {
            self.reranker.rerank(query, candidates, top_k).await
        } else {
            let mut candidates = candidates;
            candidates.truncate(top_k);
            candidates
        };

        debug!(query, top_k, returned = results.len(), "Search complete");
        Ok(results)
    }

    /// The learning trigger producers should notify
    pub fn trigger(&self) -> Arc<LearningTrigger> {
        Arc::clone(&self.trigger)
    }

    /// Writer for the knowledge root at `root`
    pub fn writer(&self, root: impl Into<PathBuf>) -> KnowledgeWriter {
        KnowledgeWriter::new(root, self.trigger())
    }

    /// Watcher for the knowledge root at `root` (call `start()` on it)
    pub fn watcher(&self, root: impl Into<PathBuf>) -> KnowledgeWatcher {
        KnowledgeWatcher::new(root, self.trigger(), self.indexer())
    }

    pub fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            store: self.store.stats()?,
            trigger: self.trigger.stats(),
            reranker: self.reranker.mode().to_string(),
            embedding_provider: self.embedder.provider_name().to_string(),
        })
    }

    /// Drain queued background indexing
    pub async fn shutdown(&self) {
        self.trigger.shutdown().await;
    }
}

/// Builder for [`KnowledgeEngine`]
#[derive(Default)]
pub struct KnowledgeEngineBuilder {
    config: Option<Arc<KnowledgeConfig>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    store: Option<Arc<dyn IndexStore>>,
}

impl KnowledgeEngineBuilder {
    pub fn config(mut self, config: Arc<KnowledgeConfig>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    pub fn cross_encoder(mut self, encoder: Arc<dyn CrossEncoder>) -> Self {
        self.cross_encoder = Some(encoder);
        self
    }

    /// Use `store` instead of opening the configured SQLite file
    pub fn store(mut self, store: Arc<dyn IndexStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate configuration, open the store and start the trigger workers
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<KnowledgeEngine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let provider = self
            .embedding_provider
            .ok_or_else(|| Error::config("embedding provider is required"))?;

        let store: Arc<dyn IndexStore> = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteIndexStore::open(
                &config.store.db_path,
                config.embedding.dimension,
                config.store.read_pool_size,
            )?),
        };

        let embedder = Arc::new(EmbeddingClient::new(provider, config.embedding.clone()));
        let chunker = Chunker::from_config(&config.chunking)?;
        let indexer = Arc::new(Indexer::new(Arc::clone(&store), chunker, Arc::clone(&embedder)));
        let retriever = HybridRetriever::new(Arc::clone(&store), Arc::clone(&embedder), &config.fusion);
        let reranker = Reranker::new(RerankerMode::resolve(&config.rerank, self.cross_encoder));
        let trigger = LearningTrigger::spawn(Arc::clone(&indexer), config.trigger.workers);

        info!(
            provider = embedder.provider_name(),
            model = embedder.model(),
            dimension = embedder.dimension(),
            reranker = %reranker.mode(),
            "Knowledge engine ready"
        );

        Ok(KnowledgeEngine {
            config,
            store,
            embedder,
            indexer,
            retriever,
            reranker,
            trigger,
        })
    }
}
