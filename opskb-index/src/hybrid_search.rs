//! Hybrid retriever combining keyword and vector similarity search
//!
//! Runs BM25 (FTS5) and cosine search side by side against the same filter,
//! then merges the two ranked lists with RRF fusion.

use crate::embedder::EmbeddingClient;
use crate::rrf::{RrfConfig, RrfFusion};
use crate::store::{IndexStore, ScoredChunk};
use opskb_core::config::FusionConfig;
use opskb_core::error::{Error, Result};
use opskb_core::knowledge::{SearchFilter, SearchResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// How one search signal ended
enum Signal {
    Hits(Vec<ScoredChunk>),
    /// Query embedding failed; the vector side was never run
    Skipped,
    /// Fatal configuration error; never degraded around
    Misconfigured(Error),
    Failed(Error),
    TimedOut,
}

impl Signal {
    fn label(&self) -> &'static str {
        match self {
            Self::Hits(_) => "hits",
            Self::Skipped => "skipped",
            Self::Misconfigured(_) => "misconfigured",
            Self::Failed(_) => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Hybrid retriever
pub struct HybridRetriever {
    store: Arc<dyn IndexStore>,
    embedder: Arc<EmbeddingClient>,
    fusion: RrfFusion,
    candidate_n: usize,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn IndexStore>, embedder: Arc<EmbeddingClient>, config: &FusionConfig) -> Self {
        Self {
            store,
            embedder,
            fusion: RrfFusion::with_config(RrfConfig::from(config)),
            candidate_n: config.candidate_n,
        }
    }

    /// Candidates fetched from each mode and returned from fusion
    pub fn candidate_n(&self) -> usize {
        self.candidate_n
    }

    /// Hybrid search truncated to `top_k`, for callers without a reranker
    pub async fn search(&self, query: &str, top_k: usize, filter: &SearchFilter) -> Result<Vec<SearchResult>> {
        let mut results = self.candidates(query, filter, None).await?;
        results.truncate(top_k);
        Ok(results)
    }

    /// Up to `candidate_n` fused results, best first
    ///
    /// Degrades to keyword-only when the query cannot be embedded, and to
    /// whichever mode succeeded when the other one fails. With a `timeout`,
    /// a mode still running at the deadline is dropped; if neither finished
    /// the call fails with [`Error::SearchTimeout`].
    pub async fn candidates(&self, query: &str, filter: &SearchFilter, timeout: Option<Duration>) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        debug!(query, candidate_n = self.candidate_n, filtered = !filter.is_empty(), "Hybrid search");

        let deadline = timeout.map(|t| Instant::now() + t);
        let (keyword, vector) = tokio::join!(
            with_deadline(deadline, self.keyword_signal(query, filter)),
            with_deadline(deadline, self.vector_signal(query, filter)),
        );
        debug!(keyword = keyword.label(), vector = vector.label(), "Search signals finished");

        let (keyword, vector) = match (keyword, vector) {
            (Signal::Misconfigured(e), _) | (_, Signal::Misconfigured(e)) => return Err(e),
            (Signal::Hits(k), Signal::Hits(v)) => (k, v),
            (Signal::Hits(k), other) => {
                if let Signal::Failed(e) = &other {
                    warn!(error = %e, "Vector search failed, using keyword results only");
                }
                (k, Vec::new())
            }
            (other, Signal::Hits(v)) => {
                if let Signal::Failed(e) = &other {
                    warn!(error = %e, "Keyword search failed, using vector results only");
                }
                (Vec::new(), v)
            }
            (Signal::Failed(e), _) | (_, Signal::Failed(e)) => return Err(e),
            (Signal::TimedOut, _) | (_, Signal::TimedOut) => {
                return Err(Error::SearchTimeout(timeout.unwrap_or_default()));
            }
            (Signal::Skipped, Signal::Skipped) => (Vec::new(), Vec::new()),
        };

        let (keyword, vector) = newest_generation_only(keyword, vector);
        debug!(keyword = keyword.len(), vector = vector.len(), "Fusing ranked lists");

        let fused = self.fusion.fuse_ranked(&keyword, &vector, self.candidate_n);
        debug!("RRF fusion produced {} results", fused.len());
        Ok(fused)
    }

    async fn keyword_signal(&self, query: &str, filter: &SearchFilter) -> Signal {
        let store = Arc::clone(&self.store);
        let query = query.to_string();
        let filter = filter.clone();
        let limit = self.candidate_n;
        join_blocking(tokio::task::spawn_blocking(move || store.keyword_search(&query, limit, &filter)).await)
    }

    async fn vector_signal(&self, query: &str, filter: &SearchFilter) -> Signal {
        let query_vector = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e @ Error::DimensionMismatch { .. }) => {
                error!(error = %e, "Query embedding has the wrong dimension, failing search");
                return Signal::Misconfigured(e);
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "Query embedding failed, degrading to keyword-only search");
                return Signal::Skipped;
            }
        };

        let store = Arc::clone(&self.store);
        let filter = filter.clone();
        let limit = self.candidate_n;
        join_blocking(
            tokio::task::spawn_blocking(move || store.vector_search(&query_vector, limit, &filter)).await,
        )
    }
}

async fn with_deadline(deadline: Option<Instant>, signal: impl std::future::Future<Output = Signal>) -> Signal {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, signal)
            .await
            .unwrap_or(Signal::TimedOut),
        None => signal.await,
    }
}

fn join_blocking(joined: std::result::Result<Result<Vec<ScoredChunk>>, tokio::task::JoinError>) -> Signal {
    match joined {
        Ok(Ok(hits)) => Signal::Hits(hits),
        Ok(Err(e @ Error::DimensionMismatch { .. })) => Signal::Misconfigured(e),
        Ok(Err(e)) => Signal::Failed(e),
        Err(e) => Signal::Failed(Error::store(format!("search task failed: {e}"))),
    }
}

/// Drop chunks from superseded generations of a source
///
/// The two modes read in separate transactions, so a re-index landing in
/// between can leave one list on the old chunk set and the other on the new.
fn newest_generation_only(keyword: Vec<ScoredChunk>, vector: Vec<ScoredChunk>) -> (Vec<ScoredChunk>, Vec<ScoredChunk>) {
    let mut newest: HashMap<i64, i64> = HashMap::new();
    for (chunk, _) in keyword.iter().chain(vector.iter()) {
        let generation = newest.entry(chunk.source_id).or_insert(chunk.generation);
        if chunk.generation > *generation {
            *generation = chunk.generation;
        }
    }

    let keep = |list: Vec<ScoredChunk>| -> Vec<ScoredChunk> {
        list.into_iter()
            .filter(|(chunk, _)| newest.get(&chunk.source_id) == Some(&chunk.generation))
            .collect()
    };
    (keep(keyword), keep(vector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreStats;
    use async_trait::async_trait;
    use opskb_core::config::EmbeddingConfig;
    use opskb_core::error::ProviderError;
    use opskb_core::knowledge::{KnowledgeChunk, KnowledgeSource, NewChunk, SourceRecord, SourceType};
    use opskb_core::rag::EmbeddingProvider;

    fn chunk(id: i64, source_id: i64, generation: i64) -> KnowledgeChunk {
        KnowledgeChunk {
            id,
            source_id,
            source_path: format!("src{source_id}.md"),
            position: 0,
            text: format!("chunk {id}"),
            token_count: 2,
            source_type: SourceType::Report,
            platform: None,
            generation,
        }
    }

    /// Canned lists, optionally failing or stalling one side
    struct CannedStore {
        keyword: Result<Vec<ScoredChunk>>,
        vector: Result<Vec<ScoredChunk>>,
        stall_keyword: bool,
        stall_vector: bool,
    }

    fn canned(keyword: &[i64], vector: &[i64]) -> CannedStore {
        let to_list = |ids: &[i64]| ids.iter().map(|id| (chunk(*id, *id, 1), 1.0)).collect();
        CannedStore {
            keyword: Ok(to_list(keyword)),
            vector: Ok(to_list(vector)),
            stall_keyword: false,
            stall_vector: false,
        }
    }

    fn replay(list: &Result<Vec<ScoredChunk>>) -> Result<Vec<ScoredChunk>> {
        match list {
            Ok(hits) => Ok(hits.clone()),
            Err(e) => Err(Error::store(e)),
        }
    }

    impl IndexStore for CannedStore {
        fn upsert_source(&self, _source: &KnowledgeSource) -> Result<i64> {
            unimplemented!()
        }
        fn replace_chunks(&self, _source_id: i64, _chunks: &[NewChunk]) -> Result<()> {
            unimplemented!()
        }
        fn index_source(&self, _source: &KnowledgeSource, _fingerprint: &str, _chunks: &[NewChunk]) -> Result<i64> {
            unimplemented!()
        }
        fn keyword_search(&self, _query: &str, limit: usize, _filter: &SearchFilter) -> Result<Vec<ScoredChunk>> {
            if self.stall_keyword {
                std::thread::sleep(Duration::from_millis(500));
            }
            replay(&self.keyword).map(|mut hits| {
                hits.truncate(limit);
                hits
            })
        }
        fn vector_search(&self, _query_vector: &[f32], limit: usize, _filter: &SearchFilter) -> Result<Vec<ScoredChunk>> {
            if self.stall_vector {
                std::thread::sleep(Duration::from_millis(500));
            }
            replay(&self.vector).map(|mut hits| {
                hits.truncate(limit);
                hits
            })
        }
        fn source_by_path(&self, _path: &str) -> Result<Option<SourceRecord>> {
            Ok(None)
        }
        fn chunks_for_source(&self, _source_id: i64) -> Result<Vec<KnowledgeChunk>> {
            Ok(Vec::new())
        }
        fn remove_source(&self, _path: &str) -> Result<bool> {
            Ok(false)
        }
        fn stats(&self) -> Result<StoreStats> {
            Ok(StoreStats::default())
        }
    }

    struct ConstEmbedder {
        fail: bool,
        width: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for ConstEmbedder {
        fn name(&self) -> &str {
            "const"
        }

        async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            if self.fail {
                return Err(ProviderError::Rejected("no".into()));
            }
            Ok(texts
                .iter()
                .map(|_| {
                    let mut v = vec![0.0; self.width];
                    v[0] = 1.0;
                    v
                })
                .collect())
        }
    }

    fn retriever(store: CannedStore, embed_fails: bool) -> HybridRetriever {
        retriever_with(store, ConstEmbedder { fail: embed_fails, width: 2 })
    }

    fn retriever_with(store: CannedStore, provider: ConstEmbedder) -> HybridRetriever {
        let embedder = EmbeddingClient::new(
            Arc::new(provider),
            EmbeddingConfig {
                dimension: 2,
                max_attempts: 1,
                ..Default::default()
            },
        );
        HybridRetriever::new(Arc::new(store), Arc::new(embedder), &FusionConfig::default())
    }

    fn ids(results: &[SearchResult]) -> Vec<i64> {
        results.iter().map(|r| r.chunk.id).collect()
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let r = retriever(canned(&[1], &[1]), false);
        assert!(r.search("", 5, &SearchFilter::default()).await.unwrap().is_empty());
        assert!(r.search("   \n", 5, &SearchFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fused_order_and_truncation() {
        let r = retriever(canned(&[1, 2, 3], &[3, 4, 1]), false);
        let results = r.search("bgp", 2, &SearchFilter::default()).await.unwrap();
        assert_eq!(ids(&results), vec![3, 1]);
        assert_eq!(results[0].rank, 1);

        let all = r.candidates("bgp", &SearchFilter::default(), None).await.unwrap();
        assert_eq!(ids(&all), vec![3, 1, 4, 2]);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_keyword() {
        let r = retriever(canned(&[1, 2], &[9]), true);
        let results = r.search("bgp", 5, &SearchFilter::default()).await.unwrap();
        assert_eq!(ids(&results), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_single_store_failure_degrades() {
        let mut store = canned(&[1, 2], &[5]);
        store.keyword = Err(Error::store("fts corrupted"));
        let r = retriever(store, false);
        assert_eq!(ids(&r.search("bgp", 5, &SearchFilter::default()).await.unwrap()), vec![5]);
    }

    #[tokio::test]
    async fn test_store_failure_in_both_modes_is_an_error() {
        let mut store = canned(&[], &[]);
        store.keyword = Err(Error::store("down"));
        store.vector = Err(Error::store("down"));
        let r = retriever(store, false);
        assert!(matches!(
            r.search("bgp", 5, &SearchFilter::default()).await,
            Err(Error::Store(_))
        ));

        // keyword failing with no vector signal is also a hard failure
        let mut store = canned(&[], &[]);
        store.keyword = Err(Error::store("down"));
        let r = retriever(store, true);
        assert!(r.search("bgp", 5, &SearchFilter::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_returns_finished_signal() {
        let mut store = canned(&[1, 2], &[7]);
        store.stall_vector = true;
        let r = retriever(store, false);
        let results = r
            .candidates("bgp", &SearchFilter::default(), Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(ids(&results), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_timeout_with_nothing_finished_is_an_error() {
        let mut store = canned(&[1, 2], &[7]);
        store.stall_keyword = true;
        store.stall_vector = true;
        let r = retriever(store, false);
        let result = r
            .candidates("bgp", &SearchFilter::default(), Some(Duration::from_millis(100)))
            .await;
        assert!(matches!(result, Err(Error::SearchTimeout(t)) if t == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_wrong_query_dimension_fails_search() {
        let r = retriever_with(canned(&[1, 2], &[7]), ConstEmbedder { fail: false, width: 3 });
        let err = r.search("bgp", 5, &SearchFilter::default()).await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[test]
    fn test_newest_generation_only() {
        let keyword = vec![(chunk(1, 10, 1), 1.0), (chunk(5, 20, 3), 1.0)];
        let vector = vec![(chunk(8, 10, 2), 1.0), (chunk(1, 10, 1), 1.0)];
        let (k, v) = newest_generation_only(keyword, vector);
        assert_eq!(k.iter().map(|(c, _)| c.id).collect::<Vec<_>>(), vec![5]);
        assert_eq!(v.iter().map(|(c, _)| c.id).collect::<Vec<_>>(), vec![8]);
    }
}
