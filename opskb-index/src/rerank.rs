//! Cross-encoder re-ranking of fused candidates
//!
//! The reranker is a pure reorder: it never adds, drops (beyond `top_k`) or
//! fabricates candidates, and it never fails. A disabled, unavailable or
//! misbehaving cross-encoder leaves the fused order in place.

use futures::FutureExt;
use opskb_core::config::RerankConfig;
use opskb_core::knowledge::SearchResult;
use opskb_core::rag::CrossEncoder;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reranker capability, resolved once at startup
#[derive(Clone)]
pub enum RerankerMode {
    /// Turned off by configuration
    Disabled,
    /// Wanted, but no cross-encoder could be provided
    Unavailable(String),
    Active(Arc<dyn CrossEncoder>),
}

impl RerankerMode {
    /// Pick the mode from configuration and whatever cross-encoder loaded
    pub fn resolve(config: &RerankConfig, encoder: Option<Arc<dyn CrossEncoder>>) -> Self {
        let mode = match (config.enabled, encoder) {
            (false, _) => Self::Disabled,
            (true, Some(encoder)) => Self::Active(encoder),
            (true, None) => Self::Unavailable("no cross-encoder configured".to_string()),
        };
        info!(mode = %mode, "Reranker resolved");
        mode
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}

impl fmt::Display for RerankerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("disabled"),
            Self::Unavailable(reason) => write!(f, "unavailable ({reason})"),
            Self::Active(encoder) => write!(f, "active ({})", encoder.name()),
        }
    }
}

impl fmt::Debug for RerankerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Reorders fused candidates with a cross-encoder when one is active
pub struct Reranker {
    mode: RerankerMode,
}

impl Reranker {
    pub fn new(mode: RerankerMode) -> Self {
        Self { mode }
    }

    pub fn disabled() -> Self {
        Self::new(RerankerMode::Disabled)
    }

    pub fn mode(&self) -> &RerankerMode {
        &self.mode
    }

    pub fn is_active(&self) -> bool {
        self.mode.is_active()
    }

    /// Rerank `candidates` and keep the best `top_k`
    ///
    /// Output size is `min(top_k, candidates.len())` and every output chunk
    /// comes from the input. Scores become cross-encoder relevance when the
    /// reorder happened, and stay fused scores otherwise.
    pub async fn rerank(&self, query: &str, candidates: Vec<SearchResult>, top_k: usize) -> Vec<SearchResult> {
        let RerankerMode::Active(encoder) = &self.mode else {
            return fallback(candidates, top_k);
        };
        if candidates.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let passages: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
        let outcome = AssertUnwindSafe(encoder.score(query, &passages))
            .catch_unwind()
            .await;

        let scores = match outcome {
            Ok(Ok(scores)) if scores.len() != candidates.len() => {
                warn!(
                    encoder = encoder.name(),
                    expected = candidates.len(),
                    got = scores.len(),
                    "Cross-encoder returned wrong number of scores, keeping fused order"
                );
                return fallback(candidates, top_k);
            }
            Ok(Ok(scores)) if scores.iter().any(|s| !s.is_finite()) => {
                warn!(encoder = encoder.name(), "Cross-encoder returned non-finite scores, keeping fused order");
                return fallback(candidates, top_k);
            }
            Ok(Ok(scores)) => scores,
            Ok(Err(e)) => {
                warn!(encoder = encoder.name(), error = %e, "Cross-encoder failed, keeping fused order");
                return fallback(candidates, top_k);
            }
            Err(_) => {
                warn!(encoder = encoder.name(), "Cross-encoder panicked, keeping fused order");
                return fallback(candidates, top_k);
            }
        };

        let mut scored: Vec<(SearchResult, f32)> = candidates.into_iter().zip(scores).collect();
        // stable: equal relevance keeps fused order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let reranked: Vec<SearchResult> = scored
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(idx, (mut result, score))| {
                result.score = score as f64;
                result.rank = idx + 1;
                result
            })
            .collect();

        debug!(encoder = encoder.name(), kept = reranked.len(), "Reranked candidates");
        reranked
    }
}

fn fallback(mut candidates: Vec<SearchResult>, top_k: usize) -> Vec<SearchResult> {
    candidates.truncate(top_k);
    for (idx, result) in candidates.iter_mut().enumerate() {
        result.rank = idx + 1;
    }
    candidates
}
