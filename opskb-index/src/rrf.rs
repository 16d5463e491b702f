//! Reciprocal Rank Fusion (RRF) algorithm for hybrid search
//!
//! Combines the keyword (BM25) and vector (cosine) ranked lists into a single
//! ranking. Only ranks matter: a chunk contributes `weight / (k + rank)` for
//! every list it appears in, with 1-based ranks, and nothing for a list it is
//! absent from.

use crate::store::ScoredChunk;
use opskb_core::config::FusionConfig;
use opskb_core::knowledge::{KnowledgeChunk, SearchResult};
use std::cmp::Ordering;
use std::collections::HashMap;

/// RRF configuration parameters
#[derive(Debug, Clone)]
pub struct RrfConfig {
    /// RRF constant (k parameter, typically 60)
    /// Higher values reduce the impact of high-ranking items
    pub k: usize,
    /// Weight for keyword results (default: 0.3)
    pub keyword_weight: f64,
    /// Weight for vector results (default: 0.7)
    pub vector_weight: f64,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self::from(&FusionConfig::default())
    }
}

impl From<&FusionConfig> for RrfConfig {
    fn from(config: &FusionConfig) -> Self {
        Self {
            k: config.rrf_k,
            keyword_weight: config.keyword_weight,
            vector_weight: config.vector_weight,
        }
    }
}

/// Result from fusion
#[derive(Debug, Clone)]
pub struct FusedResult {
    pub chunk: KnowledgeChunk,
    /// Combined RRF score
    pub rrf_score: f64,
    /// 1-based keyword rank (if present)
    pub keyword_rank: Option<usize>,
    /// 1-based vector rank (if present)
    pub vector_rank: Option<usize>,
    pub keyword_score: Option<f64>,
    pub vector_score: Option<f64>,
}

impl FusedResult {
    /// Best rank across both lists
    pub fn best_rank(&self) -> usize {
        match (self.keyword_rank, self.vector_rank) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => usize::MAX,
        }
    }
}

/// Reciprocal Rank Fusion implementation
pub struct RrfFusion {
    config: RrfConfig,
}

impl RrfFusion {
    /// Create a new RRF fusion with default configuration
    pub fn new() -> Self {
        Self::with_config(RrfConfig::default())
    }

    /// Create RRF fusion with custom configuration
    pub fn with_config(config: RrfConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RrfConfig {
        &self.config
    }

    /// Fuse keyword and vector search results
    ///
    /// Both inputs are best-first. Output is sorted by fused score
    /// descending, then best single-list rank, then chunk id, so equal
    /// inputs always give equal outputs.
    pub fn fuse(&self, keyword_results: &[ScoredChunk], vector_results: &[ScoredChunk]) -> Vec<FusedResult> {
        let mut scores: HashMap<i64, FusedResultBuilder> = HashMap::new();

        for (idx, (chunk, score)) in keyword_results.iter().enumerate() {
            let rank = idx + 1;
            let contribution = self.config.keyword_weight / (self.config.k + rank) as f64;
            scores
                .entry(chunk.id)
                .or_insert_with(|| FusedResultBuilder::new(chunk.clone()))
                .add_keyword(rank, *score, contribution);
        }

        for (idx, (chunk, score)) in vector_results.iter().enumerate() {
            let rank = idx + 1;
            let contribution = self.config.vector_weight / (self.config.k + rank) as f64;
            scores
                .entry(chunk.id)
                .or_insert_with(|| FusedResultBuilder::new(chunk.clone()))
                .add_vector(rank, *score, contribution);
        }

        let mut results: Vec<FusedResult> = scores.into_values().map(|b| b.build()).collect();
        results.sort_by(compare_fused);
        results
    }

    /// Fuse and project to ranked search results, keeping at most `limit`
    pub fn fuse_ranked(&self, keyword_results: &[ScoredChunk], vector_results: &[ScoredChunk], limit: usize) -> Vec<SearchResult> {
        self.fuse(keyword_results, vector_results)
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(idx, fused)| SearchResult {
                chunk: fused.chunk,
                score: fused.rrf_score,
                rank: idx + 1,
            })
            .collect()
    }
}

impl Default for RrfFusion {
    fn default() -> Self {
        Self::new()
    }
}

fn compare_fused(a: &FusedResult, b: &FusedResult) -> Ordering {
    b.rrf_score
        .total_cmp(&a.rrf_score)
        .then_with(|| a.best_rank().cmp(&b.best_rank()))
        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
}

/// Builder for FusedResult
struct FusedResultBuilder {
    chunk: KnowledgeChunk,
    rrf_score: f64,
    keyword_rank: Option<usize>,
    vector_rank: Option<usize>,
    keyword_score: Option<f64>,
    vector_score: Option<f64>,
}

impl FusedResultBuilder {
    fn new(chunk: KnowledgeChunk) -> Self {
        Self {
            chunk,
            rrf_score: 0.0,
            keyword_rank: None,
            vector_rank: None,
            keyword_score: None,
            vector_score: None,
        }
    }

    fn add_keyword(&mut self, rank: usize, score: f64, rrf_contribution: f64) {
        // A list never repeats a chunk; keep the first (best) rank if it does
        if self.keyword_rank.is_none() {
            self.keyword_rank = Some(rank);
            self.keyword_score = Some(score);
            self.rrf_score += rrf_contribution;
        }
    }

    fn add_vector(&mut self, rank: usize, score: f64, rrf_contribution: f64) {
        if self.vector_rank.is_none() {
            self.vector_rank = Some(rank);
            self.vector_score = Some(score);
            self.rrf_score += rrf_contribution;
        }
    }

    fn build(self) -> FusedResult {
        FusedResult {
            chunk: self.chunk,
            rrf_score: self.rrf_score,
            keyword_rank: self.keyword_rank,
            vector_rank: self.vector_rank,
            keyword_score: self.keyword_score,
            vector_score: self.vector_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opskb_core::knowledge::SourceType;
    use std::collections::HashSet;

    fn chunk(id: i64) -> KnowledgeChunk {
        KnowledgeChunk {
            id,
            source_id: 1,
            source_path: format!("doc{id}.md"),
            position: 0,
            text: format!("chunk {id}"),
            token_count: 2,
            source_type: SourceType::Solution,
            platform: None,
            generation: 1,
        }
    }

    fn list(ids: &[i64]) -> Vec<ScoredChunk> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| (chunk(*id), 1.0 / (i + 1) as f64))
            .collect()
    }

    fn ids(results: &[FusedResult]) -> Vec<i64> {
        results.iter().map(|r| r.chunk.id).collect()
    }

    #[test]
    fn test_rrf_basic() {
        let fusion = RrfFusion::new();
        let results = fusion.fuse(&list(&[1, 2, 3]), &list(&[3, 1, 4]));

        assert_eq!(results.len(), 4);
        assert!(results[0].chunk.id == 1 || results[0].chunk.id == 3);

        let c1 = results.iter().find(|r| r.chunk.id == 1).unwrap();
        assert_eq!(c1.keyword_rank, Some(1));
        assert_eq!(c1.vector_rank, Some(2));
    }

    #[test]
    fn test_rrf_single_list() {
        let fusion = RrfFusion::new();

        let keyword_only = fusion.fuse(&list(&[1, 2]), &[]);
        assert_eq!(ids(&keyword_only), vec![1, 2]);
        assert!(keyword_only[0].vector_rank.is_none());

        let vector_only = fusion.fuse(&[], &list(&[2, 1]));
        assert_eq!(ids(&vector_only), vec![2, 1]);
        assert!(vector_only[0].keyword_rank.is_none());
    }

    #[test]
    fn test_rrf_empty() {
        assert!(RrfFusion::new().fuse(&[], &[]).is_empty());
    }

    #[test]
    fn test_rrf_ranking_formula() {
        let fusion = RrfFusion::new();
        let results = fusion.fuse(&list(&[7]), &list(&[7]));

        // rank 1 in both: 0.7/61 + 0.3/61
        assert!((results[0].rrf_score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_absent_list_contributes_nothing() {
        let fusion = RrfFusion::new();
        let results = fusion.fuse(&list(&[1]), &list(&[2]));
        let c1 = results.iter().find(|r| r.chunk.id == 1).unwrap();
        assert!((c1.rrf_score - 0.3 / 61.0).abs() < 1e-12);
        // vector weight dominates at equal rank
        assert_eq!(results[0].chunk.id, 2);
    }

    #[test]
    fn test_scenario_weighted_fusion() {
        // keyword: [c1, c2, c3], vector: [c3, c4, c1]
        let fusion = RrfFusion::new();
        let results = fusion.fuse(&list(&[1, 2, 3]), &list(&[3, 4, 1]));

        let score = |id: i64| results.iter().find(|r| r.chunk.id == id).unwrap().rrf_score;
        let c3 = 0.7 / 61.0 + 0.3 / 63.0;
        let c1 = 0.3 / 61.0 + 0.7 / 63.0;
        let c4 = 0.7 / 62.0;
        let c2 = 0.3 / 62.0;
        assert!((score(3) - c3).abs() < 1e-12);
        assert!((score(1) - c1).abs() < 1e-12);
        assert!((score(4) - c4).abs() < 1e-12);
        assert!((score(2) - c2).abs() < 1e-12);
        assert_eq!(ids(&results), vec![3, 1, 4, 2]);
    }

    #[test]
    fn test_ties_break_on_best_rank_then_id() {
        let fusion = RrfFusion::with_config(RrfConfig {
            k: 60,
            keyword_weight: 1.0,
            vector_weight: 1.0,
        });

        // 10 and 20 swap places across lists: equal scores, equal best rank
        let results = fusion.fuse(&list(&[20, 10]), &list(&[10, 20]));
        assert_eq!(ids(&results), vec![10, 20]);

        // Identical fused score, but 5 holds rank 1 somewhere
        let fusion = RrfFusion::with_config(RrfConfig {
            k: 0,
            keyword_weight: 1.0,
            vector_weight: 1.0,
        });
        // id 9: 1/2 + 1/2 = 1.0 ; id 5: 1/1 only = 1.0
        let results = fusion.fuse(&list(&[5, 9]), &list(&[3, 9]));
        let top: Vec<i64> = ids(&results).into_iter().take(3).collect();
        assert_eq!(top, vec![3, 5, 9]);
    }

    #[test]
    fn test_fusion_monotonicity() {
        let fusion = RrfFusion::new();
        // A (1) outranks B (2) in both lists
        let results = fusion.fuse(&list(&[1, 5, 2]), &list(&[6, 1, 7, 2]));
        let score = |id: i64| results.iter().find(|r| r.chunk.id == id).unwrap().rrf_score;
        assert!(score(1) >= score(2));
    }

    #[test]
    fn test_fusion_closure() {
        let fusion = RrfFusion::new();
        let keyword = list(&[1, 2, 3, 8]);
        let vector = list(&[3, 4, 5, 1]);
        let results = fusion.fuse(&keyword, &vector);

        let fused: HashSet<i64> = ids(&results).into_iter().collect();
        let union: HashSet<i64> = keyword.iter().chain(vector.iter()).map(|(c, _)| c.id).collect();
        assert_eq!(fused, union);
    }

    #[test]
    fn test_fuse_ranked_truncates_and_numbers() {
        let fusion = RrfFusion::new();
        let ranked = fusion.fuse_ranked(&list(&[1, 2, 3]), &list(&[3, 4, 1]), 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].chunk.id, 3);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
    }
}
