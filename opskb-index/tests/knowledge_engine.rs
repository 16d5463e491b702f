//! Integration tests for the knowledge engine
//!
//! These tests drive `KnowledgeEngine` end to end against a real SQLite
//! file and the deterministic providers from `opskb-providers`:
//! - indexing idempotence and atomic replacement
//! - hybrid retrieval, filters and degraded signals
//! - cross-encoder re-ranking and its fallbacks

use opskb_core::config::TokenizerKind;
use opskb_core::prelude::*;
use opskb_index::{path_key, KnowledgeEngine, SearchOptions};
use opskb_providers::mock::{FailingEmbedder, HashEmbedder, Script, ScriptedCrossEncoder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const DIM: usize = 64;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("opskb_index=debug")
        .try_init();
}

fn test_config(dir: &Path) -> KnowledgeConfig {
    let mut config = KnowledgeConfig::default();
    config.store.db_path = dir.join("knowledge.db");
    config.embedding.dimension = DIM;
    config.embedding.initial_backoff_ms = 1;
    config.chunking.tokenizer = TokenizerKind::Whitespace;
    config.chunking.max_tokens = 40;
    config.chunking.overlap_tokens = 10;
    config
}

fn engine_with(config: KnowledgeConfig, encoder: Option<ScriptedCrossEncoder>) -> KnowledgeEngine {
    let mut builder = KnowledgeEngine::builder()
        .config(Arc::new(config))
        .embedding_provider(Arc::new(HashEmbedder::new(DIM)));
    if let Some(encoder) = encoder {
        builder = builder.cross_encoder(Arc::new(encoder));
    }
    builder.build().unwrap()
}

fn paragraph(tag: &str, words: usize) -> String {
    (0..words)
        .map(|i| format!("{tag}{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn write_doc(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn texts(hits: &[SearchHit]) -> Vec<String> {
    hits.iter().map(|h| h.text.clone()).collect()
}

#[tokio::test]
async fn test_three_paragraph_document_yields_three_chunks() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let engine = engine_with(test_config(temp.path()), None);

    let body = format!(
        "{}\n\n{}\n\n{}",
        paragraph("alpha", 30),
        paragraph("beta", 30),
        paragraph("gamma", 30)
    );
    let path = write_doc(temp.path(), "runbook.md", &body);

    let count = engine.index(&path, SourceType::SkillDoc, None).await.unwrap();
    assert_eq!(count, 3, "90 words at a 40-token budget should give 3 chunks");

    let stats = engine.stats().unwrap();
    assert_eq!(stats.store.total_sources, 1);
    assert_eq!(stats.store.total_chunks, 3);
    assert_eq!(stats.store.embedding_dimension, DIM);
    assert_eq!(stats.embedding_provider, "hash");

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["store"]["total_chunks"], 3);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_reindexing_is_idempotent() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let engine = engine_with(test_config(temp.path()), None);
    let path = write_doc(
        temp.path(),
        "ospf.md",
        "OSPF adjacency stuck in EXSTART.\n\nCheck MTU on both ends of the link.",
    );

    engine.index(&path, SourceType::Solution, None).await.unwrap();
    let options = || SearchOptions::default().top_k(10).rerank(false);
    let first = engine.search("ospf mtu", options()).await.unwrap();

    // Same content again, then a clean remove and re-index
    engine.index(&path, SourceType::Solution, None).await.unwrap();
    let second = engine.search("ospf mtu", options()).await.unwrap();
    assert_eq!(texts(&first), texts(&second));

    assert!(engine.remove(&path).await.unwrap());
    assert!(engine.search("ospf mtu", options()).await.unwrap().is_empty());

    engine.index(&path, SourceType::Solution, None).await.unwrap();
    let third = engine.search("ospf mtu", options()).await.unwrap();
    assert_eq!(texts(&first), texts(&third));
    assert_eq!(engine.stats().unwrap().store.total_chunks, first.len());

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_search_never_sees_mixed_versions() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let engine = Arc::new(engine_with(test_config(temp.path()), None));

    let version = |paragraphs: usize| {
        (0..paragraphs)
            .map(|p| format!("marker {}", paragraph(&format!("v{paragraphs}p{p}w"), 29)))
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    let short = version(3);
    let long = version(5);

    let path = write_doc(temp.path(), "flap.md", &short);
    let key = path_key(&path);
    assert_eq!(engine.index(&path, SourceType::Report, None).await.unwrap(), 3);

    let writer = {
        let engine = Arc::clone(&engine);
        let path = path.clone();
        tokio::spawn(async move {
            for round in 0..20 {
                let body = if round % 2 == 0 { &long } else { &short };
                std::fs::write(&path, body).unwrap();
                engine.index(&path, SourceType::Report, None).await.unwrap();
            }
        })
    };

    let mut searches = Vec::new();
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        let key = key.clone();
        searches.push(tokio::spawn(async move {
            for _ in 0..25 {
                let results = engine
                    .search_results("marker", SearchOptions::default().top_k(50).rerank(false))
                    .await
                    .unwrap();
                let visible = results
                    .iter()
                    .filter(|r| r.chunk.source_path == key)
                    .count();
                assert!(
                    visible == 3 || visible == 5,
                    "search saw {visible} chunks, a mix of two versions"
                );
                let generations: std::collections::HashSet<i64> =
                    results.iter().map(|r| r.chunk.generation).collect();
                assert_eq!(generations.len(), 1);
            }
        }));
    }

    writer.await.unwrap();
    for search in searches {
        search.await.unwrap();
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn test_empty_query_returns_nothing() {
    let temp = TempDir::new().unwrap();
    let engine = engine_with(test_config(temp.path()), None);
    let path = write_doc(temp.path(), "a.md", "BGP neighbor down on edge router.");
    engine.index(&path, SourceType::Report, None).await.unwrap();

    assert!(engine.search("", SearchOptions::default()).await.unwrap().is_empty());
    assert!(engine.search("   \t", SearchOptions::default()).await.unwrap().is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_keyword_and_vector_agree_on_best_match() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let engine = engine_with(test_config(temp.path()), None);

    let x = write_doc(temp.path(), "x.md", "BGP peering flapped on the edge router overnight.");
    let y = write_doc(temp.path(), "y.md", "BGP neighbor went down after a maintenance window.");
    let z = write_doc(temp.path(), "z.md", "Disk usage alarm on the storage array.");
    for path in [&x, &y, &z] {
        engine.index(path, SourceType::Report, None).await.unwrap();
    }

    let hits = engine
        .search("BGP neighbor down", SearchOptions::default().top_k(3).rerank(false))
        .await
        .unwrap();
    assert!(hits.len() >= 2);
    assert_eq!(hits[0].source_path, path_key(&y));
    assert_eq!(hits[1].source_path, path_key(&x));
    assert!(hits[0].score > hits[1].score);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_filters_restrict_results() {
    let temp = TempDir::new().unwrap();
    let engine = engine_with(test_config(temp.path()), None);

    let junos = write_doc(temp.path(), "junos.md", "Interface flapping fixed by replacing optic.");
    let eos = write_doc(temp.path(), "eos.md", "Interface flapping caused by duplex mismatch.");
    let skill = write_doc(temp.path(), "skill.md", "Procedure for checking interface flapping.");
    engine.index(&junos, SourceType::Solution, Some("junos".into())).await.unwrap();
    engine.index(&eos, SourceType::Solution, Some("eos".into())).await.unwrap();
    engine.index(&skill, SourceType::SkillDoc, None).await.unwrap();

    let by_platform = engine
        .search(
            "interface flapping",
            SearchOptions::default().filter(SearchFilter::platform("junos")),
        )
        .await
        .unwrap();
    assert!(!by_platform.is_empty());
    assert!(by_platform.iter().all(|h| h.platform.as_deref() == Some("junos")));

    let by_type = engine
        .search(
            "interface flapping",
            SearchOptions::default().filter(SearchFilter::source_type(SourceType::Solution)),
        )
        .await
        .unwrap();
    assert_eq!(by_type.len(), 2);
    assert!(by_type.iter().all(|h| h.source_type == SourceType::Solution));

    let combined = engine
        .search(
            "interface flapping",
            SearchOptions::default()
                .filter(SearchFilter::source_type(SourceType::Solution).with_platform("eos")),
        )
        .await
        .unwrap();
    assert_eq!(combined.len(), 1);
    assert_eq!(combined[0].source_path, path_key(&eos));

    let nothing = engine
        .search(
            "interface flapping",
            SearchOptions::default().filter(SearchFilter::platform("ios-xr")),
        )
        .await
        .unwrap();
    assert!(nothing.is_empty(), "unmatched filter is an empty success");

    engine.shutdown().await;
}

/// Five single-chunk documents that all match "link down"
async fn five_link_docs(engine: &KnowledgeEngine, dir: &Path) {
    let bodies = [
        "link down on uplink one",
        "link down after power event",
        "uplink link flapped then went down",
        "link errors before it went down",
        "carrier lost, link down, optic replaced",
    ];
    for (i, body) in bodies.iter().enumerate() {
        let path = write_doc(dir, &format!("link{i}.md"), body);
        engine.index(&path, SourceType::Report, None).await.unwrap();
    }
}

#[tokio::test]
async fn test_reranker_reorders_fused_candidates() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let engine = engine_with(test_config(temp.path()), Some(ScriptedCrossEncoder::reversing()));
    assert!(engine.reranker_mode().is_active());
    five_link_docs(&engine, temp.path()).await;

    let fused = engine
        .search_results("link down", SearchOptions::default().top_k(5).rerank(false))
        .await
        .unwrap();
    assert_eq!(fused.len(), 5);

    let reranked = engine
        .search_results("link down", SearchOptions::default().top_k(5))
        .await
        .unwrap();
    let fused_ids: Vec<i64> = fused.iter().rev().map(|r| r.chunk.id).collect();
    let reranked_ids: Vec<i64> = reranked.iter().map(|r| r.chunk.id).collect();
    assert_eq!(reranked_ids, fused_ids);
    assert_eq!(
        reranked.iter().map(|r| r.rank).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );

    let top3 = engine
        .search_results("link down", SearchOptions::default().top_k(3))
        .await
        .unwrap();
    assert_eq!(
        top3.iter().map(|r| r.chunk.id).collect::<Vec<_>>(),
        fused_ids[..3].to_vec()
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_reranker_failures_fall_back_to_fused_order() {
    init_tracing();
    let scripts = [
        Script::Panic,
        Script::Fail(ProviderError::Unavailable("model offline".into())),
        Script::WrongCount(2),
    ];

    for script in scripts {
        let temp = TempDir::new().unwrap();
        let engine = engine_with(test_config(temp.path()), Some(ScriptedCrossEncoder::new(script.clone())));
        five_link_docs(&engine, temp.path()).await;

        let fused = engine
            .search_results("link down", SearchOptions::default().top_k(4).rerank(false))
            .await
            .unwrap();
        let fallback = engine
            .search_results("link down", SearchOptions::default().top_k(4))
            .await
            .unwrap_or_else(|e| panic!("{script:?} should not fail the search: {e}"));

        assert_eq!(
            fallback.iter().map(|r| r.chunk.id).collect::<Vec<_>>(),
            fused.iter().map(|r| r.chunk.id).collect::<Vec<_>>(),
            "{script:?} should keep the fused order"
        );
        engine.shutdown().await;
    }
}

#[tokio::test]
async fn test_disabled_reranker_is_never_called() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(temp.path());
    config.rerank.enabled = false;

    let encoder = Arc::new(ScriptedCrossEncoder::reversing());
    let engine = KnowledgeEngine::builder()
        .config(Arc::new(config))
        .embedding_provider(Arc::new(HashEmbedder::new(DIM)))
        .cross_encoder(encoder.clone())
        .build()
        .unwrap();
    five_link_docs(&engine, temp.path()).await;

    let hits = engine.search("link down", SearchOptions::default()).await.unwrap();
    assert_eq!(hits.len(), 5);
    assert_eq!(encoder.calls(), 0);
    assert_eq!(engine.stats().unwrap().reranker, "disabled");

    engine.shutdown().await;
}

#[tokio::test]
async fn test_query_embedding_failure_degrades_to_keyword() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());

    let healthy = engine_with(config.clone(), None);
    let doc = write_doc(temp.path(), "vrrp.md", "VRRP master election flapping between peers.");
    healthy.index(&doc, SourceType::Solution, None).await.unwrap();
    healthy.shutdown().await;

    let degraded = KnowledgeEngine::builder()
        .config(Arc::new(config))
        .embedding_provider(Arc::new(FailingEmbedder::unavailable()))
        .build()
        .unwrap();

    let hits = degraded
        .search("vrrp flapping", SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source_path, path_key(&doc));

    // Keyword miss with no vector signal is simply empty
    let none = degraded
        .search("spanning tree", SearchOptions::default())
        .await
        .unwrap();
    assert!(none.is_empty());

    degraded.shutdown().await;
}

#[tokio::test]
async fn test_dimension_change_is_rejected() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let engine = engine_with(config.clone(), None);
    engine.shutdown().await;
    drop(engine);

    let mut wider = config;
    wider.embedding.dimension = DIM * 2;
    let err = KnowledgeEngine::builder()
        .config(Arc::new(wider))
        .embedding_provider(Arc::new(HashEmbedder::new(DIM * 2)))
        .build()
        .err()
        .expect("dimension change should fail");
    assert!(matches!(
        err,
        Error::DimensionMismatch { expected, actual } if expected == DIM && actual == DIM * 2
    ));
}

#[tokio::test]
async fn test_provider_with_wrong_dimension_fails_search() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());

    let healthy = engine_with(config.clone(), None);
    let doc = write_doc(temp.path(), "lacp.md", "LACP bundle member suspended.");
    healthy.index(&doc, SourceType::Solution, None).await.unwrap();
    healthy.shutdown().await;

    // Same index, but the provider now returns wider vectors
    let misconfigured = KnowledgeEngine::builder()
        .config(Arc::new(config))
        .embedding_provider(Arc::new(HashEmbedder::new(DIM * 2)))
        .build()
        .unwrap();

    let err = misconfigured
        .search("lacp bundle", SearchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { .. }), "got {err:?}");
    assert_eq!(err.kind(), "dimension_mismatch");

    misconfigured.shutdown().await;
}
