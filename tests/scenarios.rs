//! Cross-module end-to-end tests for the concrete scenarios of spec.md §8,
//! driven entirely through the public API.

use ragcore::config::{
    ChunkConfig, GraphConfig, HybridRetrieverConfig, ReasonerConfig, RouterConfig,
};
use ragcore::graph::{Edge, Node};
use ragcore::query::Strategy;
use ragcore::reasoning::{ChainStatus, DedupStats, HopType, ReasoningChain, ReasoningHop};
use ragcore::retrieval::RetrievalResult;
use ragcore::{Document, KnowledgeGraph, RagConfig, RagEngine};
use proptest::prelude::*;
use std::time::Duration;

fn doc(id: &str, content: &str) -> Document {
    Document::new(id, content)
}

#[tokio::test]
async fn scenario_1_bm25_ordering() {
    let mut config = RagConfig::default();
    config.hybrid = HybridRetrieverConfig {
        use_bm25: true,
        use_vector: false,
        use_reranking: false,
        top_k: 3,
        min_score: 0.0,
        ..HybridRetrieverConfig::default()
    };
    config.chunk.chunk_size = 512;
    let engine = RagEngine::new(config).unwrap();

    engine
        .index_documents(vec![
            doc("d1", "hello world foo"),
            doc("d2", "hello bar baz qux quux"),
            doc("d3", "unrelated text"),
        ])
        .await
        .unwrap();

    let results = engine.retrieve("hello", None).await.unwrap();
    let ids: Vec<String> = results.iter().map(|r| r.chunk_id.clone()).collect();
    assert_eq!(ids, vec!["d1#0", "d2#0"]);
    assert!(!ids.contains(&"d3#0".to_string()));
}

#[tokio::test]
async fn scenario_2_cumulative_idf_statistics() {
    use ragcore::chunker::Chunk;
    use ragcore::retrieval::bm25::Bm25Index;

    let mut index = Bm25Index::new(1.2, 0.75);
    let batch1 = vec![
        Chunk::new("a", "hello world foo", 0, 0, 0, 0),
        Chunk::new("b", "hello bar baz qux quux", 0, 0, 0, 0),
    ];
    index.update_idf_stats(&batch1);
    let batch2 = vec![Chunk::new("c", "single doc", 0, 0, 0, 0)];
    index.update_idf_stats(&batch2);

    let stats = index.stats();
    assert_eq!(stats.n, 3);
    assert_eq!(stats.total_len, 10);
    assert!((stats.avg_len - 10.0 / 3.0).abs() < 1e-6);
}

#[tokio::test]
async fn scenario_3_cycle_detection_in_multi_hop() {
    let mut config = RagConfig::default();
    config.reasoner = ReasonerConfig {
        max_hops: 5,
        min_hops: 1,
        query_refinement: false,
        confidence_threshold: 0.99,
        ..ReasonerConfig::default()
    };
    let engine = RagEngine::new(config).unwrap();
    engine
        .index_documents(vec![doc("d1", "machine learning is a field of artificial intelligence")])
        .await
        .unwrap();

    let chain = engine.reason("What is machine learning?").await;
    assert_eq!(chain.hops.len(), 1);
    assert_eq!(chain.status, ChainStatus::Completed);
}

#[tokio::test]
async fn scenario_4_multi_hop_dedup_by_id() {
    // A conjunction query decomposes into two distinct sub-queries; hop 0
    // runs the full query and hop 1 runs the first sub-query, both
    // retrieving the single indexed chunk.
    let mut config = RagConfig::default();
    config.reasoner = ReasonerConfig {
        max_hops: 2,
        min_hops: 2,
        query_refinement: false,
        confidence_threshold: 0.99,
        ..ReasonerConfig::default()
    };
    let engine = RagEngine::new(config).unwrap();
    engine
        .index_documents(vec![doc(
            "x",
            "quantum entanglement is a phenomenon where particles become correlated",
        )])
        .await
        .unwrap();

    let chain = engine
        .reason("what is quantum entanglement and how does quantum entanglement work")
        .await;
    assert_eq!(chain.hops.len(), 2);
    assert_eq!(chain.unique_documents, 1);
    assert_eq!(chain.total_retrieved, 2);
    assert!(chain.total_dedup_by_id >= 1);
}

#[tokio::test]
async fn scenario_5_knowledge_graph_neighbors_with_a_cycle() {
    let graph = KnowledgeGraph::new(GraphConfig::default());
    let a = graph.add_node(Node::new("entity", "A")).await;
    let b = graph.add_node(Node::new("entity", "B")).await;
    let c = graph.add_node(Node::new("entity", "C")).await;
    graph.add_edge(Edge::new(a.clone(), b.clone(), "rel")).await.unwrap();
    graph.add_edge(Edge::new(b.clone(), c.clone(), "rel")).await.unwrap();
    graph.add_edge(Edge::new(c.clone(), a.clone(), "rel")).await.unwrap();

    let mut neighbors = graph.neighbors(&a, 10).await;
    neighbors.sort();
    let mut expected = vec![b, c];
    expected.sort();
    assert_eq!(neighbors, expected);
    assert!(!neighbors.contains(&a));
}

#[tokio::test]
async fn scenario_6_router_fallback() {
    let mut config = RagConfig::default();
    config.router = RouterConfig {
        confidence_threshold: 0.99,
        fallback_enabled: true,
        fallback_strategy: "bm25".to_string(),
        ..RouterConfig::default()
    };
    let engine = RagEngine::new(config).unwrap();

    let decision = engine.route("x", false).await;
    assert_eq!(decision.selected, Strategy::Bm25);
    assert!(decision.fallback_used);
}

#[tokio::test]
async fn property_5_get_top_documents_sorted_and_deduped() {
    let mut config = RagConfig::default();
    config.reasoner = ReasonerConfig {
        max_hops: 2,
        min_hops: 1,
        confidence_threshold: 0.0,
        ..ReasonerConfig::default()
    };
    let engine = RagEngine::new(config).unwrap();
    engine
        .index_documents(vec![
            doc("a", "rust ownership and borrowing"),
            doc("b", "rust async runtimes"),
        ])
        .await
        .unwrap();

    let chain = engine.reason("rust").await;
    let top = chain.get_top_documents(10);
    let mut ids = std::collections::HashSet::new();
    let mut last_score = f32::INFINITY;
    for r in &top {
        assert!(ids.insert(r.chunk_id.clone()), "duplicate chunk id in top documents");
        assert!(r.final_score <= last_score + 1e-6);
        last_score = r.final_score;
    }
}

#[tokio::test]
async fn property_6_transform_cache_hits_avoid_recomputation() {
    let engine = RagEngine::new(RagConfig::default()).unwrap();
    let first = engine.transform_query("What is Rust?").await.unwrap();
    let second = engine.transform_query("What is Rust?").await.unwrap();
    assert_eq!(first.rewritten, second.rewritten);
    assert_eq!(first.intent, second.intent);
}

#[tokio::test]
async fn property_7_route_multi_weights_sum_to_one() {
    let engine = RagEngine::new(RagConfig::default()).unwrap();
    let weighted = engine.route_multi("compare rust and go for systems programming", 3, false).await;
    let sum: f32 = weighted.iter().map(|w| w.weight).sum();
    assert!(!weighted.is_empty());
    assert!((sum - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn invariant_1_chunk_sizes_respect_min_chunk_size() {
    let mut config = RagConfig::default();
    config.chunk = ChunkConfig {
        chunk_size: 64,
        chunk_overlap: 8,
        min_chunk_size: 16,
        ..ChunkConfig::default()
    };
    let engine = RagEngine::new(config).unwrap();
    let document = doc("doc", &"word ".repeat(500));
    let chunks = engine.chunk_document(&document).await.unwrap();
    assert!(chunks.len() > 1);
    for (i, chunk) in chunks.iter().enumerate() {
        if i + 1 < chunks.len() {
            assert!(chunk.token_count >= 16);
        }
    }
}

#[tokio::test]
async fn invariant_2_index_documents_is_batch_invariant() {
    let config_a = RagConfig::default();
    let engine_a = RagEngine::new(config_a).unwrap();
    engine_a
        .index_documents(vec![doc("a", "alpha beta"), doc("b", "beta gamma")])
        .await
        .unwrap();

    let config_b = RagConfig::default();
    let engine_b = RagEngine::new(config_b).unwrap();
    engine_b.index_documents(vec![doc("a", "alpha beta")]).await.unwrap();
    engine_b.index_documents(vec![doc("b", "beta gamma")]).await.unwrap();

    let results_a = engine_a.retrieve("beta", None).await.unwrap();
    let results_b = engine_b.retrieve("beta", None).await.unwrap();
    assert_eq!(results_a.len(), results_b.len());
    for (ra, rb) in results_a.iter().zip(results_b.iter()) {
        assert_eq!(ra.chunk_id, rb.chunk_id);
        assert!((ra.final_score - rb.final_score).abs() < 1e-5);
    }
}

fn arb_documents() -> impl Strategy<Value = Vec<Document>> {
    proptest::collection::vec(
        proptest::collection::vec(
            prop_oneof![Just("word"), Just("other"), Just("alpha"), Just("beta")],
            1..6,
        ),
        1..4,
    )
    .prop_map(|docs| {
        docs.into_iter()
            .enumerate()
            .map(|(i, words)| doc(&format!("doc{i}"), &words.join(" ")))
            .collect()
    })
}

fn arb_retrieval_result() -> impl Strategy<Value = RetrievalResult> {
    (
        "[a-z]{1,8}",
        "[a-z ]{0,20}",
        0.0f32..1.0,
        0.0f32..1.0,
        0.0f32..1.0,
        proptest::option::of(0.0f32..1.0),
        0.0f32..1.0,
        proptest::option::of(0.0f32..1.0),
    )
        .prop_map(
            |(chunk_id, content, bm25_score, vector_score, hybrid_score, rerank_score, final_score, distance)| {
                RetrievalResult {
                    chunk_id,
                    content,
                    bm25_score,
                    vector_score,
                    hybrid_score,
                    rerank_score,
                    final_score,
                    distance,
                }
            },
        )
}

fn arb_hop_type() -> impl Strategy<Value = HopType> {
    prop_oneof![
        Just(HopType::Initial),
        Just(HopType::FollowUp),
        Just(HopType::Decomposed),
        Just(HopType::Refinement),
        Just(HopType::Verification),
        Just(HopType::Bridging),
    ]
}

fn arb_chain_status() -> impl Strategy<Value = ChainStatus> {
    prop_oneof![
        Just(ChainStatus::InProgress),
        Just(ChainStatus::Completed),
        Just(ChainStatus::Failed),
        Just(ChainStatus::Timeout),
    ]
}

fn arb_dedup_stats() -> impl Strategy<Value = DedupStats> {
    (0usize..10, 0usize..10, 0usize..10, 0usize..10).prop_map(
        |(total_retrieved, dedup_by_id, dedup_by_similarity, final_count)| DedupStats {
            total_retrieved,
            dedup_by_id,
            dedup_by_similarity,
            final_count,
        },
    )
}

fn arb_hop() -> impl Strategy<Value = ReasoningHop> {
    (
        0usize..5,
        arb_hop_type(),
        "[a-z ]{1,20}",
        "[a-z ]{1,20}",
        proptest::collection::vec(arb_retrieval_result(), 0..3),
        0.0f32..1.0,
        0u64..5000,
        arb_dedup_stats(),
    )
        .prop_map(
            |(sequence, hop_type, query, transformed_query, results, confidence, duration_ms, dedup_stats)| {
                ReasoningHop {
                    sequence,
                    hop_type,
                    query,
                    transformed_query,
                    results,
                    confidence,
                    duration: Duration::from_millis(duration_ms),
                    timestamp: chrono::Utc::now(),
                    dedup_stats,
                }
            },
        )
}

fn arb_chain() -> impl Strategy<Value = ReasoningChain> {
    (
        "[a-z ]{1,20}",
        proptest::collection::vec(arb_hop(), 0..3),
        "[a-z ]{0,40}",
        proptest::option::of("[a-z ]{1,20}"),
        arb_chain_status(),
        0usize..10,
        0usize..10,
        0usize..10,
        0usize..10,
        0u64..10000,
    )
        .prop_map(
            |(
                original_query,
                hops,
                final_context,
                final_answer,
                status,
                unique_documents,
                total_retrieved,
                total_dedup_by_id,
                total_dedup_by_similarity,
                total_duration_ms,
            )| {
                ReasoningChain {
                    original_query,
                    hops,
                    final_context,
                    final_answer,
                    status,
                    unique_documents,
                    total_retrieved,
                    total_dedup_by_id,
                    total_dedup_by_similarity,
                    total_duration: Duration::from_millis(total_duration_ms),
                }
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// spec.md §8: indexing a batch of documents in one call produces the
    /// same retrieval results as indexing each document one at a time, for
    /// arbitrary document sets built from a small shared vocabulary.
    #[test]
    fn prop_index_documents_is_batch_invariant(docs in arb_documents()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let engine_a = RagEngine::new(RagConfig::default()).unwrap();
            engine_a.index_documents(docs.clone()).await.unwrap();

            let engine_b = RagEngine::new(RagConfig::default()).unwrap();
            for d in docs.clone() {
                engine_b.index_documents(vec![d]).await.unwrap();
            }

            let results_a = engine_a.retrieve("word", None).await.unwrap();
            let results_b = engine_b.retrieve("word", None).await.unwrap();
            prop_assert_eq!(results_a.len(), results_b.len());
            for (ra, rb) in results_a.iter().zip(results_b.iter()) {
                prop_assert_eq!(&ra.chunk_id, &rb.chunk_id);
                prop_assert!((ra.final_score - rb.final_score).abs() < 1e-4);
            }
            Ok(())
        })?;
    }

    /// spec.md §8: `from_json(to_json(chain)) == chain` for arbitrary chains.
    #[test]
    fn prop_reasoning_chain_json_round_trip(chain in arb_chain()) {
        let json = serde_json::to_string(&chain).unwrap();
        let decoded: ReasoningChain = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(chain, decoded);
    }
}
