//! Fuses BM25 and vector retrieval under a single reader-writer lock, then
//! optionally reranks (spec.md §4.3, §5). Builder style grounded on
//! `other_examples/openai-codex`'s `HybridSearcher`; the lock-protected index
//! state mirrors the teacher's read-many/write-exclusive posture around
//! `SqliteMemoryStore`.

use super::bm25::Bm25Index;
use super::vector::VectorIndex;
use crate::cache::TtlCache;
use crate::chunker::Chunk;
use crate::config::{CacheConfig, FusionMethod, HybridRetrieverConfig};
use crate::error::Result;
use crate::providers::{ExternalDocument, ExternalVectorStore, Reranker, WebSearch, WebSearchHit};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

/// Retrieval result (spec.md §3). `final_score` is what consumers sort by;
/// the remaining scores are observability/re-fusion material.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub content: String,
    pub bm25_score: f32,
    pub vector_score: f32,
    pub hybrid_score: f32,
    pub rerank_score: Option<f32>,
    pub final_score: f32,
    pub distance: Option<f32>,
}

struct IndexState {
    bm25: Bm25Index,
    vector: VectorIndex,
    chunks: HashMap<String, Chunk>,
    insertion_order: Vec<String>,
}

/// In-memory hybrid retriever: BM25 + cosine vector + fusion + optional
/// reranking, safe under concurrent read/write pressure (spec.md §5).
pub struct HybridRetriever {
    config: HybridRetrieverConfig,
    state: Arc<RwLock<IndexState>>,
    reranker: Option<Arc<dyn Reranker>>,
    external_vector_store: Option<Arc<dyn ExternalVectorStore>>,
    web_search: Option<Arc<dyn WebSearch>>,
    web_cache: Option<TtlCache<String, Vec<WebSearchHit>>>,
}

impl HybridRetriever {
    pub fn new(config: HybridRetrieverConfig) -> Self {
        let bm25 = Bm25Index::new(config.bm25_k1, config.bm25_b);
        Self {
            config,
            state: Arc::new(RwLock::new(IndexState {
                bm25,
                vector: VectorIndex::new(),
                chunks: HashMap::new(),
                insertion_order: Vec::new(),
            })),
            reranker: None,
            external_vector_store: None,
            web_search: None,
            web_cache: None,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Delegate the vector stage to an external vector store (spec.md
    /// §4.3): indexing sends documents to the store instead of the
    /// in-memory `VectorIndex`, and `retrieve` searches the store instead
    /// of local cosine similarity.
    pub fn with_external_vector_store(mut self, store: Arc<dyn ExternalVectorStore>) -> Self {
        self.external_vector_store = Some(store);
        self
    }

    /// Consult a web search provider alongside local retrieval, degrading
    /// per `fallback_to_local`/`fallback_to_web` on either side's failure
    /// (spec.md §7). Results are cached per query string under `cache_config`
    /// so a repeated query within the TTL window skips the round-trip.
    pub fn with_web_search(mut self, web_search: Arc<dyn WebSearch>, cache_config: CacheConfig) -> Self {
        self.web_search = Some(web_search);
        self.web_cache = Some(TtlCache::new(
            cache_config.web_cache_max_entries,
            Duration::from_secs(cache_config.web_cache_ttl_secs),
        ));
        self
    }

    /// Look up cached web results for `query`, falling back to the
    /// provider and caching a successful response.
    async fn cached_web_search(&self, web_search: &Arc<dyn WebSearch>, query: &str) -> Result<Vec<WebSearchHit>> {
        if let Some(cache) = &self.web_cache {
            if let Some(hits) = cache.get(&query.to_string()).await {
                return Ok(hits);
            }
        }
        let hits = web_search.search(query, self.config.web_top_k).await?;
        if let Some(cache) = &self.web_cache {
            cache.insert(query.to_string(), hits.clone()).await;
        }
        Ok(hits)
    }

    /// Add chunks (with optional per-chunk embeddings) to the index.
    /// Additive by default; `rebuild=true` clears the index atomically
    /// first. Write access is exclusive for the whole call, so a concurrent
    /// `retrieve` never observes a torn index (spec.md §5).
    pub async fn index_documents(
        &self,
        chunks: Vec<Chunk>,
        embeddings: Option<Vec<Option<Vec<f32>>>>,
        rebuild: bool,
    ) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if rebuild {
                state.bm25.rebuild();
                state.vector.clear();
                state.chunks.clear();
                state.insertion_order.clear();
            }

            state.bm25.update_idf_stats(&chunks);

            for (i, chunk) in chunks.iter().enumerate() {
                if !state.chunks.contains_key(&chunk.id) {
                    state.insertion_order.push(chunk.id.clone());
                }
                state.chunks.insert(chunk.id.clone(), chunk.clone());

                if self.external_vector_store.is_none() {
                    if let Some(embedding) =
                        embeddings.as_ref().and_then(|e| e.get(i)).and_then(|e| e.clone())
                    {
                        state.vector.add(chunk.id.clone(), embedding)?;
                    }
                }
            }
        }

        if let Some(store) = &self.external_vector_store {
            let docs: Vec<ExternalDocument> = chunks
                .iter()
                .map(|c| ExternalDocument {
                    id: c.id.clone(),
                    content: c.content.clone(),
                    metadata: c.metadata.clone(),
                })
                .collect();
            if !docs.is_empty() {
                store.add_documents(&docs).await?;
            }
        }
        Ok(())
    }

    /// Retrieve the top results for `query` (local BM25/vector fusion plus
    /// reranking), then blend in web search per `use_web_search` and
    /// degrade across either source's failure (spec.md §7).
    pub async fn retrieve(
        &self,
        query: &str,
        query_vector: Option<&[f32]>,
    ) -> Result<Vec<RetrievalResult>> {
        let local = self.retrieve_local(query, query_vector).await;

        if !self.config.use_web_search {
            return local;
        }
        let Some(web_search) = &self.web_search else {
            return local;
        };

        match local {
            Ok(local_results) => match self.cached_web_search(web_search, query).await {
                Ok(web_hits) => {
                    let mut combined = local_results;
                    combined.extend(web_hits.into_iter().map(web_hit_to_result));
                    combined.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap());
                    combined.truncate(self.config.top_k);
                    Ok(combined)
                }
                Err(e) => {
                    if self.config.fallback_to_local {
                        warn!(error = %e, "web search failed, falling back to local-only results");
                        Ok(local_results)
                    } else {
                        Err(e)
                    }
                }
            },
            Err(e) => {
                if self.config.fallback_to_web {
                    warn!(error = %e, "local retrieval failed, falling back to web-only results");
                    let web_hits = self.cached_web_search(web_search, query).await?;
                    let mut results: Vec<RetrievalResult> =
                        web_hits.into_iter().map(web_hit_to_result).collect();
                    results.truncate(self.config.top_k);
                    Ok(results)
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn retrieve_local(
        &self,
        query: &str,
        query_vector: Option<&[f32]>,
    ) -> Result<Vec<RetrievalResult>> {
        let candidate_k = {
            let state = self.state.read().await;
            if state.chunks.is_empty() {
                return Ok(Vec::new());
            }
            state.chunks.len()
        };

        // External vector search suspends on I/O, so it runs before the
        // read lock below is taken rather than across it (spec.md §5).
        let external_vector_hits: Option<Vec<(String, f32)>> =
            if self.config.use_vector {
                if let (Some(store), Some(qv)) = (&self.external_vector_store, query_vector) {
                    let hits = store.search(qv, candidate_k).await?;
                    Some(
                        hits.into_iter()
                            .map(|h| {
                                let score = store.metric().to_score(h.distance);
                                (h.doc.id, score)
                            })
                            .collect(),
                    )
                } else {
                    None
                }
            } else {
                None
            };

        let (mut results, order_index) = {
            let state = self.state.read().await;

            let bm25_hits = if self.config.use_bm25 {
                state.bm25.search(query, candidate_k)
            } else {
                Vec::new()
            };
            let vector_hits = match external_vector_hits {
                Some(hits) => hits,
                None if self.config.use_vector => match query_vector {
                    Some(qv) => state.vector.search(qv, candidate_k)?,
                    None => Vec::new(),
                },
                None => Vec::new(),
            };

            let fused = fuse(&self.config, &bm25_hits, &vector_hits);

            let order_index: HashMap<String, usize> = state
                .insertion_order
                .iter()
                .enumerate()
                .map(|(i, id)| (id.clone(), i))
                .collect();

            let bm25_map: HashMap<&str, f32> =
                bm25_hits.iter().map(|(id, s)| (id.as_str(), *s)).collect();
            let vector_map: HashMap<&str, f32> =
                vector_hits.iter().map(|(id, s)| (id.as_str(), *s)).collect();

            let results: Vec<RetrievalResult> = fused
                .into_iter()
                .filter_map(|(id, hybrid_score)| {
                    let chunk = state.chunks.get(&id)?;
                    Some(RetrievalResult {
                        chunk_id: id.clone(),
                        content: chunk.content.clone(),
                        bm25_score: bm25_map.get(id.as_str()).copied().unwrap_or(0.0),
                        vector_score: vector_map.get(id.as_str()).copied().unwrap_or(0.0),
                        hybrid_score,
                        rerank_score: None,
                        final_score: hybrid_score,
                        distance: None,
                    })
                })
                .collect();

            (results, order_index)
        };

        if self.config.use_reranking {
            if let Some(reranker) = &self.reranker {
                results.sort_by(|a, b| {
                    b.hybrid_score
                        .partial_cmp(&a.hybrid_score)
                        .unwrap()
                        .then(order_index.get(&a.chunk_id).cmp(&order_index.get(&b.chunk_id)))
                });
                let top_n = self.config.rerank_top_k.min(results.len());
                let candidates: Vec<String> =
                    results[..top_n].iter().map(|r| r.content.clone()).collect();

                match reranker.rerank(query, &candidates, top_n).await {
                    Ok(reranked) => {
                        for r in reranked {
                            if let Some(result) = results.get_mut(r.index) {
                                result.rerank_score = Some(r.relevance_score);
                                result.final_score = r.relevance_score;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "reranker failed, keeping hybrid scores");
                    }
                }
            }
        }

        results.retain(|r| r.final_score >= self.config.min_score);
        results.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap()
                .then(order_index.get(&a.chunk_id).cmp(&order_index.get(&b.chunk_id)))
        });
        results.truncate(self.config.top_k);
        Ok(results)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.chunks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.chunks.is_empty()
    }
}

/// A web search hit carries no BM25/vector component; its own `score`
/// stands in directly as `hybrid_score`/`final_score`. Prefixed so a web
/// hit's id never collides with a locally indexed chunk id.
fn web_hit_to_result(hit: WebSearchHit) -> RetrievalResult {
    RetrievalResult {
        chunk_id: format!("web:{}", hit.url),
        content: hit.content,
        bm25_score: 0.0,
        vector_score: 0.0,
        hybrid_score: hit.score,
        rerank_score: None,
        final_score: hit.score,
        distance: None,
    }
}

fn min_max_normalize(scores: &HashMap<&str, f32>) -> HashMap<String, f32> {
    if scores.is_empty() {
        return HashMap::new();
    }
    let min = scores.values().cloned().fold(f32::INFINITY, f32::min);
    let max = scores.values().cloned().fold(f32::NEG_INFINITY, f32::max);
    scores
        .iter()
        .map(|(id, s)| {
            let norm = if (max - min).abs() < 1e-9 { 1.0 } else { (s - min) / (max - min) };
            (id.to_string(), norm)
        })
        .collect()
}

fn fuse(
    config: &HybridRetrieverConfig,
    bm25_hits: &[(String, f32)],
    vector_hits: &[(String, f32)],
) -> Vec<(String, f32)> {
    let ids: Vec<String> = {
        let mut seen = std::collections::HashSet::new();
        let mut ordered = Vec::new();
        for (id, _) in bm25_hits.iter().chain(vector_hits.iter()) {
            if seen.insert(id.clone()) {
                ordered.push(id.clone());
            }
        }
        ordered
    };

    match config.fusion {
        FusionMethod::Weighted => {
            let bm25_map: HashMap<&str, f32> =
                bm25_hits.iter().map(|(id, s)| (id.as_str(), *s)).collect();
            let vector_map: HashMap<&str, f32> =
                vector_hits.iter().map(|(id, s)| (id.as_str(), *s)).collect();
            let bm25_norm = min_max_normalize(&bm25_map);
            let vector_norm = min_max_normalize(&vector_map);

            ids.into_iter()
                .map(|id| {
                    let b = bm25_norm.get(&id).copied().unwrap_or(0.0);
                    let v = vector_norm.get(&id).copied().unwrap_or(0.0);
                    let score = config.weight_bm25 * b + config.weight_vector * v;
                    (id, score)
                })
                .collect()
        }
        FusionMethod::ReciprocalRank => {
            let bm25_rank: HashMap<&str, usize> = bm25_hits
                .iter()
                .enumerate()
                .map(|(rank, (id, _))| (id.as_str(), rank + 1))
                .collect();
            let vector_rank: HashMap<&str, usize> = vector_hits
                .iter()
                .enumerate()
                .map(|(rank, (id, _))| (id.as_str(), rank + 1))
                .collect();

            ids.into_iter()
                .map(|id| {
                    let mut score = 0.0;
                    if let Some(&rank) = bm25_rank.get(id.as_str()) {
                        score += 1.0 / (config.rrf_k + rank as f32);
                    }
                    if let Some(&rank) = vector_rank.get(id.as_str()) {
                        score += 1.0 / (config.rrf_k + rank as f32);
                    }
                    (id, score)
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;
    use crate::error::RagError;
    use crate::providers::{DistanceMetric, ExternalSearchHit};
    use std::sync::Mutex;

    fn chunk(id: &str, content: &str) -> Chunk {
        Chunk::new(id, content, 0, content.len(), 0, 0)
    }

    struct FakeVectorStore {
        metric: DistanceMetric,
        hits: Vec<(String, String, f32)>,
        added: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ExternalVectorStore for FakeVectorStore {
        async fn add_documents(&self, docs: &[ExternalDocument]) -> crate::error::Result<()> {
            self.added.lock().unwrap().extend(docs.iter().map(|d| d.id.clone()));
            Ok(())
        }
        async fn search(&self, _query_vec: &[f32], top_k: usize) -> crate::error::Result<Vec<ExternalSearchHit>> {
            Ok(self
                .hits
                .iter()
                .take(top_k)
                .map(|(id, content, distance)| ExternalSearchHit {
                    doc: ExternalDocument {
                        id: id.clone(),
                        content: content.clone(),
                        metadata: Default::default(),
                    },
                    score: 0.0,
                    distance: *distance,
                })
                .collect())
        }
        async fn delete(&self, _ids: &[String]) -> crate::error::Result<()> {
            Ok(())
        }
        async fn update(&self, _doc: &ExternalDocument) -> crate::error::Result<()> {
            Ok(())
        }
        async fn count(&self) -> crate::error::Result<usize> {
            Ok(self.hits.len())
        }
        fn metric(&self) -> DistanceMetric {
            self.metric
        }
    }

    enum FakeWebMode {
        Hits(Vec<WebSearchHit>),
        Fail,
    }

    struct FakeWebSearch(FakeWebMode);

    #[async_trait::async_trait]
    impl WebSearch for FakeWebSearch {
        async fn search(&self, _query: &str, _max_results: usize) -> crate::error::Result<Vec<WebSearchHit>> {
            match &self.0 {
                FakeWebMode::Hits(hits) => Ok(hits.clone()),
                FakeWebMode::Fail => Err(RagError::Provider("web search unavailable".into())),
            }
        }
    }

    #[tokio::test]
    async fn test_external_vector_store_delegates_vector_stage() {
        let store = Arc::new(FakeVectorStore {
            metric: DistanceMetric::Cosine,
            hits: vec![("d1".to_string(), "hello world".to_string(), 0.9)],
            added: Mutex::new(Vec::new()),
        });
        let config = HybridRetrieverConfig {
            use_bm25: false,
            use_vector: true,
            min_score: 0.0,
            top_k: 10,
            ..HybridRetrieverConfig::default()
        };
        let retriever = HybridRetriever::new(config).with_external_vector_store(store.clone());
        retriever
            .index_documents(vec![chunk("d1", "hello world")], None, false)
            .await
            .unwrap();

        assert_eq!(*store.added.lock().unwrap(), vec!["d1".to_string()]);

        let results = retriever.retrieve("hello", Some(&[1.0, 0.0])).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "d1");
        assert!((results[0].vector_score - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_web_search_augments_local_results() {
        let web_search = Arc::new(FakeWebSearch(FakeWebMode::Hits(vec![WebSearchHit {
            url: "https://example.com".into(),
            title: "Example".into(),
            content: "web content".into(),
            score: 0.95,
        }])));
        let config = HybridRetrieverConfig {
            use_bm25: true,
            use_vector: false,
            min_score: 0.0,
            top_k: 10,
            use_web_search: true,
            ..HybridRetrieverConfig::default()
        };
        let retriever = HybridRetriever::new(config).with_web_search(web_search, CacheConfig::default());
        retriever
            .index_documents(vec![chunk("d1", "hello world")], None, false)
            .await
            .unwrap();

        let results = retriever.retrieve("hello", None).await.unwrap();
        assert!(results.iter().any(|r| r.chunk_id == "web:https://example.com"));
        assert!(results.iter().any(|r| r.chunk_id == "d1"));
    }

    #[tokio::test]
    async fn test_web_search_failure_falls_back_to_local_only() {
        let web_search = Arc::new(FakeWebSearch(FakeWebMode::Fail));
        let config = HybridRetrieverConfig {
            use_bm25: true,
            use_vector: false,
            min_score: 0.0,
            top_k: 10,
            use_web_search: true,
            fallback_to_local: true,
            ..HybridRetrieverConfig::default()
        };
        let retriever = HybridRetriever::new(config).with_web_search(web_search, CacheConfig::default());
        retriever
            .index_documents(vec![chunk("d1", "hello world")], None, false)
            .await
            .unwrap();

        let results = retriever.retrieve("hello", None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "d1");
    }

    #[tokio::test]
    async fn test_local_retrieval_failure_falls_back_to_web_only() {
        let web_search = Arc::new(FakeWebSearch(FakeWebMode::Hits(vec![WebSearchHit {
            url: "https://example.com".into(),
            title: "Example".into(),
            content: "web content".into(),
            score: 0.7,
        }])));
        let config = HybridRetrieverConfig {
            use_bm25: false,
            use_vector: true,
            min_score: 0.0,
            top_k: 10,
            use_web_search: true,
            fallback_to_web: true,
            ..HybridRetrieverConfig::default()
        };
        let retriever = HybridRetriever::new(config).with_web_search(web_search, CacheConfig::default());
        retriever
            .index_documents(vec![chunk("d1", "hello world")], Some(vec![Some(vec![1.0, 0.0])]), false)
            .await
            .unwrap();

        // A query vector of the wrong dimension makes local vector search
        // fail with a dimension mismatch.
        let results = retriever.retrieve("hello", Some(&[1.0, 0.0, 0.0])).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "web:https://example.com");
    }

    #[tokio::test]
    async fn test_scenario_bm25_only_ordering() {
        let config = HybridRetrieverConfig {
            use_bm25: true,
            use_vector: false,
            use_reranking: false,
            top_k: 3,
            min_score: 0.0,
            ..HybridRetrieverConfig::default()
        };
        let retriever = HybridRetriever::new(config);
        retriever
            .index_documents(
                vec![
                    chunk("d1", "hello world foo"),
                    chunk("d2", "hello bar baz qux quux"),
                    chunk("d3", "unrelated text"),
                ],
                None,
                false,
            )
            .await
            .unwrap();

        let results = retriever.retrieve("hello", None).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2"]);
    }

    #[tokio::test]
    async fn test_min_score_filters_results() {
        let config = HybridRetrieverConfig {
            use_bm25: true,
            use_vector: false,
            min_score: 1000.0,
            ..HybridRetrieverConfig::default()
        };
        let retriever = HybridRetriever::new(config);
        retriever
            .index_documents(vec![chunk("d1", "hello world")], None, false)
            .await
            .unwrap();
        let results = retriever.retrieve("hello", None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_clears_index() {
        let retriever = HybridRetriever::new(HybridRetrieverConfig::default());
        retriever
            .index_documents(vec![chunk("d1", "hello world")], None, false)
            .await
            .unwrap();
        assert_eq!(retriever.len().await, 1);
        retriever
            .index_documents(vec![chunk("d2", "goodbye")], None, true)
            .await
            .unwrap();
        assert_eq!(retriever.len().await, 1);
        assert!(!retriever.is_empty().await);
    }
}
