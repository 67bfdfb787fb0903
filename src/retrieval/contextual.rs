//! Contextual retrieval (spec.md §4.4): augments each chunk with a short
//! LLM-generated summary of its relation to the parent document, cached by
//! content hash, and blends a BM25-against-summary score into the hybrid
//! score at query time.

use super::bm25::{Bm25Index, Bm25Stats};
use super::hybrid::RetrievalResult;
use crate::cache::TtlCache;
use crate::chunker::Chunk;
use crate::config::ContextualConfig;
use crate::providers::Llm;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

fn cache_key(doc_id: &str, chunk_content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc_id.as_bytes());
    hasher.update(chunk_content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Augments chunks with context summaries and rescores using them.
pub struct ContextualRetriever {
    config: ContextualConfig,
    context_index: RwLock<Bm25Index>,
    context_cache: TtlCache<String, String>,
}

impl ContextualRetriever {
    pub fn new(config: ContextualConfig) -> Self {
        let context_cache = TtlCache::new(
            config.cache_max_entries,
            Duration::from_secs(config.cache_ttl_secs),
        );
        Self {
            config,
            context_index: RwLock::new(Bm25Index::new(1.2, 0.75)),
            context_cache,
        }
    }

    /// Generate (or reuse a cached) context summary for `chunk`. Falls back
    /// to an empty summary on any LLM failure or when no LLM is injected —
    /// indexing must still succeed (spec.md §4.4 "Fallback").
    pub async fn generate_context(
        &self,
        chunk: &Chunk,
        parent_doc_content: &str,
        llm: Option<&dyn Llm>,
    ) -> String {
        let key = cache_key(&chunk.doc_id, &chunk.content);
        if let Some(cached) = self.context_cache.get(&key).await {
            return cached;
        }

        let context = match llm {
            Some(llm) => {
                let excerpt_len = parent_doc_content.len().min(500);
                let prompt = format!(
                    "In 1-2 sentences, describe how this chunk relates to the parent document.\n\nDocument excerpt: {}\n\nChunk: {}",
                    &parent_doc_content[..excerpt_len],
                    chunk.content
                );
                match llm.complete(&prompt).await {
                    Ok(summary) => summary,
                    Err(e) => {
                        warn!(error = %e, "context generation failed, using empty context");
                        String::new()
                    }
                }
            }
            None => String::new(),
        };

        self.context_cache.insert(key, context.clone()).await;
        context
    }

    /// Fold a chunk's context summary into the cumulative context-only BM25
    /// index. `avgDocLen`/`N` accumulate across every call, never
    /// recomputed from the latest batch alone (spec.md §4.4).
    pub async fn update_idf_stats(&self, chunk: &Chunk, context: &str) {
        let mut context_chunk = Chunk::new(
            chunk.doc_id.clone(),
            context.to_string(),
            0,
            context.len(),
            0,
            chunk.chunk_index,
        );
        context_chunk.id = chunk.id.clone();
        let mut index = self.context_index.write().await;
        index.update_idf_stats(&[context_chunk]);
    }

    pub async fn stats(&self) -> Bm25Stats {
        self.context_index.read().await.stats()
    }

    /// Blend a BM25-against-context-summary score into each result's
    /// `final_score`, weighted by `context_weight`. A no-op when contextual
    /// retrieval is disabled or no context has been indexed yet.
    pub async fn rescore(&self, query: &str, mut results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        if !self.config.enabled {
            return results;
        }
        let index = self.context_index.read().await;
        if index.is_empty() {
            return results;
        }
        let context_hits: HashMap<String, f32> =
            index.search(query, index.len()).into_iter().collect();
        drop(index);

        for r in &mut results {
            if let Some(&context_score) = context_hits.get(&r.chunk_id) {
                r.final_score += self.config.context_weight * context_score;
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, doc_id: &str, content: &str) -> Chunk {
        Chunk::new(doc_id, content, 0, content.len(), 0, 0).with_metadata("id", id)
    }

    #[tokio::test]
    async fn test_generate_context_without_llm_is_empty_and_cached() {
        let retriever = ContextualRetriever::new(ContextualConfig::default());
        let chunk = chunk("c1", "d1", "some content");
        let ctx = retriever.generate_context(&chunk, "parent doc", None).await;
        assert_eq!(ctx, "");
    }

    #[tokio::test]
    async fn test_rescore_noop_when_disabled() {
        let mut config = ContextualConfig::default();
        config.enabled = false;
        let retriever = ContextualRetriever::new(config);
        let results = vec![RetrievalResult {
            chunk_id: "c1".into(),
            content: "x".into(),
            bm25_score: 1.0,
            vector_score: 0.0,
            hybrid_score: 1.0,
            rerank_score: None,
            final_score: 1.0,
            distance: None,
        }];
        let rescored = retriever.rescore("query", results.clone()).await;
        assert_eq!(rescored[0].final_score, results[0].final_score);
    }

    #[tokio::test]
    async fn test_cumulative_stats_across_calls() {
        let retriever = ContextualRetriever::new(ContextualConfig::default());
        let c1 = chunk("c1", "d1", "x");
        let c2 = chunk("c2", "d1", "y");
        retriever.update_idf_stats(&c1, "hello world").await;
        retriever.update_idf_stats(&c2, "hello there").await;
        let stats = retriever.stats().await;
        assert_eq!(stats.n, 2);
    }
}
