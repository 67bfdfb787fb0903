//! Multi-hop reasoner (spec.md §4.5): a bounded iterative retrieval loop
//! with cycle detection and a four-phase dedup filter, grounded on the
//! teacher's `knowledge::consolidator` dedup-by-similarity pattern.

pub mod types;

pub use types::{ChainStatus, DedupStats, HopType, ReasoningChain, ReasoningHop};

use crate::config::ReasonerConfig;
use crate::providers::{Embedder, Llm};
use crate::query::{normalize, QueryTransformer};
use crate::retrieval::{HybridRetriever, RetrievalResult};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

struct KeptCandidate {
    chunk_id: String,
    content: String,
    embedding: Option<Vec<f32>>,
    final_score: f32,
}

/// Cross-hop accumulator: which chunk ids have already been surfaced, and
/// which candidates currently hold a "kept" slot for similarity comparison.
#[derive(Default)]
struct ChainState {
    seen_ids: HashSet<String>,
    kept: Vec<KeptCandidate>,
}

pub struct MultiHopReasoner {
    config: ReasonerConfig,
    retriever: Arc<HybridRetriever>,
    transformer: Arc<QueryTransformer>,
    embedder: Option<Arc<dyn Embedder>>,
    llm: Option<Arc<dyn Llm>>,
}

impl MultiHopReasoner {
    pub fn new(
        config: ReasonerConfig,
        retriever: Arc<HybridRetriever>,
        transformer: Arc<QueryTransformer>,
    ) -> Self {
        Self {
            config,
            retriever,
            transformer,
            embedder: None,
            llm: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn Llm>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Run the bounded hop loop for a single query (spec.md §4.5).
    pub async fn reason(&self, query: &str) -> ReasoningChain {
        let chain_start = Instant::now();
        let total_deadline = chain_start + Duration::from_secs(self.config.total_timeout_secs);

        let initial_transform = self
            .transformer
            .transform(query, self.llm.as_deref())
            .await;
        let mut sub_queries: VecDeque<String> = match &initial_transform {
            Ok(t) => t
                .sub_queries
                .iter()
                .filter(|q| q.as_str() != query)
                .cloned()
                .collect(),
            Err(_) => VecDeque::new(),
        };

        let mut chain_state = ChainState::default();
        let mut hops: Vec<ReasoningHop> = Vec::new();
        let mut seen_normalized: HashSet<String> = HashSet::new();
        let mut accumulated_context = String::new();
        let mut status = ChainStatus::InProgress;

        for hop_num in 0..self.config.max_hops {
            if Instant::now() >= total_deadline {
                status = ChainStatus::Timeout;
                break;
            }

            let hop_type = if hop_num == 0 {
                HopType::Initial
            } else if !sub_queries.is_empty() {
                HopType::Decomposed
            } else {
                HopType::Refinement
            };

            let hop_query = if hop_num == 0 {
                query.to_string()
            } else if let Some(sub) = sub_queries.pop_front() {
                sub
            } else if self.config.query_refinement {
                self.refine(query, &accumulated_context, hop_num).await
            } else {
                query.to_string()
            };

            let normalized = normalize(&hop_query);
            if seen_normalized.contains(&normalized) {
                // Cycle detected: this hop would repeat an earlier one
                // verbatim, so it is skipped rather than executed.
                continue;
            }
            seen_normalized.insert(normalized);

            let remaining = total_deadline.saturating_duration_since(Instant::now());
            let hop_budget = remaining.min(Duration::from_secs(self.config.hop_timeout_secs));

            let hop_future = self.execute_hop(hop_num, hop_type, &hop_query, &mut chain_state);
            let hop = match tokio::time::timeout(hop_budget, hop_future).await {
                Ok(hop) => hop,
                Err(_) => {
                    status = ChainStatus::Timeout;
                    break;
                }
            };

            accumulated_context =
                append_context(&accumulated_context, &hop, self.config.context_window_size);
            hops.push(hop);

            if hop_num + 1 >= self.config.min_hops && self.should_stop(&hops, &accumulated_context).await
            {
                break;
            }
        }

        if status == ChainStatus::InProgress {
            status = if hops.is_empty() {
                ChainStatus::Failed
            } else {
                ChainStatus::Completed
            };
        }

        let final_answer = if let Some(llm) = &self.llm {
            let prompt = format!(
                "Answer the question using only the context below. If the context is \
                 insufficient, say so explicitly.\n\nQuestion: {query}\n\nContext:\n{accumulated_context}"
            );
            match llm.complete(&prompt).await {
                Ok(answer) => Some(answer),
                Err(e) => {
                    warn!(error = %e, "final answer synthesis failed");
                    None
                }
            }
        } else {
            None
        };

        let total_retrieved: usize = hops.iter().map(|h| h.dedup_stats.total_retrieved).sum();
        let total_dedup_by_id: usize = hops.iter().map(|h| h.dedup_stats.dedup_by_id).sum();
        let total_dedup_by_similarity: usize =
            hops.iter().map(|h| h.dedup_stats.dedup_by_similarity).sum();

        ReasoningChain {
            original_query: query.to_string(),
            hops,
            final_context: accumulated_context,
            final_answer,
            status,
            unique_documents: chain_state.seen_ids.len(),
            total_retrieved,
            total_dedup_by_id,
            total_dedup_by_similarity,
            total_duration: chain_start.elapsed(),
        }
    }

    /// Reason over several queries with bounded concurrency, capturing
    /// per-item failures rather than cancelling the batch (spec.md §4.5).
    pub async fn reason_batch(&self, queries: &[String]) -> Vec<ReasoningChain> {
        use futures::stream::{self, StreamExt};

        stream::iter(queries.iter())
            .map(|q| self.reason(q))
            .buffered(self.config.batch_concurrency)
            .collect()
            .await
    }

    async fn execute_hop(
        &self,
        sequence: usize,
        hop_type: HopType,
        hop_query: &str,
        chain_state: &mut ChainState,
    ) -> ReasoningHop {
        let started = Instant::now();
        let timestamp = chrono::Utc::now();

        let transformed = self
            .transformer
            .transform(hop_query, self.llm.as_deref())
            .await
            .map(|t| t.rewritten)
            .unwrap_or_else(|_| hop_query.to_string());

        let query_vector = if let Some(embedder) = &self.embedder {
            embedder.embed_query(&transformed).await.ok()
        } else {
            None
        };

        let raw_results = self
            .retriever
            .retrieve(&transformed, query_vector.as_deref())
            .await
            .unwrap_or_default();
        let total_retrieved = raw_results.len();

        // Phase 1: id dedup (across and within hops) + confidence floor.
        let mut dedup_by_id = 0usize;
        let mut survivors: Vec<RetrievalResult> = Vec::new();
        for r in raw_results {
            if chain_state.seen_ids.contains(&r.chunk_id) {
                dedup_by_id += 1;
                continue;
            }
            if r.final_score < self.config.min_confidence {
                continue;
            }
            survivors.push(r);
        }

        let candidate_embeddings: std::collections::HashMap<String, Vec<f32>> =
            if let Some(embedder) = &self.embedder {
                let texts: Vec<String> = survivors.iter().map(|r| r.content.clone()).collect();
                if texts.is_empty() {
                    Default::default()
                } else {
                    match embedder.embed_documents(&texts).await {
                        Ok(vecs) => survivors
                            .iter()
                            .zip(vecs)
                            .map(|(r, v)| (r.chunk_id.clone(), v))
                            .collect(),
                        Err(_) => Default::default(),
                    }
                }
            } else {
                Default::default()
            };

        // Phase 2: similarity dedup against every candidate already kept
        // anywhere in the chain, replacing a kept slot when the newcomer
        // scores higher.
        let mut dedup_by_similarity = 0usize;
        let mut hop_kept: Vec<RetrievalResult> = Vec::new();
        for candidate in survivors {
            chain_state.seen_ids.insert(candidate.chunk_id.clone());
            let cand_embedding = candidate_embeddings.get(&candidate.chunk_id);

            let mut duplicate_of: Option<usize> = None;
            for (i, kept) in chain_state.kept.iter().enumerate() {
                let sim = similarity(cand_embedding, &candidate.content, kept.embedding.as_ref(), &kept.content);
                if sim >= self.config.similarity_threshold {
                    duplicate_of = Some(i);
                    break;
                }
            }

            match duplicate_of {
                Some(i) => {
                    dedup_by_similarity += 1;
                    if candidate.final_score > chain_state.kept[i].final_score {
                        chain_state.kept[i] = KeptCandidate {
                            chunk_id: candidate.chunk_id.clone(),
                            content: candidate.content.clone(),
                            embedding: cand_embedding.cloned(),
                            final_score: candidate.final_score,
                        };
                        hop_kept.push(candidate);
                    }
                }
                None => {
                    chain_state.kept.push(KeptCandidate {
                        chunk_id: candidate.chunk_id.clone(),
                        content: candidate.content.clone(),
                        embedding: cand_embedding.cloned(),
                        final_score: candidate.final_score,
                    });
                    hop_kept.push(candidate);
                }
            }
        }

        // Phase 3 + 4: re-sort, then truncate to the per-hop budget.
        hop_kept.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap());
        hop_kept.truncate(self.config.results_per_hop);

        let confidence = if hop_kept.is_empty() {
            0.0
        } else {
            hop_kept.iter().map(|r| r.final_score).sum::<f32>() / hop_kept.len() as f32
        };

        ReasoningHop {
            sequence,
            hop_type,
            query: hop_query.to_string(),
            transformed_query: transformed,
            dedup_stats: DedupStats {
                total_retrieved,
                dedup_by_id,
                dedup_by_similarity,
                final_count: hop_kept.len(),
            },
            results: hop_kept,
            confidence,
            duration: started.elapsed(),
            timestamp,
        }
    }

    /// Turn a dry hop into a refined follow-up query. Without an LLM this
    /// just re-issues the original query: there is no local mechanism to
    /// productively rephrase it.
    async fn refine(&self, original_query: &str, accumulated_context: &str, hop_num: usize) -> String {
        if let Some(llm) = &self.llm {
            let prompt = format!(
                "We are answering \"{original_query}\" and are on retrieval attempt {hop_num}. \
                 Given what we have found so far, propose a single focused follow-up search \
                 query that would fill the biggest remaining gap. Reply with only the query.\n\n\
                 Context so far:\n{accumulated_context}"
            );
            if let Ok(refined) = llm.complete(&prompt).await {
                let refined = refined.trim();
                if !refined.is_empty() {
                    return refined.to_string();
                }
            }
        }
        original_query.to_string()
    }

    async fn should_stop(&self, hops: &[ReasoningHop], accumulated_context: &str) -> bool {
        let Some(last) = hops.last() else { return true };
        if last.confidence >= self.config.confidence_threshold {
            return true;
        }
        if last.dedup_stats.final_count == 0 {
            return true;
        }
        if let Some(llm) = &self.llm {
            let prompt = format!(
                "Is the following context sufficient to confidently answer the user's \
                 question? Reply with only YES or NO.\n\nContext:\n{accumulated_context}"
            );
            if let Ok(response) = llm.complete(&prompt).await {
                if response.trim().to_uppercase().starts_with("YES") {
                    return true;
                }
            }
        }
        false
    }
}

/// Similarity between two candidates, preferring embeddings over a lexical
/// fallback: cosine over dense vectors when both are available, else
/// Jaccard over lowercased word sets (spec.md §4.5).
fn similarity(
    a_embedding: Option<&Vec<f32>>,
    a_content: &str,
    b_embedding: Option<&Vec<f32>>,
    b_content: &str,
) -> f32 {
    if let (Some(a), Some(b)) = (a_embedding, b_embedding) {
        if a.len() == b.len() && !a.is_empty() {
            return crate::retrieval::vector::cosine_similarity(a, b);
        }
    }
    jaccard(a_content, b_content)
}

fn jaccard(a: &str, b: &str) -> f32 {
    let set_a: HashSet<String> = a.to_lowercase().split_whitespace().map(str::to_string).collect();
    let set_b: HashSet<String> = b.to_lowercase().split_whitespace().map(str::to_string).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

fn append_context(existing: &str, hop: &ReasoningHop, context_window_size: usize) -> String {
    let mut ctx = existing.to_string();
    for r in &hop.results {
        if !ctx.is_empty() {
            ctx.push(' ');
        }
        ctx.push_str(&r.content);
    }
    let max_chars = context_window_size.saturating_mul(4);
    if ctx.len() > max_chars {
        let mut start = ctx.len() - max_chars;
        while start < ctx.len() && !ctx.is_char_boundary(start) {
            start += 1;
        }
        ctx = ctx[start..].to_string();
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;
    use crate::config::{HybridRetrieverConfig, ReasonerConfig, TransformerConfig};

    async fn retriever_with(chunks: Vec<Chunk>) -> Arc<HybridRetriever> {
        let retriever = HybridRetriever::new(HybridRetrieverConfig {
            use_vector: false,
            min_score: 0.0,
            top_k: 10,
            ..HybridRetrieverConfig::default()
        });
        retriever.index_documents(chunks, None, false).await.unwrap();
        Arc::new(retriever)
    }

    fn chunk(id: &str, content: &str) -> Chunk {
        Chunk::new(id, content, 0, content.len(), 0, 0)
    }

    #[tokio::test]
    async fn test_scenario_cycle_detection_stops_after_one_hop() {
        // A query that decomposes into itself (no real conjunctions) should
        // settle after the first hop instead of looping to max_hops.
        let retriever = retriever_with(vec![chunk("d1", "paris is the capital of france")]).await;
        let transformer = Arc::new(QueryTransformer::new(TransformerConfig::default()));
        let reasoner = MultiHopReasoner::new(
            ReasonerConfig {
                max_hops: 5,
                min_hops: 1,
                confidence_threshold: 0.0,
                query_refinement: false,
                ..ReasonerConfig::default()
            },
            retriever,
            transformer,
        );

        let chain = reasoner.reason("what is the capital of france").await;
        assert_eq!(chain.hops.len(), 1);
        assert_eq!(chain.status, ChainStatus::Completed);
    }

    #[tokio::test]
    async fn test_scenario_dedup_by_id_across_hops() {
        // A conjunction query decomposes into two distinct sub-queries; hop 0
        // runs the full query, hop 1 runs the first sub-query. Both retrieve
        // the single indexed chunk, so it must be counted once in
        // unique_documents while total_retrieved still reflects both hops.
        let retriever = retriever_with(vec![chunk(
            "x",
            "quantum entanglement is a phenomenon where particles become correlated",
        )])
        .await;
        let transformer = Arc::new(QueryTransformer::new(TransformerConfig::default()));
        let reasoner = MultiHopReasoner::new(
            ReasonerConfig {
                max_hops: 2,
                min_hops: 2,
                confidence_threshold: 0.99,
                query_refinement: false,
                ..ReasonerConfig::default()
            },
            retriever,
            transformer,
        );

        let chain = reasoner
            .reason("what is quantum entanglement and how does quantum entanglement work")
            .await;
        assert_eq!(chain.hops.len(), 2);
        assert_eq!(chain.unique_documents, 1);
        assert_eq!(chain.total_retrieved, 2);
        assert!(chain.total_dedup_by_id >= 1);
    }

    #[test]
    fn test_get_top_documents_dedupes_by_chunk_id() {
        let make_hop = |seq: usize, results: Vec<RetrievalResult>| ReasoningHop {
            sequence: seq,
            hop_type: HopType::Initial,
            query: "q".into(),
            transformed_query: "q".into(),
            results,
            confidence: 1.0,
            duration: Duration::from_millis(0),
            timestamp: chrono::Utc::now(),
            dedup_stats: DedupStats::default(),
        };
        let r = |id: &str, score: f32| RetrievalResult {
            chunk_id: id.to_string(),
            content: id.to_string(),
            bm25_score: 0.0,
            vector_score: 0.0,
            hybrid_score: score,
            rerank_score: None,
            final_score: score,
            distance: None,
        };
        let chain = ReasoningChain {
            original_query: "q".into(),
            hops: vec![make_hop(0, vec![r("a", 0.5), r("b", 0.9)]), make_hop(1, vec![r("a", 0.7)])],
            final_context: String::new(),
            final_answer: None,
            status: ChainStatus::Completed,
            unique_documents: 2,
            total_retrieved: 3,
            total_dedup_by_id: 0,
            total_dedup_by_similarity: 0,
            total_duration: Duration::from_millis(0),
        };
        let top = chain.get_top_documents(10);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].chunk_id, "b");
        assert_eq!(top[1].chunk_id, "a");
        assert_eq!(top[1].final_score, 0.7);
    }

    #[test]
    fn test_jaccard_similarity() {
        assert!((jaccard("hello world", "hello world") - 1.0).abs() < 1e-6);
        assert!(jaccard("hello world", "goodbye moon") < 0.2);
    }
}
