//! Hop and chain records for the multi-hop reasoner (spec.md §4.5, §3).

use crate::graph::{Edge, Node};
use crate::retrieval::RetrievalResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HopType {
    Initial,
    FollowUp,
    Decomposed,
    Refinement,
    Verification,
    Bridging,
}

/// Per-hop dedup bookkeeping, surfaced so callers can audit the four-phase
/// filter without re-deriving it (spec.md §4.5).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupStats {
    pub total_retrieved: usize,
    pub dedup_by_id: usize,
    pub dedup_by_similarity: usize,
    pub final_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningHop {
    pub sequence: usize,
    pub hop_type: HopType,
    pub query: String,
    pub transformed_query: String,
    pub results: Vec<RetrievalResult>,
    pub confidence: f32,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub dedup_stats: DedupStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    InProgress,
    Completed,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningChain {
    pub original_query: String,
    pub hops: Vec<ReasoningHop>,
    pub final_context: String,
    pub final_answer: Option<String>,
    pub status: ChainStatus,
    pub unique_documents: usize,
    pub total_retrieved: usize,
    pub total_dedup_by_id: usize,
    pub total_dedup_by_similarity: usize,
    #[serde(with = "duration_millis")]
    pub total_duration: Duration,
}

impl ReasoningChain {
    /// Top `k` distinct documents across every hop, sorted by `final_score`
    /// descending, deduplicated by `chunk_id` keeping the highest score seen
    /// (spec.md §8 property 5).
    pub fn get_top_documents(&self, k: usize) -> Vec<RetrievalResult> {
        let mut best: std::collections::HashMap<String, RetrievalResult> =
            std::collections::HashMap::new();
        for hop in &self.hops {
            for r in &hop.results {
                best.entry(r.chunk_id.clone())
                    .and_modify(|existing| {
                        if r.final_score > existing.final_score {
                            *existing = r.clone();
                        }
                    })
                    .or_insert_with(|| r.clone());
            }
        }
        let mut all: Vec<RetrievalResult> = best.into_values().collect();
        all.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap());
        all.truncate(k);
        all
    }

    /// Snapshot as (nodes, edges) for visualization, in the same shape as
    /// `KnowledgeGraph::to_visualization` (spec.md §4.5 supplement): one
    /// `query` node, one `hop` node per hop, one `document` node per unique
    /// retrieved chunk, and an `answer` node when the chain produced one.
    pub fn to_visualization(&self) -> (Vec<Node>, Vec<Edge>) {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        let query_node = Node::new("query", self.original_query.clone()).with_id("query");
        nodes.push(query_node);

        let mut seen_docs = std::collections::HashSet::new();
        let mut previous_hop_id: Option<String> = None;
        for hop in &self.hops {
            let hop_id = format!("hop:{}", hop.sequence);
            nodes.push(Node::new("hop", hop.query.clone()).with_id(hop_id.clone()));
            let from = previous_hop_id.clone().unwrap_or_else(|| "query".to_string());
            edges.push(Edge::new(from, hop_id.clone(), "leads_to"));
            previous_hop_id = Some(hop_id.clone());

            for r in &hop.results {
                if seen_docs.insert(r.chunk_id.clone()) {
                    nodes.push(
                        Node::new("document", r.content.clone()).with_id(format!("doc:{}", r.chunk_id)),
                    );
                }
                edges.push(Edge::new(
                    hop_id.clone(),
                    format!("doc:{}", r.chunk_id),
                    "retrieved",
                ));
            }
        }

        if let Some(answer) = &self.final_answer {
            nodes.push(Node::new("answer", answer.clone()).with_id("answer"));
            if let Some(last_hop) = previous_hop_id {
                edges.push(Edge::new(last_hop, "answer", "synthesizes_to"));
            }
        }

        (nodes, edges)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
