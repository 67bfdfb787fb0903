//! In-memory knowledge graph (spec.md §4.8): nodes, directed weighted edges,
//! and bounded bidirectional neighbor traversal with explicit cycle
//! detection. Single reader-writer lock, same posture as the BM25/vector
//! index (spec.md §5).

use crate::config::GraphConfig;
use crate::error::{RagError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub node_type: String,
    pub label: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn new(node_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            node_type: node_type.into(),
            label: label.into(),
            properties: HashMap::new(),
            embedding: None,
            created_at: DateTime::from_timestamp(0, 0).unwrap(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub edge_type: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    pub weight: f32,
    pub created_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, edge_type: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            source: source.into(),
            target: target.into(),
            edge_type: edge_type.into(),
            properties: HashMap::new(),
            weight: 1.0,
            created_at: DateTime::from_timestamp(0, 0).unwrap(),
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }
}

struct GraphState {
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Edge>,
    out_edges: HashMap<String, Vec<String>>,
    in_edges: HashMap<String, Vec<String>>,
}

pub struct KnowledgeGraph {
    config: GraphConfig,
    state: RwLock<GraphState>,
}

impl KnowledgeGraph {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            state: RwLock::new(GraphState {
                nodes: HashMap::new(),
                edges: HashMap::new(),
                out_edges: HashMap::new(),
                in_edges: HashMap::new(),
            }),
        }
    }

    /// Insert a node, auto-assigning an id and creation time when unset.
    pub async fn add_node(&self, mut node: Node) -> String {
        if node.id.is_empty() {
            node.id = Uuid::new_v4().to_string();
        }
        if node.created_at.timestamp() == 0 {
            node.created_at = Utc::now();
        }
        let id = node.id.clone();
        let mut state = self.state.write().await;
        state.nodes.insert(id.clone(), node);
        id
    }

    /// Insert a directed edge, auto-assigning an id and creation time when
    /// unset. Both endpoints must already exist.
    pub async fn add_edge(&self, mut edge: Edge) -> Result<String> {
        let mut state = self.state.write().await;
        if !state.nodes.contains_key(&edge.source) {
            return Err(RagError::NotFound(format!("node {}", edge.source)));
        }
        if !state.nodes.contains_key(&edge.target) {
            return Err(RagError::NotFound(format!("node {}", edge.target)));
        }
        if edge.id.is_empty() {
            edge.id = Uuid::new_v4().to_string();
        }
        if edge.created_at.timestamp() == 0 {
            edge.created_at = Utc::now();
        }
        let id = edge.id.clone();
        state.out_edges.entry(edge.source.clone()).or_default().push(id.clone());
        state.in_edges.entry(edge.target.clone()).or_default().push(id.clone());
        state.edges.insert(id.clone(), edge);
        Ok(id)
    }

    pub async fn get_node(&self, id: &str) -> Option<Node> {
        self.state.read().await.nodes.get(id).cloned()
    }

    pub async fn query_by_type(&self, node_type: &str) -> Vec<Node> {
        self.state
            .read()
            .await
            .nodes
            .values()
            .filter(|n| n.node_type == node_type)
            .cloned()
            .collect()
    }

    /// Bidirectional DFS neighbor traversal bounded by `depth`, with an
    /// explicit visited set so a cycle terminates instead of looping
    /// (spec.md §4.8, §9). Never includes the origin node.
    pub async fn neighbors(&self, node_id: &str, depth: usize) -> Vec<String> {
        let depth = depth.min(self.config.max_traversal_depth);
        let state = self.state.read().await;

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(node_id.to_string());
        let mut result = Vec::new();
        let mut stack = vec![(node_id.to_string(), 0usize)];

        while let Some((current, d)) = stack.pop() {
            if d >= depth {
                continue;
            }
            let mut candidates = Vec::new();
            if let Some(out_ids) = state.out_edges.get(&current) {
                for eid in out_ids {
                    if let Some(e) = state.edges.get(eid) {
                        candidates.push(e.target.clone());
                    }
                }
            }
            if let Some(in_ids) = state.in_edges.get(&current) {
                for eid in in_ids {
                    if let Some(e) = state.edges.get(eid) {
                        candidates.push(e.source.clone());
                    }
                }
            }
            for candidate in candidates {
                if visited.insert(candidate.clone()) {
                    result.push(candidate.clone());
                    stack.push((candidate, d + 1));
                }
            }
        }
        result
    }

    /// Snapshot as (nodes, edges) for visualization (spec.md §4.5 supplement).
    pub async fn to_visualization(&self) -> (Vec<Node>, Vec<Edge>) {
        let state = self.state.read().await;
        (
            state.nodes.values().cloned().collect(),
            state.edges.values().cloned().collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scenario_neighbors_with_a_cycle() {
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
        assert!(!graph.neighbors(&a, 10).await.contains(&a));
    }

    #[tokio::test]
    async fn test_add_edge_requires_existing_nodes() {
        let graph = KnowledgeGraph::new(GraphConfig::default());
        let result = graph.add_edge(Edge::new("missing1", "missing2", "rel")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_query_by_type() {
        let graph = KnowledgeGraph::new(GraphConfig::default());
        graph.add_node(Node::new("person", "Alice")).await;
        graph.add_node(Node::new("place", "Paris")).await;
        let people = graph.query_by_type("person").await;
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].label, "Alice");
    }
}
