//! Provider ports (spec.md §6). These are the external collaborators the
//! core depends on but does not implement: concrete embedding, reranking,
//! LLM, external vector store, and web search backends are out of scope
//! (spec.md §1). Traits follow the teacher's `async_trait` provider style
//! (`llm/provider.rs`'s `ProviderType` pattern).

use crate::error::Result;
use async_trait::async_trait;

/// Produces dense vector representations of text. Vectors returned by a
/// single provider instance must share one dimension across calls.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn name(&self) -> &str;
}

/// A single reranked candidate, ordered by decreasing `relevance_score`.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankedCandidate {
    pub index: usize,
    pub relevance_score: f32,
}

/// Cross-encoder style reranker over (query, candidate) pairs.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankedCandidate>>;
}

/// Single-shot text completion. No streaming is assumed (spec.md §6).
#[async_trait]
pub trait Llm: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// A document as understood by an external vector store.
#[derive(Debug, Clone)]
pub struct ExternalDocument {
    pub id: String,
    pub content: String,
    pub metadata: std::collections::HashMap<String, String>,
}

/// Distance metric reported by an external vector store, used to convert
/// its native distance into a comparable score (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
    InnerProduct,
    L2,
    Other,
}

impl DistanceMetric {
    /// Conversion rule of spec.md §4.3: cosine/inner-product scores are used
    /// as-is, L2 distance maps via `1/(1+d)`, anything else via `1-d`.
    pub fn to_score(self, distance: f32) -> f32 {
        match self {
            DistanceMetric::Cosine | DistanceMetric::InnerProduct => distance,
            DistanceMetric::L2 => 1.0 / (1.0 + distance),
            DistanceMetric::Other => 1.0 - distance,
        }
    }
}

/// A single match returned by an external vector store's `search`.
#[derive(Debug, Clone)]
pub struct ExternalSearchHit {
    pub doc: ExternalDocument,
    pub score: f32,
    pub distance: f32,
}

/// A wire-format-agnostic external vector database (Milvus/Weaviate/Qdrant
/// style). The core never speaks a concrete wire protocol (spec.md §1).
#[async_trait]
pub trait ExternalVectorStore: Send + Sync {
    async fn add_documents(&self, docs: &[ExternalDocument]) -> Result<()>;
    async fn search(
        &self,
        query_vec: &[f32],
        top_k: usize,
    ) -> Result<Vec<ExternalSearchHit>>;
    async fn delete(&self, ids: &[String]) -> Result<()>;
    async fn update(&self, doc: &ExternalDocument) -> Result<()>;
    async fn count(&self) -> Result<usize>;
    fn metric(&self) -> DistanceMetric;
}

/// A single web search hit.
#[derive(Debug, Clone)]
pub struct WebSearchHit {
    pub url: String,
    pub title: String,
    pub content: String,
    pub score: f32,
}

/// External web search collaborator, consulted by the router/reasoner when
/// local retrieval is insufficient (spec.md §7 degrade policy).
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSearchHit>>;
}
