//! ragcore: a retrieval-augmented-generation core engine.
//!
//! In-process building blocks for RAG pipelines: a tokenizer port,
//! multi-strategy chunker, BM25 + vector hybrid retriever with optional
//! contextual rescoring, a bounded multi-hop reasoner, a query transformer
//! and router, and an in-memory knowledge graph. Concrete embedding,
//! reranking, LLM, external vector store, and web search backends are
//! collaborators the caller injects through the traits in [`providers`];
//! ragcore ships no concrete implementation of any of them.
//!
//! # Example
//!
//! ```rust,no_run
//! use ragcore::{Document, RagConfig, RagEngine};
//!
//! #[tokio::main]
//! async fn main() -> ragcore::error::Result<()> {
//!     let engine = RagEngine::new(RagConfig::default())?;
//!     engine
//!         .index_documents(vec![Document::new("doc1", "Rust is a systems language.")])
//!         .await?;
//!
//!     let results = engine.retrieve("what is rust", None).await?;
//!     println!("{} results", results.len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod chunker;
pub mod config;
pub mod document;
pub mod error;
pub mod graph;
pub mod providers;
pub mod query;
pub mod reasoning;
pub mod retrieval;
pub mod tokenizer;

pub use chunker::{chunk_document, Chunk};
pub use config::RagConfig;
pub use document::Document;
pub use error::{RagError, Result};
pub use graph::{Edge, KnowledgeGraph, Node};
pub use providers::{Embedder, ExternalVectorStore, Llm, Reranker, WebSearch};
pub use query::{normalize, Intent, QueryRouter, QueryTransformer, RoutingDecision, Strategy, TransformedQuery, WeightedStrategy};
pub use reasoning::{ChainStatus, MultiHopReasoner, ReasoningChain};
pub use retrieval::{ContextualRetriever, HybridRetriever, RetrievalResult, VectorIndex};
pub use tokenizer::{EstimatorTokenizer, FallbackTokenizer, PrecisionTokenizer, Tokenizer};

use std::sync::Arc;
use tracing::info;

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Top-level facade wiring every subsystem together behind the public
/// operations of the engine: indexing, retrieval, transformation, routing,
/// reasoning, and graph access.
pub struct RagEngine {
    config: RagConfig,
    tokenizer: Arc<dyn Tokenizer>,
    retriever: Arc<HybridRetriever>,
    contextual: Arc<ContextualRetriever>,
    transformer: Arc<QueryTransformer>,
    router: Arc<QueryRouter>,
    reasoner: Arc<MultiHopReasoner>,
    pub graph: Arc<KnowledgeGraph>,
    embedder: Option<Arc<dyn Embedder>>,
    llm: Option<Arc<dyn Llm>>,
    reranker: Option<Arc<dyn Reranker>>,
    external_vector_store: Option<Arc<dyn ExternalVectorStore>>,
    web_search: Option<Arc<dyn WebSearch>>,
}

impl RagEngine {
    /// Build an engine from a validated configuration. No embedder, LLM,
    /// reranker, or external collaborator is attached yet; chain
    /// `with_embedder`/`with_llm`/`with_reranker`/`with_external_vector_store`/
    /// `with_web_search` to inject them.
    pub fn new(config: RagConfig) -> Result<Self> {
        config.validate()?;
        info!("initializing ragcore engine");

        let tokenizer: Arc<dyn Tokenizer> = Arc::new(EstimatorTokenizer::default());
        let retriever = Arc::new(HybridRetriever::new(config.hybrid.clone()));
        let contextual = Arc::new(ContextualRetriever::new(config.contextual.clone()));
        let transformer = Arc::new(QueryTransformer::new(config.transformer.clone()));
        let router = Arc::new(QueryRouter::new(config.router.clone()));
        let reasoner = Arc::new(MultiHopReasoner::new(
            config.reasoner.clone(),
            retriever.clone(),
            transformer.clone(),
        ));
        let graph = Arc::new(KnowledgeGraph::new(config.graph.clone()));

        Ok(Self {
            config,
            tokenizer,
            retriever,
            contextual,
            transformer,
            router,
            reasoner,
            graph,
            embedder: None,
            llm: None,
            reranker: None,
            external_vector_store: None,
            web_search: None,
        })
    }

    /// Rebuild `retriever` and `reasoner` from the currently attached
    /// collaborators. Every `with_*` builder that touches the retriever
    /// goes through here so attaching one collaborator never discards
    /// another already attached (the index is rebuilt empty either way, so
    /// call every `with_*` before `index_documents`).
    fn rebuild(&mut self) {
        let mut retriever = HybridRetriever::new(self.config.hybrid.clone());
        if let Some(reranker) = &self.reranker {
            retriever = retriever.with_reranker(reranker.clone());
        }
        if let Some(store) = &self.external_vector_store {
            retriever = retriever.with_external_vector_store(store.clone());
        }
        if let Some(web_search) = &self.web_search {
            retriever = retriever.with_web_search(web_search.clone(), self.config.cache.clone());
        }
        let retriever = Arc::new(retriever);

        let mut reasoner = MultiHopReasoner::new(
            self.config.reasoner.clone(),
            retriever.clone(),
            self.transformer.clone(),
        );
        if let Some(embedder) = &self.embedder {
            reasoner = reasoner.with_embedder(embedder.clone());
        }
        if let Some(llm) = &self.llm {
            reasoner = reasoner.with_llm(llm.clone());
        }

        self.retriever = retriever;
        self.reasoner = Arc::new(reasoner);
    }

    /// Attach a dense embedder. Subsequent indexing and retrieval compute
    /// and consume query/document vectors automatically.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self.rebuild();
        self
    }

    /// Attach an LLM, enabling intent escalation, HyDE/step-back rewriting,
    /// query refinement, sufficiency checks, and final-answer synthesis.
    pub fn with_llm(mut self, llm: Arc<dyn Llm>) -> Self {
        self.llm = Some(llm);
        self.rebuild();
        self
    }

    /// Attach a reranker, used by the hybrid retriever as a final scoring
    /// pass over the top candidates (spec.md §4.3). Call this before
    /// `index_documents`: it replaces the underlying index.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self.rebuild();
        self
    }

    /// Delegate the vector stage to an external vector store (spec.md
    /// §4.3). Call this before `index_documents`: it replaces the
    /// underlying index.
    pub fn with_external_vector_store(mut self, store: Arc<dyn ExternalVectorStore>) -> Self {
        self.external_vector_store = Some(store);
        self.rebuild();
        self
    }

    /// Attach a web search provider, consulted alongside local retrieval
    /// per `hybrid.use_web_search` and the `fallback_to_local`/
    /// `fallback_to_web` degrade policy (spec.md §7).
    pub fn with_web_search(mut self, web_search: Arc<dyn WebSearch>) -> Self {
        self.web_search = Some(web_search);
        self.rebuild();
        self
    }

    /// Segment a document into chunks using the engine's configured
    /// strategy, without indexing them. When the strategy is `Semantic` and
    /// an embedder is attached, sentences are embedded first so the chunker
    /// agglomerates by cosine similarity over dense vectors instead of
    /// falling back to TF-IDF (spec.md §9).
    pub async fn chunk_document(&self, document: &Document) -> Result<Vec<Chunk>> {
        let sentence_embeddings = match (&self.config.chunk.strategy, &self.embedder) {
            (config::ChunkStrategy::Semantic, Some(embedder)) => {
                let sentences = chunker::semantic::split_sentences(&document.content);
                if sentences.is_empty() {
                    None
                } else {
                    embedder.embed_documents(&sentences).await.ok()
                }
            }
            _ => None,
        };
        chunker::chunk_document_with_embeddings(
            document,
            &self.config.chunk,
            self.tokenizer.as_ref(),
            sentence_embeddings.as_deref(),
        )
    }

    /// Chunk, optionally contextualize, optionally embed, and index a batch
    /// of documents. Returns the chunks that were indexed.
    pub async fn index_documents(&self, documents: Vec<Document>) -> Result<Vec<Chunk>> {
        let mut all_chunks = Vec::new();
        let mut embeddings: Vec<Option<Vec<f32>>> = Vec::new();

        for document in &documents {
            let chunks = self.chunk_document(document).await?;
            for mut chunk in chunks {
                if self.config.contextual.enabled {
                    let context = self
                        .contextual
                        .generate_context(&chunk, &document.content, self.llm.as_deref())
                        .await;
                    self.contextual.update_idf_stats(&chunk, &context).await;
                    if !context.is_empty() {
                        chunk = chunk.with_metadata(chunker::meta_keys::CONTEXT, context);
                    }
                }

                let embedding = match &self.embedder {
                    Some(embedder) => embedder.embed_documents(&[chunk.content.clone()]).await.ok().and_then(|mut v| v.pop()),
                    None => document.embedding.clone(),
                };
                embeddings.push(embedding);
                all_chunks.push(chunk);
            }
        }

        self.retriever.index_documents(all_chunks.clone(), Some(embeddings), false).await?;
        Ok(all_chunks)
    }

    /// Retrieve the top results for `query`: BM25 + (if `query_vector` is
    /// given) vector fusion, optional reranking, then optional contextual
    /// rescoring (spec.md §4.3, §4.4).
    pub async fn retrieve(
        &self,
        query: &str,
        query_vector: Option<&[f32]>,
    ) -> Result<Vec<RetrievalResult>> {
        let owned_vector;
        let query_vector = match (query_vector, &self.embedder) {
            (Some(v), _) => Some(v),
            (None, Some(embedder)) => {
                owned_vector = embedder.embed_query(query).await.ok();
                owned_vector.as_deref()
            }
            (None, None) => None,
        };

        let results = self.retriever.retrieve(query, query_vector).await?;
        let mut results = self.contextual.rescore(query, results).await;
        results.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap());
        Ok(results)
    }

    /// Run the composite query-transformation pipeline (spec.md §4.6).
    pub async fn transform_query(&self, query: &str) -> Result<TransformedQuery> {
        self.transformer.transform(query, self.llm.as_deref()).await
    }

    /// Pick a single retrieval strategy for `query` (spec.md §4.7).
    pub async fn route(&self, query: &str, has_context: bool) -> RoutingDecision {
        self.router.route(query, has_context, self.llm.as_deref()).await
    }

    /// Weighted top-`k` strategies for `query`, weights summing to 1
    /// (spec.md §8 property 7).
    pub async fn route_multi(&self, query: &str, k: usize, has_context: bool) -> Vec<WeightedStrategy> {
        self.router.route_multi(query, k, has_context).await
    }

    /// Record the outcome of acting on a routing decision, feeding the
    /// router's adaptive scoring (spec.md §4.7).
    pub async fn record_routing_feedback(&self, query: &str, strategy: Strategy, success: bool, score: f32) {
        self.router.record_feedback(query, strategy, success, score).await;
    }

    /// Run the bounded multi-hop reasoning loop for `query` (spec.md §4.5).
    pub async fn reason(&self, query: &str) -> ReasoningChain {
        self.reasoner.reason(query).await
    }

    /// Reason over several queries with bounded concurrency.
    pub async fn reason_batch(&self, queries: &[String]) -> Vec<ReasoningChain> {
        self.reasoner.reason_batch(queries).await
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }

    #[tokio::test]
    async fn test_engine_index_and_retrieve_round_trip() {
        let engine = RagEngine::new(RagConfig::default()).unwrap();
        engine
            .index_documents(vec![Document::new("doc1", "Rust is a systems programming language.")])
            .await
            .unwrap();
        let results = engine.retrieve("rust programming", None).await.unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn test_engine_rejects_invalid_config() {
        let mut config = RagConfig::default();
        config.reasoner.max_hops = 0;
        assert!(RagEngine::new(config).is_err());
    }

    #[tokio::test]
    async fn test_engine_chunk_then_reason_empty_index() {
        let engine = RagEngine::new(RagConfig::default()).unwrap();
        let chain = engine.reason("what is rust").await;
        assert_eq!(chain.hops.len(), 1);
    }
}
