//! Configuration types for the retrieval engine.
//!
//! Loading configuration from disk/environment into a running service is an
//! external concern (a CLI or host application's job), but the config types
//! themselves, their defaults, and their validation travel with the crate,
//! the same way the teacher ships `AgentConfig::from_file`/`to_file`/
//! `validate()` alongside the agent it configures.

use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level aggregate of every subsystem's configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default)]
    pub chunk: ChunkConfig,
    #[serde(default)]
    pub hybrid: HybridRetrieverConfig,
    #[serde(default)]
    pub contextual: ContextualConfig,
    #[serde(default)]
    pub reasoner: ReasonerConfig,
    #[serde(default)]
    pub transformer: TransformerConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            hybrid: HybridRetrieverConfig::default(),
            contextual: ContextualConfig::default(),
            reasoner: ReasonerConfig::default(),
            transformer: TransformerConfig::default(),
            router: RouterConfig::default(),
            graph: GraphConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl RagConfig {
    /// Load a config from a toml/yaml/json file, selected by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| RagError::Configuration(format!("reading {}: {e}", path.display())))?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| RagError::Configuration(format!("parsing toml: {e}")))?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)
                .map_err(|e| RagError::Configuration(format!("parsing yaml: {e}")))?,
            Some("json") => serde_json::from_str(&content)?,
            other => {
                return Err(RagError::Configuration(format!(
                    "unsupported config extension: {other:?}"
                )))
            }
        };
        Ok(config)
    }

    /// Persist this config to a toml/yaml/json file, selected by extension.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::to_string_pretty(self)
                .map_err(|e| RagError::Configuration(format!("serializing toml: {e}")))?,
            Some("yaml") | Some("yml") => serde_yml::to_string(self)
                .map_err(|e| RagError::Configuration(format!("serializing yaml: {e}")))?,
            Some("json") => serde_json::to_string_pretty(self)?,
            other => {
                return Err(RagError::Configuration(format!(
                    "unsupported config extension: {other:?}"
                )))
            }
        };
        std::fs::write(path, content)
            .map_err(|e| RagError::Configuration(format!("writing {}: {e}", path.display())))?;
        Ok(())
    }

    /// Cross-field validation. Returns a `ConfigurationError` describing the
    /// first impossible setting found.
    pub fn validate(&self) -> Result<()> {
        self.chunk.validate()?;
        self.hybrid.validate()?;
        self.reasoner.validate()?;
        self.router.validate()?;
        Ok(())
    }
}

/// Segmentation strategy (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    Fixed,
    Recursive,
    Semantic,
    Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    pub strategy: ChunkStrategy,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    pub preserve_tables: bool,
    pub preserve_code_blocks: bool,
    pub preserve_headers: bool,
    pub similarity_threshold: f32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Recursive,
            chunk_size: 512,
            chunk_overlap: 64,
            min_chunk_size: 32,
            preserve_tables: true,
            preserve_code_blocks: true,
            preserve_headers: true,
            similarity_threshold: 0.6,
        }
    }
}

impl ChunkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Configuration("chunk_size must be > 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Configuration(
                "chunk_overlap must be smaller than chunk_size".into(),
            ));
        }
        if self.min_chunk_size > self.chunk_size {
            return Err(RagError::Configuration(
                "min_chunk_size must not exceed chunk_size".into(),
            ));
        }
        Ok(())
    }
}

/// Fusion strategy for the hybrid retriever (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    Weighted,
    ReciprocalRank,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridRetrieverConfig {
    pub use_bm25: bool,
    pub use_vector: bool,
    pub use_reranking: bool,
    pub fusion: FusionMethod,
    pub bm25_k1: f32,
    pub bm25_b: f32,
    pub weight_bm25: f32,
    pub weight_vector: f32,
    pub rrf_k: f32,
    pub rerank_top_k: usize,
    pub top_k: usize,
    pub min_score: f32,
    /// Consult an injected `WebSearch` provider alongside local retrieval.
    pub use_web_search: bool,
    pub web_top_k: usize,
    /// On web search failure, return local-only results (spec.md §7).
    pub fallback_to_local: bool,
    /// On local retrieval failure, return web-only results (spec.md §7).
    pub fallback_to_web: bool,
}

impl Default for HybridRetrieverConfig {
    fn default() -> Self {
        Self {
            use_bm25: true,
            use_vector: true,
            use_reranking: false,
            fusion: FusionMethod::Weighted,
            bm25_k1: 1.2,
            bm25_b: 0.75,
            weight_bm25: 0.5,
            weight_vector: 0.5,
            rrf_k: 60.0,
            rerank_top_k: 20,
            top_k: 10,
            min_score: 0.0,
            use_web_search: false,
            web_top_k: 5,
            fallback_to_local: true,
            fallback_to_web: true,
        }
    }
}

impl HybridRetrieverConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.use_bm25 && !self.use_vector {
            return Err(RagError::Configuration(
                "at least one of use_bm25/use_vector must be enabled".into(),
            ));
        }
        if self.bm25_k1 < 0.0 {
            return Err(RagError::Configuration("bm25_k1 must be >= 0".into()));
        }
        if !(0.0..=1.0).contains(&self.bm25_b) {
            return Err(RagError::Configuration("bm25_b must be within [0,1]".into()));
        }
        if self.weight_bm25 < 0.0 || self.weight_vector < 0.0 {
            return Err(RagError::Configuration("fusion weights must be >= 0".into()));
        }
        if self.top_k == 0 {
            return Err(RagError::Configuration("top_k must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextualConfig {
    pub enabled: bool,
    pub context_weight: f32,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,
}

impl Default for ContextualConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            context_weight: 0.2,
            cache_ttl_secs: 24 * 3600,
            cache_max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    pub max_hops: usize,
    pub min_hops: usize,
    pub results_per_hop: usize,
    pub confidence_threshold: f32,
    pub min_confidence: f32,
    pub similarity_threshold: f32,
    pub context_window_size: usize,
    pub hop_timeout_secs: u64,
    pub total_timeout_secs: u64,
    pub query_refinement: bool,
    pub batch_concurrency: usize,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            max_hops: 5,
            min_hops: 1,
            results_per_hop: 5,
            confidence_threshold: 0.75,
            min_confidence: 0.1,
            similarity_threshold: 0.85,
            context_window_size: 4000,
            hop_timeout_secs: 30,
            total_timeout_secs: 120,
            query_refinement: true,
            batch_concurrency: 3,
        }
    }
}

impl ReasonerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_hops == 0 {
            return Err(RagError::Configuration("max_hops must be > 0".into()));
        }
        if self.min_hops > self.max_hops {
            return Err(RagError::Configuration(
                "min_hops must not exceed max_hops".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(RagError::Configuration(
                "confidence_threshold must be within [0,1]".into(),
            ));
        }
        if self.batch_concurrency == 0 {
            return Err(RagError::Configuration(
                "batch_concurrency must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    pub enable_hyde: bool,
    pub enable_step_back: bool,
    pub decomposition_token_threshold: usize,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,
    pub llm_intent_min_confidence: f32,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            enable_hyde: false,
            enable_step_back: false,
            decomposition_token_threshold: 15,
            cache_ttl_secs: 3600,
            cache_max_entries: 10_000,
            llm_intent_min_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub confidence_threshold: f32,
    pub fallback_enabled: bool,
    pub fallback_strategy: String,
    pub default_strategy: String,
    pub adaptive: bool,
    pub feedback_cap: usize,
    pub use_llm_assist: bool,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            fallback_enabled: true,
            fallback_strategy: "bm25".to_string(),
            default_strategy: "hybrid".to_string(),
            adaptive: true,
            feedback_cap: 1000,
            use_llm_assist: false,
            cache_ttl_secs: 3600,
            cache_max_entries: 10_000,
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(RagError::Configuration(
                "confidence_threshold must be within [0,1]".into(),
            ));
        }
        if self.fallback_enabled && self.fallback_strategy.trim().is_empty() {
            return Err(RagError::Configuration(
                "fallback_strategy must be set when fallback is enabled".into(),
            ));
        }
        if self.default_strategy.trim().is_empty() {
            return Err(RagError::Configuration(
                "default_strategy must not be empty".into(),
            ));
        }
        if self.feedback_cap == 0 {
            return Err(RagError::Configuration("feedback_cap must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub max_traversal_depth: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_traversal_depth: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub web_cache_ttl_secs: u64,
    pub web_cache_max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            web_cache_ttl_secs: 3600,
            web_cache_max_entries: 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_chunk_overlap_must_be_smaller_than_size() {
        let mut config = ChunkConfig::default();
        config.chunk_overlap = config.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hybrid_requires_a_retrieval_source() {
        let mut config = HybridRetrieverConfig::default();
        config.use_bm25 = false;
        config.use_vector = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_router_fallback_requires_strategy_name() {
        let mut config = RouterConfig::default();
        config.fallback_enabled = true;
        config.fallback_strategy = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = RagConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let restored: RagConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(restored.chunk.chunk_size, config.chunk.chunk_size);
    }
}
