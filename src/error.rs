//! Error handling for the retrieval engine

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, RagError>;

/// Main error type for the retrieval engine.
///
/// Follows the taxonomy of spec.md §7: configuration/validation errors are
/// hard and surface immediately, provider/timeout errors are expected to be
/// degraded-around by callers, `Internal` indicates a broken invariant.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("operation timed out")]
    Timeout,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("chunking error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("reasoning error: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

/// Errors raised while segmenting a document into chunks
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("invalid chunk configuration: {0}")]
    InvalidConfig(String),

    #[error("byte offset {pos} out of bounds for document of length {len}")]
    OutOfBounds { pos: usize, len: usize },
}

/// Errors raised by the BM25 / vector / hybrid retrieval pipeline
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("index is empty")]
    EmptyIndex,

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("reranker failed: {0}")]
    RerankFailed(String),
}

/// Errors raised by the multi-hop reasoner
#[derive(Error, Debug)]
pub enum ReasoningError {
    #[error("chain exceeded total deadline")]
    Timeout,

    #[error("hop {0} failed: {1}")]
    HopFailed(usize, String),
}

impl RagError {
    /// Whether a caller could reasonably retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::Timeout
                | RagError::Provider(_)
                | RagError::Reasoning(ReasoningError::Timeout)
        )
    }

    /// Coarse category used for logging/metrics.
    pub fn category(&self) -> &'static str {
        match self {
            RagError::Configuration(_) => "configuration",
            RagError::Validation(_) => "validation",
            RagError::Provider(_) => "provider",
            RagError::Timeout => "timeout",
            RagError::NotFound(_) => "not_found",
            RagError::Chunk(_) => "chunk",
            RagError::Retrieval(_) => "retrieval",
            RagError::Reasoning(_) => "reasoning",
            RagError::Serialization(_) => "serialization",
            RagError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(RagError::Timeout.is_retryable());
        assert!(RagError::Provider("down".into()).is_retryable());
        assert!(!RagError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(RagError::Timeout.category(), "timeout");
        assert_eq!(RagError::NotFound("x".into()).category(), "not_found");
    }
}
