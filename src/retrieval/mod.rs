//! BM25 index, vector index, and the hybrid retriever that fuses them
//! (spec.md §4.3), plus contextual rescoring (spec.md §4.4).

pub mod bm25;
pub mod contextual;
pub mod hybrid;
pub mod vector;

pub use contextual::ContextualRetriever;
pub use hybrid::{HybridRetriever, RetrievalResult};
pub use vector::VectorIndex;
