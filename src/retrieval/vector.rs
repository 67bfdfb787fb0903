//! In-memory cosine-similarity vector index (spec.md §4.3), grounded on the
//! teacher's `memory.rs` `cosine_similarity` helper.

use crate::error::{RagError, RetrievalError};
use std::collections::HashMap;

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Process-local dense vector index. Embeddings are assumed to share a
/// uniform dimension per index instance (spec.md §6 Embedder contract).
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    dimension: Option<usize>,
    embeddings: HashMap<String, Vec<f32>>,
    order: Vec<String>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Insert or overwrite a chunk's embedding.
    pub fn add(&mut self, chunk_id: String, embedding: Vec<f32>) -> crate::error::Result<()> {
        if let Some(dim) = self.dimension {
            if embedding.len() != dim {
                return Err(RagError::Retrieval(RetrievalError::DimensionMismatch {
                    expected: dim,
                    actual: embedding.len(),
                }));
            }
        } else {
            self.dimension = Some(embedding.len());
        }
        if !self.embeddings.contains_key(&chunk_id) {
            self.order.push(chunk_id.clone());
        }
        self.embeddings.insert(chunk_id, embedding);
        Ok(())
    }

    pub fn add_batch(&mut self, items: Vec<(String, Vec<f32>)>) -> crate::error::Result<()> {
        for (id, embedding) in items {
            self.add(id, embedding)?;
        }
        Ok(())
    }

    pub fn remove(&mut self, chunk_id: &str) {
        if self.embeddings.remove(chunk_id).is_some() {
            self.order.retain(|id| id != chunk_id);
        }
    }

    pub fn clear(&mut self) {
        self.embeddings.clear();
        self.order.clear();
        self.dimension = None;
    }

    /// Top-`top_k` chunks by cosine similarity, ties broken by insertion
    /// order.
    pub fn search(&self, query: &[f32], top_k: usize) -> crate::error::Result<Vec<(String, f32)>> {
        if self.embeddings.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(dim) = self.dimension {
            if query.len() != dim {
                return Err(RagError::Retrieval(RetrievalError::DimensionMismatch {
                    expected: dim,
                    actual: query.len(),
                }));
            }
        }

        let mut scored: Vec<(usize, &str, f32)> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let emb = &self.embeddings[id];
                (i, id.as_str(), cosine_similarity(query, emb))
            })
            .collect();

        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap().then(a.0.cmp(&b.0)));
        scored.truncate(top_k);
        Ok(scored
            .into_iter()
            .map(|(_, id, score)| (id.to_string(), score))
            .collect())
    }
}
