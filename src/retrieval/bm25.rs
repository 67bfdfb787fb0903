//! Hand-rolled Okapi BM25 inverted index (spec.md §4.3).
//!
//! Not built on the `bm25` crate seen elsewhere in the ecosystem: the
//! cumulative corpus statistics (`N`, `avgLen`, per-term `df`) must be exact
//! and batch-invariant (spec.md §8 property 2), which requires direct access
//! to the postings and running totals rather than a black-box scorer.
//!
//! Tokenization for the index: lowercase, Unicode letter/digit segmentation,
//! with CJK code points each treated as their own word (spec.md §4.3).

use crate::chunker::Chunk;
use crate::tokenizer::is_cjk;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

fn tokenize(text: &str, stop_words: &HashSet<String>) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if is_cjk(c) {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            words.push(c.to_string());
        } else if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words.into_iter().filter(|w| !stop_words.contains(w)).collect()
}

/// Cumulative corpus statistics, observable for testing batch-invariance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Stats {
    pub n: u64,
    pub total_len: u64,
    pub avg_len: f32,
}

/// Okapi BM25 inverted index. Process-local and rebuilt on start
/// (spec.md §1 Non-goals: no durable storage).
#[derive(Debug, Clone)]
pub struct Bm25Index {
    k1: f32,
    b: f32,
    stop_words: HashSet<String>,
    postings: HashMap<String, HashMap<usize, u32>>,
    doc_freq: HashMap<String, u32>,
    chunk_lengths: Vec<usize>,
    chunk_ids: Vec<String>,
    id_to_idx: HashMap<String, usize>,
    n: u64,
    total_len: u64,
}

impl Bm25Index {
    pub fn new(k1: f32, b: f32) -> Self {
        Self {
            k1,
            b,
            stop_words: HashSet::new(),
            postings: HashMap::new(),
            doc_freq: HashMap::new(),
            chunk_lengths: Vec::new(),
            chunk_ids: Vec::new(),
            id_to_idx: HashMap::new(),
            n: 0,
            total_len: 0,
        }
    }

    pub fn with_stop_words(mut self, stop_words: HashSet<String>) -> Self {
        self.stop_words = stop_words;
        self
    }

    /// Merge a batch of chunks into the index, updating cumulative
    /// statistics. Calling this N times with disjoint batches of the same
    /// documents must leave `stats()` identical to calling it once with the
    /// union (spec.md §8 property 2).
    pub fn update_idf_stats(&mut self, chunks: &[Chunk]) {
        for chunk in chunks {
            if self.id_to_idx.contains_key(&chunk.id) {
                continue;
            }
            let idx = self.chunk_ids.len();
            self.id_to_idx.insert(chunk.id.clone(), idx);
            self.chunk_ids.push(chunk.id.clone());

            let terms = tokenize(&chunk.content, &self.stop_words);
            self.chunk_lengths.push(terms.len());
            self.total_len += terms.len() as u64;
            self.n += 1;

            let mut term_counts: HashMap<String, u32> = HashMap::new();
            for t in terms {
                *term_counts.entry(t).or_insert(0) += 1;
            }
            for (t, tf) in term_counts {
                self.postings.entry(t.clone()).or_default().insert(idx, tf);
                *self.doc_freq.entry(t).or_insert(0) += 1;
            }
        }
    }

    /// Clear the index atomically (the "rebuild" mode of spec.md §4.3).
    pub fn rebuild(&mut self) {
        self.postings.clear();
        self.doc_freq.clear();
        self.chunk_lengths.clear();
        self.chunk_ids.clear();
        self.id_to_idx.clear();
        self.n = 0;
        self.total_len = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.id_to_idx.contains_key(chunk_id)
    }

    fn avg_len(&self) -> f32 {
        if self.n == 0 {
            0.0
        } else {
            self.total_len as f32 / self.n as f32
        }
    }

    pub fn stats(&self) -> Bm25Stats {
        Bm25Stats {
            n: self.n,
            total_len: self.total_len,
            avg_len: self.avg_len(),
        }
    }

    fn idf(&self, term: &str) -> f32 {
        let df = *self.doc_freq.get(term).unwrap_or(&0) as f32;
        let n = self.n as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Score every chunk containing at least one query term, returning the
    /// top `top_k` by descending score with ties broken by insertion order.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f32)> {
        if self.n == 0 {
            return Vec::new();
        }
        let terms = tokenize(query, &self.stop_words);
        if terms.is_empty() {
            return Vec::new();
        }
        let avg_len = self.avg_len().max(1e-6);

        let partials: Vec<HashMap<usize, f32>> = terms
            .par_iter()
            .map(|term| {
                let mut local = HashMap::new();
                if let Some(posting) = self.postings.get(term) {
                    let idf = self.idf(term);
                    for (&idx, &tf) in posting {
                        let len = self.chunk_lengths[idx] as f32;
                        let tf = tf as f32;
                        let denom = tf + self.k1 * (1.0 - self.b + self.b * len / avg_len);
                        let score = idf * (tf * (self.k1 + 1.0)) / denom;
                        local.insert(idx, score);
                    }
                }
                local
            })
            .collect();

        let mut scores: HashMap<usize, f32> = HashMap::new();
        for partial in partials {
            for (idx, s) in partial {
                *scores.entry(idx).or_insert(0.0) += s;
            }
        }

        let mut results: Vec<(usize, f32)> = scores.into_iter().collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
        results.truncate(top_k);
        results
            .into_iter()
            .map(|(idx, score)| (self.chunk_ids[idx].clone(), score))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    fn chunk(id: &str, content: &str) -> Chunk {
        let len = content.len();
        Chunk::new(id, content, 0, len, 0, 0)
    }

    #[test]
    fn test_scenario_bm25_ordering() {
        let mut index = Bm25Index::new(1.2, 0.75);
        index.update_idf_stats(&[
            chunk("d1", "hello world foo"),
            chunk("d2", "hello bar baz qux quux"),
            chunk("d3", "unrelated text"),
        ]);
        let results = index.search("hello", 3);
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2"]);
    }

    #[test]
    fn test_scenario_cumulative_idf_statistics() {
        let mut index = Bm25Index::new(1.2, 0.75);
        index.update_idf_stats(&[
            chunk("d1", "hello world foo"),
            chunk("d2", "hello bar baz qux quux"),
        ]);
        index.update_idf_stats(&[chunk("d3", "single doc")]);

        let stats = index.stats();
        assert_eq!(stats.n, 3);
        assert_eq!(stats.total_len, 10);
        assert!((stats.avg_len - 10.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_batch_invariance() {
        let docs = [
            chunk("d1", "alpha beta gamma"),
            chunk("d2", "beta gamma delta"),
            chunk("d3", "gamma delta epsilon"),
        ];

        let mut whole = Bm25Index::new(1.2, 0.75);
        whole.update_idf_stats(&docs);

        let mut batched = Bm25Index::new(1.2, 0.75);
        batched.update_idf_stats(&docs[0..1]);
        batched.update_idf_stats(&docs[1..3]);

        assert_eq!(whole.stats(), batched.stats());
    }

    #[test]
    fn test_unknown_term_returns_no_results() {
        let mut index = Bm25Index::new(1.2, 0.75);
        index.update_idf_stats(&[chunk("d1", "hello world")]);
        assert!(index.search("zzz", 10).is_empty());
    }
}
