//! Semantic chunking: split into sentences, then greedily agglomerate while
//! pairwise similarity between adjacent sentence representations stays above
//! `similarity_threshold` (spec.md §4.2).
//!
//! Open question (spec.md §9, "exact TF-IDF / embedding tie-break... an
//! implementer must pick one and document it"): when no embedder is
//! injected this module falls back to a per-document TF-IDF cosine
//! similarity over sentences, since that is the cheapest representation that
//! still captures term overlap without a provider round-trip. Callers that
//! hold real sentence embeddings should use [`chunk_with_embeddings`], which
//! takes precedence and is never mixed with the TF-IDF path within a single
//! call.

use super::types::Chunk;
use crate::config::ChunkConfig;
use crate::document::Document;
use crate::tokenizer::Tokenizer;
use std::collections::{HashMap, HashSet};

/// Split `text` into trimmed sentences on `.`/`!`/`?`. Exposed so callers
/// that hold an embedder can produce one dense vector per sentence before
/// calling [`chunk_with_embeddings`].
pub(crate) fn split_sentences(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            if !current.trim().is_empty() {
                pieces.push(current.trim().to_string());
            }
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        pieces.push(current.trim().to_string());
    }
    pieces
}

fn tokenize_terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn tfidf_vectors(sentences: &[String]) -> Vec<HashMap<String, f32>> {
    let n = sentences.len() as f32;
    let term_lists: Vec<Vec<String>> = sentences.iter().map(|s| tokenize_terms(s)).collect();

    let mut df: HashMap<String, usize> = HashMap::new();
    for terms in &term_lists {
        let unique: HashSet<&String> = terms.iter().collect();
        for t in unique {
            *df.entry(t.clone()).or_insert(0) += 1;
        }
    }

    term_lists
        .iter()
        .map(|terms| {
            let mut tf: HashMap<String, f32> = HashMap::new();
            for t in terms {
                *tf.entry(t.clone()).or_insert(0.0) += 1.0;
            }
            let len = (terms.len().max(1)) as f32;
            tf.into_iter()
                .map(|(t, c)| {
                    let idf = ((n + 1.0) / (*df.get(&t).unwrap_or(&1) as f32 + 1.0)).ln() + 1.0;
                    (t, (c / len) * idf)
                })
                .collect()
        })
        .collect()
}

fn cosine_sparse(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (k, v) in a {
        norm_a += v * v;
        if let Some(v2) = b.get(k) {
            dot += v * v2;
        }
    }
    for v in b.values() {
        norm_b += v * v;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub(crate) fn cosine_dense(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn agglomerate(
    document: &Document,
    config: &ChunkConfig,
    tokenizer: &dyn Tokenizer,
    sentences: Vec<String>,
    similarity: impl Fn(usize, usize) -> f32,
) -> Vec<Chunk> {
    if sentences.is_empty() {
        return Vec::new();
    }

    let mut groups: Vec<Vec<usize>> = vec![vec![0]];
    for i in 1..sentences.len() {
        let last_group = groups.last().unwrap();
        let anchor = *last_group.last().unwrap();
        let group_tokens: usize = last_group
            .iter()
            .map(|&j| tokenizer.count(&sentences[j]))
            .sum();
        let sim = similarity(anchor, i);
        if sim >= config.similarity_threshold
            && group_tokens + tokenizer.count(&sentences[i]) <= config.chunk_size
        {
            groups.last_mut().unwrap().push(i);
        } else {
            groups.push(vec![i]);
        }
    }

    let mut chunks = Vec::new();
    let mut search_from = 0usize;
    for group in groups {
        let body = group.iter().map(|&i| sentences[i].as_str()).collect::<Vec<_>>().join(" ");
        let first_sentence = &sentences[group[0]];
        let start = document
            .content
            .get(search_from..)
            .and_then(|rest| rest.find(first_sentence.as_str()))
            .map(|p| search_from + p)
            .unwrap_or(search_from);
        let end = (start + body.len()).min(document.content.len());
        if end <= start {
            continue;
        }
        search_from = end;
        let token_count = tokenizer.count(&body);
        chunks.push(Chunk::new(
            document.id.clone(),
            body,
            start,
            end,
            token_count,
            chunks.len(),
        ));
    }
    chunks
}

/// Semantic chunking with a TF-IDF fallback (no embedder injected).
pub fn chunk(
    document: &Document,
    config: &ChunkConfig,
    tokenizer: &dyn Tokenizer,
    dense_embeddings: Option<&[Vec<f32>]>,
) -> Vec<Chunk> {
    let sentences = split_sentences(&document.content);
    if let Some(embeddings) = dense_embeddings {
        if embeddings.len() == sentences.len() {
            return agglomerate(document, config, tokenizer, sentences, |a, b| {
                cosine_dense(&embeddings[a], &embeddings[b])
            });
        }
    }
    let vectors = tfidf_vectors(&sentences);
    agglomerate(document, config, tokenizer, sentences, |a, b| {
        cosine_sparse(&vectors[a], &vectors[b])
    })
}

/// Semantic chunking driven by precomputed dense sentence embeddings
/// (from an injected embedder). Takes precedence over the TF-IDF fallback.
pub fn chunk_with_embeddings(
    document: &Document,
    config: &ChunkConfig,
    tokenizer: &dyn Tokenizer,
    embeddings: &[Vec<f32>],
) -> Vec<Chunk> {
    chunk(document, config, tokenizer, Some(embeddings))
}
