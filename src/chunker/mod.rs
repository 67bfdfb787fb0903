//! Document segmentation (spec.md §4.2).
//!
//! `chunk_document` dispatches to one of four strategies, each a closed
//! variant with its own module, following the "polymorphism over strategies"
//! guidance of spec.md §9 (a closed enum-like set, not open inheritance).

pub mod document_aware;
pub mod fixed;
pub mod recursive;
pub mod semantic;
pub mod types;

pub use types::{meta_keys, Chunk};

use crate::config::{ChunkConfig, ChunkStrategy};
use crate::document::Document;
use crate::error::Result;
use crate::tokenizer::Tokenizer;

/// Splits `text` on whitespace, returning the byte span of each run of
/// non-whitespace characters in document order. Shared by every strategy
/// that needs to walk "words" while keeping exact byte positions.
pub(crate) fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Segment `document` into ordered chunks per `config`, using the TF-IDF
/// fallback for the semantic strategy. See [`chunk_document_with_embeddings`]
/// to supply dense sentence embeddings instead.
pub fn chunk_document(
    document: &Document,
    config: &ChunkConfig,
    tokenizer: &dyn Tokenizer,
) -> Result<Vec<Chunk>> {
    chunk_document_with_embeddings(document, config, tokenizer, None)
}

/// Segment `document` into ordered chunks per `config`, optionally feeding
/// precomputed dense sentence embeddings to the semantic strategy (ignored
/// by every other strategy). Passing `None` for `sentence_embeddings` falls
/// the semantic strategy back to its TF-IDF path (spec.md §9).
///
/// Edge cases per spec.md §4.2: an empty document yields zero chunks; a
/// document whose total token count is at or below `min_chunk_size` yields
/// exactly one chunk containing the whole document.
pub fn chunk_document_with_embeddings(
    document: &Document,
    config: &ChunkConfig,
    tokenizer: &dyn Tokenizer,
    sentence_embeddings: Option<&[Vec<f32>]>,
) -> Result<Vec<Chunk>> {
    config.validate()?;

    if document.content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let total_tokens = tokenizer.count(&document.content);
    if total_tokens <= config.min_chunk_size {
        return Ok(vec![Chunk::new(
            document.id.clone(),
            document.content.clone(),
            0,
            document.content.len(),
            total_tokens,
            0,
        )]);
    }

    let chunks = match config.strategy {
        ChunkStrategy::Fixed => fixed::chunk(document, config, tokenizer),
        ChunkStrategy::Recursive => recursive::chunk(document, config, tokenizer),
        ChunkStrategy::Semantic => semantic::chunk(document, config, tokenizer, sentence_embeddings),
        ChunkStrategy::Document => document_aware::chunk(document, config, tokenizer),
    };
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::FallbackTokenizer;

    #[test]
    fn test_empty_document_yields_no_chunks() {
        let doc = Document::new("d1", "   ");
        let config = ChunkConfig::default();
        let tokenizer = FallbackTokenizer;
        let chunks = chunk_document(&doc, &config, &tokenizer).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_short_document_yields_one_chunk() {
        let doc = Document::new("d1", "short doc");
        let config = ChunkConfig::default();
        let tokenizer = FallbackTokenizer;
        let chunks = chunk_document(&doc, &config, &tokenizer).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "short doc");
    }

    #[test]
    fn test_word_spans_byte_positions() {
        let spans = word_spans("hello  world");
        assert_eq!(spans, vec![(0, 5), (7, 12)]);
    }
}
