//! Fixed-window chunking: contiguous token windows sliding by
//! `chunk_size - chunk_overlap` (spec.md §4.2).

use super::types::Chunk;
use super::word_spans;
use crate::config::ChunkConfig;
use crate::document::Document;
use crate::tokenizer::Tokenizer;

pub fn chunk(document: &Document, config: &ChunkConfig, tokenizer: &dyn Tokenizer) -> Vec<Chunk> {
    let content = &document.content;
    let spans = word_spans(content);
    if spans.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut idx = 0usize;
    let mut chunk_index = 0usize;

    while idx < spans.len() {
        let window_start = spans[idx].0;
        let mut end_idx = idx;
        let mut token_count = 0usize;
        let mut window_end = spans[idx].1;

        while end_idx < spans.len() {
            let (s, e) = spans[end_idx];
            let word_tokens = tokenizer.count(&content[s..e]).max(1);
            if end_idx > idx && token_count + word_tokens > config.chunk_size {
                break;
            }
            token_count += word_tokens;
            window_end = e;
            end_idx += 1;
        }

        let chunk_content = content[window_start..window_end].to_string();
        chunks.push(Chunk::new(
            document.id.clone(),
            chunk_content,
            window_start,
            window_end,
            token_count,
            chunk_index,
        ));
        chunk_index += 1;

        if end_idx >= spans.len() {
            break;
        }

        let advance_tokens = config.chunk_size.saturating_sub(config.chunk_overlap).max(1);
        let mut advanced = 0usize;
        let mut next_idx = idx;
        while next_idx < end_idx && advanced < advance_tokens {
            let (s, e) = spans[next_idx];
            advanced += tokenizer.count(&content[s..e]).max(1);
            next_idx += 1;
        }
        idx = next_idx.max(idx + 1);
    }

    // Merge a too-short trailing window into its predecessor.
    if chunks.len() > 1 {
        let last_short = chunks.last().map(|c| c.token_count < config.min_chunk_size).unwrap_or(false);
        if last_short {
            let last = chunks.pop().unwrap();
            let prev = chunks.last_mut().unwrap();
            prev.content = content[prev.start_pos..last.end_pos].to_string();
            prev.end_pos = last.end_pos;
            prev.token_count = tokenizer.count(&prev.content);
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::FallbackTokenizer;

    #[test]
    fn test_fixed_chunks_are_ordered_and_non_overlapping_in_start() {
        let doc = Document::new(
            "d1",
            "one two three four five six seven eight nine ten eleven twelve",
        );
        let config = ChunkConfig {
            chunk_size: 4,
            chunk_overlap: 1,
            min_chunk_size: 1,
            ..ChunkConfig::default()
        };
        let tokenizer = FallbackTokenizer;
        let chunks = chunk(&doc, &config, &tokenizer);
        assert!(chunks.len() > 1);
        for w in chunks.windows(2) {
            assert!(w[0].start_pos < w[1].start_pos);
            assert!(w[0].start_pos < w[0].end_pos);
        }
    }
}
