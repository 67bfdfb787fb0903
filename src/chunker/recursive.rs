//! Recursive chunking: try splitters in order of granularity, recursing into
//! the next splitter only for pieces that still exceed `chunk_size`
//! (spec.md §4.2). Overlap is added between adjacent output chunks by
//! prepending the trailing `chunk_overlap` tokens of the previous chunk.
//!
//! Reconstructing a chunk's original byte span after a split/rejoin cycle is
//! inherently approximate once whitespace between pieces has been
//! normalized to a single space; positions are recovered by substring search
//! from the previous chunk's end, which is exact for any document without
//! repeated whitespace runs and a safe monotonic estimate otherwise.

use super::types::Chunk;
use crate::config::ChunkConfig;
use crate::document::Document;
use crate::tokenizer::Tokenizer;

const SPLITTER_COUNT: usize = 5;

fn split_once(text: &str, splitter_idx: usize) -> Vec<String> {
    match splitter_idx {
        0 => text
            .split("\n\n")
            .map(str::to_string)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        1 => split_on_sentence(text),
        2 => text
            .split('\n')
            .map(str::to_string)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        3 => text
            .split_whitespace()
            .map(str::to_string)
            .filter(|s| !s.is_empty())
            .collect(),
        _ => text.chars().map(|c| c.to_string()).collect(),
    }
}

fn split_on_sentence(text: &str) -> Vec<String> {
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

fn recursive_pieces(
    text: &str,
    config: &ChunkConfig,
    tokenizer: &dyn Tokenizer,
    splitter_idx: usize,
) -> Vec<String> {
    if splitter_idx >= SPLITTER_COUNT {
        return vec![text.to_string()];
    }

    let pieces = split_once(text, splitter_idx);
    if pieces.is_empty() {
        return Vec::new();
    }
    if pieces.len() == 1 && pieces[0] == text {
        // splitter made no progress; try the next one directly
        return recursive_pieces(text, config, tokenizer, splitter_idx + 1);
    }

    let mut out = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    for piece in pieces {
        let piece_tokens = tokenizer.count(&piece);
        if piece_tokens > config.chunk_size {
            if !current.trim().is_empty() {
                out.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            out.extend(recursive_pieces(&piece, config, tokenizer, splitter_idx + 1));
            continue;
        }
        if current_tokens + piece_tokens > config.chunk_size && !current.is_empty() {
            out.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&piece);
        current_tokens += piece_tokens;
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}

fn locate(content: &str, piece: &str, search_from: usize) -> (usize, usize) {
    let trimmed = piece.trim();
    if trimmed.is_empty() {
        return (search_from, search_from);
    }
    if let Some(pos) = content.get(search_from..).and_then(|rest| rest.find(trimmed)) {
        let start = search_from + pos;
        (start, start + trimmed.len())
    } else {
        let end = (search_from + trimmed.len()).min(content.len());
        (search_from, end.max(search_from))
    }
}

fn trailing_tokens(text: &str, overlap_tokens: usize, tokenizer: &dyn Tokenizer) -> String {
    if overlap_tokens == 0 {
        return String::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut acc_tokens = 0usize;
    let mut start_word = words.len();
    for (i, w) in words.iter().enumerate().rev() {
        acc_tokens += tokenizer.count(w).max(1);
        start_word = i;
        if acc_tokens >= overlap_tokens {
            break;
        }
    }
    words[start_word..].join(" ")
}

pub fn chunk(document: &Document, config: &ChunkConfig, tokenizer: &dyn Tokenizer) -> Vec<Chunk> {
    let content = &document.content;
    let pieces = recursive_pieces(content, config, tokenizer, 0);

    let mut chunks = Vec::new();
    let mut search_from = 0usize;
    let mut prev_content: Option<String> = None;

    for (i, piece) in pieces.iter().enumerate() {
        let body = if i == 0 {
            piece.clone()
        } else if let Some(prev) = &prev_content {
            let overlap = trailing_tokens(prev, config.chunk_overlap, tokenizer);
            if overlap.is_empty() {
                piece.clone()
            } else {
                format!("{overlap} {piece}")
            }
        } else {
            piece.clone()
        };

        let (start, end) = locate(content, piece, search_from);
        if end <= start {
            continue;
        }
        search_from = end;

        let token_count = tokenizer.count(&body);
        chunks.push(Chunk::new(
            document.id.clone(),
            body.clone(),
            start,
            end,
            token_count,
            chunks.len(),
        ));
        prev_content = Some(piece.clone());
    }

    chunks
}
