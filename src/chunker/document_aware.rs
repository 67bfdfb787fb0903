//! Structure-aware chunking: detects ATX headers, fenced code blocks, and
//! pipe-delimited tables, turning headers into chunk boundaries and keeping
//! fenced/table blocks intact as single chunks when configured to preserve
//! them (spec.md §4.2).

use super::types::{meta_keys, Chunk};
use crate::config::ChunkConfig;
use crate::document::Document;
use crate::tokenizer::Tokenizer;

fn atx_header_level(trimmed: &str) -> Option<u8> {
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if (1..=6).contains(&hashes) && trimmed.as_bytes().get(hashes) == Some(&b' ') {
        Some(hashes as u8)
    } else {
        None
    }
}

fn flush_buffer(
    chunks: &mut Vec<Chunk>,
    doc_id: &str,
    content: &str,
    buf_start: &mut Option<usize>,
    buf_end: usize,
    tokenizer: &dyn Tokenizer,
    heading: Option<(String, u8)>,
) {
    if let Some(start) = buf_start.take() {
        if buf_end > start {
            let body = content[start..buf_end].to_string();
            if !body.trim().is_empty() {
                let tc = tokenizer.count(&body);
                let mut c = Chunk::new(doc_id.to_string(), body, start, buf_end, tc, chunks.len());
                if let Some((h, lvl)) = heading {
                    c = c
                        .with_metadata(meta_keys::HEADING, h)
                        .with_metadata(meta_keys::HEADING_LEVEL, lvl.to_string());
                }
                chunks.push(c);
            }
        }
    }
}

pub fn chunk(document: &Document, config: &ChunkConfig, tokenizer: &dyn Tokenizer) -> Vec<Chunk> {
    let content = &document.content;

    let mut line_info: Vec<(String, usize)> = Vec::new();
    let mut pos = 0usize;
    for line in content.split_inclusive('\n') {
        line_info.push((line.trim_end_matches('\n').to_string(), pos));
        pos += line.len();
    }
    let n = line_info.len();

    let mut chunks = Vec::new();
    let mut buf_start: Option<usize> = None;
    let mut buf_end = 0usize;
    let mut current_heading: Option<(String, u8)> = None;

    let mut i = 0usize;
    while i < n {
        let (text, start) = line_info[i].clone();
        let line_end = start + text.len();
        let trimmed = text.trim_start();

        if config.preserve_code_blocks && trimmed.starts_with("```") {
            flush_buffer(&mut chunks, &document.id, content, &mut buf_start, buf_end, tokenizer, current_heading.take());
            let fence_start = start;
            let mut j = i + 1;
            while j < n && !line_info[j].0.trim_start().starts_with("```") {
                j += 1;
            }
            let fence_end = if j < n {
                (line_info[j].1 + line_info[j].0.len()).min(content.len())
            } else {
                content.len()
            };
            let body = content[fence_start..fence_end].to_string();
            let tc = tokenizer.count(&body);
            let oversize = tc > config.chunk_size;
            let mut c = Chunk::new(document.id.clone(), body, fence_start, fence_end, tc, chunks.len())
                .with_metadata(meta_keys::CODE_BLOCK, "true");
            if oversize {
                c = c.mark_oversize();
            }
            chunks.push(c);
            i = j + 1;
            continue;
        }

        if config.preserve_tables && trimmed.starts_with('|') {
            flush_buffer(&mut chunks, &document.id, content, &mut buf_start, buf_end, tokenizer, current_heading.take());
            let table_start = start;
            let mut j = i;
            while j < n && line_info[j].0.trim_start().starts_with('|') {
                j += 1;
            }
            let table_end = (line_info[j - 1].1 + line_info[j - 1].0.len()).min(content.len());
            let body = content[table_start..table_end].to_string();
            let tc = tokenizer.count(&body);
            chunks.push(
                Chunk::new(document.id.clone(), body, table_start, table_end, tc, chunks.len())
                    .with_metadata(meta_keys::TABLE, "true"),
            );
            i = j;
            continue;
        }

        if config.preserve_headers {
            if let Some(level) = atx_header_level(trimmed) {
                flush_buffer(&mut chunks, &document.id, content, &mut buf_start, buf_end, tokenizer, current_heading.take());
                current_heading = Some((trimmed.trim_start_matches('#').trim().to_string(), level));
            }
        }

        if buf_start.is_none() {
            buf_start = Some(start);
        }
        buf_end = line_end;

        let current_tokens = tokenizer.count(&content[buf_start.unwrap()..buf_end]);
        if current_tokens >= config.chunk_size {
            flush_buffer(&mut chunks, &document.id, content, &mut buf_start, buf_end, tokenizer, current_heading.clone());
        }

        i += 1;
    }

    flush_buffer(&mut chunks, &document.id, content, &mut buf_start, buf_end, tokenizer, current_heading.take());

    chunks
}
