//! Shared chunk type and well-known metadata keys (spec.md §3, §9).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Recognized metadata keys. Any other key is opaque pass-through.
pub mod meta_keys {
    pub const HEADING: &str = "heading";
    pub const HEADING_LEVEL: &str = "heading_level";
    pub const SECTION: &str = "section";
    pub const SOURCE_FILE: &str = "source_file";
    pub const SOURCE_PATH: &str = "source_path";
    pub const CONTENT_TYPE: &str = "content_type";
    pub const LOADER: &str = "loader";
    pub const CONTEXT: &str = "context";
    pub const DOC_ID: &str = "doc_id";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const OVERSIZE: &str = "oversize";
    pub const ORIGINAL_CHUNK: &str = "original_chunk";
    pub const TABLE: &str = "table";
    pub const CODE_BLOCK: &str = "code_block";
}

/// A contiguous segment of a document, positioned by half-open byte range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    pub content: String,
    pub start_pos: usize,
    pub end_pos: usize,
    pub token_count: usize,
    pub chunk_index: usize,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    pub fn new(
        doc_id: impl Into<String>,
        content: impl Into<String>,
        start_pos: usize,
        end_pos: usize,
        token_count: usize,
        chunk_index: usize,
    ) -> Self {
        let doc_id = doc_id.into();
        let id = format!("{doc_id}#{chunk_index}");
        let mut metadata = HashMap::new();
        metadata.insert(meta_keys::DOC_ID.to_string(), doc_id.clone());
        metadata.insert(meta_keys::CHUNK_INDEX.to_string(), chunk_index.to_string());
        Self {
            id,
            doc_id,
            content: content.into(),
            start_pos,
            end_pos,
            token_count,
            chunk_index,
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn mark_oversize(mut self) -> Self {
        self.metadata
            .insert(meta_keys::OVERSIZE.to_string(), "true".to_string());
        self
    }

    pub fn is_oversize(&self) -> bool {
        self.metadata.get(meta_keys::OVERSIZE).map(String::as_str) == Some("true")
    }
}
