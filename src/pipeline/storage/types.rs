use serde::Serialize;

use crate::pipeline::footnotes::types::Marker;

/// A chunk of stitched text, ready for indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    pub content: String,
    pub chunk_index: usize,
    /// Byte offset of `content` in the collapsed text.
    pub byte_offset: usize,
    /// True when the chunk carries at least one inline footnote annotation.
    pub has_annotation: bool,
    /// Annotated markers in the chunk, ascending, deduplicated.
    pub markers: Vec<Marker>,
}

/// Chunking strategy trait
pub trait Chunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk>;
}
