//! Chunking of stitched text for downstream indexing.

pub mod types;
pub mod chunker;

pub use types::*;
pub use chunker::*;
