//! Global Registry Extractor: single pass over the untouched source text.

use super::grammar::{classify_line, LineToken};
use super::types::{GlobalRegistry, Marker};

/// Build the authoritative `marker → definition` map.
///
/// A definition runs from its declaration line up to (excluding) the next
/// declaration, page boundary or confidentiality header. Interior line breaks
/// are kept. When a marker is defined more than once the longer text wins, so
/// a truncated page-bottom copy never overwrites a fuller one.
pub fn extract_global_registry(raw_text: &str) -> GlobalRegistry {
    let mut registry = GlobalRegistry::new();
    let mut current: Option<(Marker, String)> = None;

    for line in raw_text.lines() {
        match classify_line(line) {
            LineToken::MarkerDeclaration { marker, rest } => {
                flush(&mut registry, current.take());
                current = Some((marker, rest.to_string()));
            }
            LineToken::PageBoundary { .. } | LineToken::ConfidentialityHeader => {
                flush(&mut registry, current.take());
            }
            LineToken::Body => {
                if let Some((_, body)) = current.as_mut() {
                    body.push('\n');
                    body.push_str(line);
                }
            }
        }
    }
    flush(&mut registry, current.take());

    tracing::debug!(footnotes = registry.len(), "Extracted global footnote registry");
    registry
}

fn flush(registry: &mut GlobalRegistry, pending: Option<(Marker, String)>) {
    let Some((marker, body)) = pending else { return };
    let definition = body.trim().to_string();
    if definition.is_empty() {
        return;
    }
    if !registry.insert_longest(marker, definition) {
        tracing::trace!(marker = marker.value(), "Kept longer existing definition");
    }
}
