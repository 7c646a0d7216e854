use std::collections::{BTreeSet, VecDeque};
use std::ops::Range;

use super::types::{Chunker, TextChunk};
use crate::pipeline::footnotes::grammar::annotations;

pub const DEFAULT_CHUNK_SIZE: usize = 800;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// Paragraph, line, sentence, word. The empty separator is the character fallback.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Recursive character splitter that treats every `{FOOTNOTE [N]: ...}`
/// block as atomic.
///
/// Blocks are first collapsed to a single line. No split point is ever
/// placed inside a block; a block larger than the chunk size becomes one
/// oversized chunk.
pub struct AnnotationSafeSegmenter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl AnnotationSafeSegmenter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn segment(&self, text: &str) -> Vec<TextChunk> {
        let collapsed = collapse_annotations(text);
        let atoms: Vec<Range<usize>> = annotations(&collapsed)
            .into_iter()
            .map(|a| a.span)
            .collect();

        let mut pieces = Vec::new();
        self.split_range(&collapsed, 0..collapsed.len(), 0, &atoms, &mut pieces);

        let chunks: Vec<TextChunk> = self
            .merge_pieces(&collapsed, &pieces)
            .into_iter()
            .filter_map(|range| trim_range(&collapsed, range))
            .enumerate()
            .map(|(chunk_index, range)| build_chunk(&collapsed, range, chunk_index))
            .collect();

        tracing::debug!(
            chunks = chunks.len(),
            annotated = chunks.iter().filter(|c| c.has_annotation).count(),
            chunk_size = self.chunk_size,
            "Segmented stitched text"
        );
        chunks
    }

    /// Recursively split `range` into pieces no longer than the chunk size,
    /// except atoms which always stay whole.
    fn split_range(
        &self,
        text: &str,
        range: Range<usize>,
        level: usize,
        atoms: &[Range<usize>],
        out: &mut Vec<Range<usize>>,
    ) {
        if range.is_empty() {
            return;
        }
        if char_len(text, &range) <= self.chunk_size {
            out.push(range);
            return;
        }

        for (offset, separator) in SEPARATORS[level..].iter().enumerate() {
            if separator.is_empty() {
                char_units(text, range, atoms, out);
                return;
            }
            let cuts = separator_cuts(text, &range, separator, atoms);
            if cuts.is_empty() {
                continue;
            }

            let next_level = level + offset + 1;
            let mut start = range.start;
            for cut in cuts.into_iter().chain(std::iter::once(range.end)) {
                self.split_range(text, start..cut, next_level, atoms, out);
                start = cut;
            }
            return;
        }
    }

    /// Pack adjacent pieces into chunks, carrying an overlap tail forward.
    fn merge_pieces(&self, text: &str, pieces: &[Range<usize>]) -> Vec<Range<usize>> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<(Range<usize>, usize)> = VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            let len = char_len(text, piece);
            if total + len > self.chunk_size && !window.is_empty() {
                chunks.push(window_range(&window));
                while total > self.chunk_overlap
                    || (total + len > self.chunk_size && total > 0)
                {
                    let Some((_, dropped)) = window.pop_front() else { break };
                    total -= dropped;
                }
            }
            window.push_back((piece.clone(), len));
            total += len;
        }

        if !window.is_empty() {
            chunks.push(window_range(&window));
        }
        chunks
    }
}

impl Default for AnnotationSafeSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl Chunker for AnnotationSafeSegmenter {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        self.segment(text)
    }
}

/// Fold line breaks inside every annotation block into single spaces.
pub fn collapse_annotations(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for annotation in annotations(text) {
        let block = &text[annotation.span.clone()];
        out.push_str(&text[cursor..annotation.span.start]);
        if block.contains(['\n', '\r']) {
            let single_line: Vec<&str> = block
                .split(['\n', '\r'])
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect();
            out.push_str(&single_line.join(" "));
        } else {
            out.push_str(block);
        }
        cursor = annotation.span.end;
    }

    out.push_str(&text[cursor..]);
    out
}

fn char_len(text: &str, range: &Range<usize>) -> usize {
    text[range.clone()].chars().count()
}

fn overlaps_atom(range: &Range<usize>, atoms: &[Range<usize>]) -> bool {
    atoms.iter().any(|a| range.start < a.end && a.start < range.end)
}

/// Split points just after each separator occurrence that does not touch an atom.
fn separator_cuts(
    text: &str,
    range: &Range<usize>,
    separator: &str,
    atoms: &[Range<usize>],
) -> Vec<usize> {
    text[range.clone()]
        .match_indices(separator)
        .map(|(i, _)| range.start + i)
        .filter(|&start| !overlaps_atom(&(start..start + separator.len()), atoms))
        .map(|start| start + separator.len())
        .filter(|&cut| cut < range.end)
        .collect()
}

/// Character fallback: one piece per character, one piece per whole atom.
fn char_units(text: &str, range: Range<usize>, atoms: &[Range<usize>], out: &mut Vec<Range<usize>>) {
    let mut pos = range.start;
    while pos < range.end {
        if let Some(atom) = atoms.iter().find(|a| a.start <= pos && pos < a.end) {
            let end = atom.end.min(range.end);
            out.push(pos..end);
            pos = end;
            continue;
        }
        let width = text[pos..].chars().next().map_or(1, char::len_utf8);
        out.push(pos..pos + width);
        pos += width;
    }
}

fn window_range(window: &VecDeque<(Range<usize>, usize)>) -> Range<usize> {
    let start = window.front().map_or(0, |(r, _)| r.start);
    let end = window.back().map_or(start, |(r, _)| r.end);
    start..end
}

fn trim_range(text: &str, range: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[range.clone()];
    let leading = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let start = range.start + leading;
    Some(start..start + trimmed.len())
}

fn build_chunk(text: &str, range: Range<usize>, chunk_index: usize) -> TextChunk {
    let content = text[range.clone()].to_string();
    let markers: BTreeSet<_> = annotations(&content).into_iter().map(|a| a.marker).collect();
    TextChunk {
        has_annotation: !markers.is_empty(),
        markers: markers.into_iter().collect(),
        chunk_index,
        byte_offset: range.start,
        content,
    }
}
