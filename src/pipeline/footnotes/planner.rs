//! Batch Planner: page-aligned batches capped at a character budget.
//!
//! Pages are never split. Splitting a page mid-way would separate a citation
//! from its own page's definitions, which is the problem batching must not
//! re-introduce.

use super::grammar::{cited_markers, classify_line, declared_markers, lines_with_offsets, LineToken};
use super::types::{Batch, Page};

/// Default batch budget in characters.
pub const DEFAULT_BATCH_CHAR_BUDGET: usize = 4500;

/// Split raw text into pages. A page ends after its page-boundary line;
/// text after the last boundary forms a final page.
pub fn split_pages(raw_text: &str) -> Vec<Page<'_>> {
    let mut pages = Vec::new();
    let mut page_start = 0;

    for (offset, line) in lines_with_offsets(raw_text) {
        if matches!(classify_line(line), LineToken::PageBoundary { .. }) {
            let end = offset + line.len();
            pages.push(Page {
                index: pages.len(),
                offset: page_start,
                text: &raw_text[page_start..end],
            });
            page_start = end;
        }
    }

    if page_start < raw_text.len() {
        pages.push(Page {
            index: pages.len(),
            offset: page_start,
            text: &raw_text[page_start..],
        });
    }

    pages
}

/// Greedy page merger.
#[derive(Debug, Clone, Copy)]
pub struct BatchPlanner {
    char_budget: usize,
}

impl BatchPlanner {
    pub fn new(char_budget: usize) -> Self {
        Self { char_budget }
    }

    pub fn char_budget(&self) -> usize {
        self.char_budget
    }

    /// Plan batches in document order; their concatenation is `raw_text`.
    pub fn plan(&self, raw_text: &str) -> Vec<Batch> {
        let pages = split_pages(raw_text);
        let mut batches = Vec::new();
        let mut group: Vec<&Page<'_>> = Vec::new();
        let mut group_chars = 0;

        for page in &pages {
            let page_chars = page.text.chars().count();
            if !group.is_empty() && group_chars + page_chars > self.char_budget {
                batches.push(build_batch(batches.len(), raw_text, &group));
                group.clear();
                group_chars = 0;
            }
            if page_chars > self.char_budget {
                tracing::debug!(
                    page_index = page.index,
                    page_chars,
                    budget = self.char_budget,
                    "Page exceeds batch budget, keeping it whole"
                );
            }
            group.push(page);
            group_chars += page_chars;
        }
        if !group.is_empty() {
            batches.push(build_batch(batches.len(), raw_text, &group));
        }

        tracing::debug!(
            pages = pages.len(),
            batches = batches.len(),
            budget = self.char_budget,
            "Planned page-aligned batches"
        );
        batches
    }
}

impl Default for BatchPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_CHAR_BUDGET)
    }
}

fn build_batch(index: usize, raw_text: &str, pages: &[&Page<'_>]) -> Batch {
    let start = pages.first().map(|p| p.offset).unwrap_or(0);
    let end = pages.last().map(|p| p.offset + p.text.len()).unwrap_or(start);
    let text = &raw_text[start..end];

    Batch {
        index,
        offset: start,
        text: text.to_string(),
        pages: pages.iter().map(|p| p.index).collect(),
        cited: cited_markers(text),
        declared: declared_markers(text),
    }
}
