//! Rewrite Orchestrator: drives the external rewriter over one batch.
//!
//! A failed or malformed rewrite never fails the run: the batch degrades to
//! its original text and every cited marker is recorded as missing, leaving
//! repair to the Backfill Validator.

use std::collections::BTreeSet;

use super::appendix::strip_appendix;
use super::grammar::{annotations, count_annotation_openers};
use super::reconcile::merge_entry;
use super::types::{
    Batch, BatchOutcome, BatchRegistryFragment, EnrichedBatch, FragmentEntry, Marker,
    RewrittenBatch,
};
use crate::pipeline::rewriting::{sanitize_llm_output, RewriteError, Rewriter};

pub const DEFAULT_REWRITE_ATTEMPTS: u32 = 2;

pub struct RewriteOrchestrator<'a> {
    rewriter: &'a dyn Rewriter,
    max_attempts: u32,
}

impl<'a> RewriteOrchestrator<'a> {
    pub fn new(rewriter: &'a dyn Rewriter, max_attempts: u32) -> Self {
        Self {
            rewriter,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Rewrite one enriched batch. Infallible by policy.
    pub fn rewrite(&self, enriched: &EnrichedBatch, batch: &Batch) -> RewrittenBatch {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            match self.try_rewrite(enriched, &batch.cited) {
                Ok((text, fragment)) => {
                    tracing::debug!(
                        batch_index = batch.index,
                        attempt,
                        annotations = fragment.len(),
                        missing = fragment.missing_count(),
                        "Batch rewritten"
                    );
                    return RewrittenBatch {
                        batch_index: batch.index,
                        text,
                        fragment,
                        outcome: BatchOutcome::Rewritten { attempts: attempt },
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        batch_index = batch.index,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Batch rewrite failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        tracing::warn!(
            batch_index = batch.index,
            cited = batch.cited.len(),
            "Passing batch through unrewritten, all cited markers missing"
        );
        RewrittenBatch {
            batch_index: batch.index,
            text: batch.text.clone(),
            fragment: BatchRegistryFragment::all_missing(batch.index, &batch.cited),
            outcome: BatchOutcome::PassThrough { reason },
        }
    }

    fn try_rewrite(
        &self,
        enriched: &EnrichedBatch,
        cited: &BTreeSet<Marker>,
    ) -> Result<(String, BatchRegistryFragment), RewriteError> {
        let raw = self.rewriter.rewrite(enriched)?;
        let text = strip_appendix(&sanitize_llm_output(&raw));
        validate_rewritten(&text)?;
        let fragment = parse_fragment(enriched.batch_index, &text, cited);
        Ok((restore_trailing_newline(text, &enriched.text), fragment))
    }
}

/// Reject output the pipeline cannot trust.
pub fn validate_rewritten(text: &str) -> Result<(), RewriteError> {
    if text.trim().is_empty() {
        return Err(RewriteError::MalformedResponse("empty output".to_string()));
    }
    let openers = count_annotation_openers(text);
    let parsed = annotations(text).len();
    if openers != parsed {
        return Err(RewriteError::MalformedResponse(format!(
            "{openers} annotation openers but {parsed} parsable annotations"
        )));
    }
    Ok(())
}

/// Derive the batch fragment from rewritten text.
///
/// One entry per annotated marker; duplicates fold with the reconciler's
/// merge. Cited markers the rewriter dropped without an annotation are
/// recorded as missing.
pub fn parse_fragment(
    batch_index: usize,
    text: &str,
    cited: &BTreeSet<Marker>,
) -> BatchRegistryFragment {
    let mut fragment = BatchRegistryFragment::new(batch_index);

    for annotation in annotations(text) {
        let entry = if annotation.missing {
            FragmentEntry::missing()
        } else {
            FragmentEntry::resolved(annotation.body)
        };
        let merged = match fragment.entries.get(&annotation.marker) {
            Some(existing) => merge_entry(existing, &entry),
            None => entry,
        };
        fragment.entries.insert(annotation.marker, merged);
    }

    for marker in cited {
        if !fragment.entries.contains_key(marker) {
            tracing::debug!(
                batch_index,
                marker = marker.value(),
                "Cited marker dropped by rewriter, recording as missing"
            );
            fragment.entries.insert(*marker, FragmentEntry::missing());
        }
    }

    fragment
}

/// Batches are concatenated verbatim, so keep the line break that separated
/// this batch from the next one.
fn restore_trailing_newline(mut text: String, source: &str) -> String {
    if source.ends_with('\n') && !text.ends_with('\n') {
        text.push('\n');
    }
    text
}
