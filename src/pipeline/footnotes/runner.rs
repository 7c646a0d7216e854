//! Stitch Runner: the full pipeline over one document.
//!
//! GlobalRegistry and the batch partition are built once, up front, and
//! shared read-only. Batches are rewritten on a bounded pool of scoped
//! threads; each worker writes only the result slot of the batch it pulled
//! and folds the fragment into a shared accumulator.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::appendix::inject;
use super::backfill::{BackfillReport, BackfillValidator};
use super::orchestrator::RewriteOrchestrator;
use super::planner::BatchPlanner;
use super::reconcile::RegistryAccumulator;
use super::registry::extract_global_registry;
use super::types::{Batch, FinalRegistry, GlobalRegistry, RegistryScorecard, RewrittenBatch, StitchEvent};
use super::FootnoteError;
use crate::pipeline::rewriting::{LlmRewriter, OllamaClient, Rewriter};
use crate::pipeline::storage::{AnnotationSafeSegmenter, TextChunk};
use crate::pipeline_config::PipelineConfig;

/// Progress callback. Called from worker threads.
pub type ProgressFn<'a> = &'a (dyn Fn(StitchEvent) + Sync);

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub batch_count: usize,
    pub rewritten_batches: usize,
    pub pass_through_batches: usize,
    pub chunk_count: usize,
    pub backfill: BackfillReport,
    pub scorecard: RegistryScorecard,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Everything downstream indexing consumes.
#[derive(Debug, Clone, Serialize)]
pub struct StitchOutput {
    pub run_id: Uuid,
    pub global_registry: GlobalRegistry,
    pub final_registry: FinalRegistry,
    pub final_text: String,
    pub chunks: Vec<TextChunk>,
    pub report: RunReport,
}

pub struct StitchRunner {
    config: PipelineConfig,
}

impl StitchRunner {
    pub fn new(config: PipelineConfig) -> Result<Self, FootnoteError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// LLM rewriter over the configured Ollama instance and model.
    pub fn ollama_rewriter(&self) -> Result<LlmRewriter<OllamaClient>, FootnoteError> {
        let client = OllamaClient::new(&self.config.ollama_url, self.config.timeout_secs)?;
        Ok(LlmRewriter::new(client, self.config.model.clone()))
    }

    pub fn run(&self, raw_text: &str, rewriter: &dyn Rewriter) -> Result<StitchOutput, FootnoteError> {
        self.run_with(raw_text, rewriter, None, None)
    }

    /// Run with optional progress reporting and cancellation.
    ///
    /// A set cancel flag stops workers from pulling further batches; the
    /// run then returns `Cancelled` and all batch results are discarded.
    pub fn run_with(
        &self,
        raw_text: &str,
        rewriter: &dyn Rewriter,
        progress: Option<ProgressFn<'_>>,
        cancel: Option<&AtomicBool>,
    ) -> Result<StitchOutput, FootnoteError> {
        let start = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let global = extract_global_registry(raw_text);
        let batches = BatchPlanner::new(self.config.batch_char_budget).plan(raw_text);

        tracing::info!(
            %run_id,
            chars = raw_text.chars().count(),
            batches = batches.len(),
            footnotes = global.len(),
            "Starting footnote stitch"
        );
        if let Some(progress) = progress {
            progress(StitchEvent::Started {
                batch_count: batches.len(),
                footnote_count: global.len(),
            });
        }

        let (rewritten, accumulator) =
            self.rewrite_batches(&batches, &global, rewriter, progress, cancel)?;

        let pass_through_batches = rewritten.iter().filter(|b| b.is_pass_through()).count();
        let stitched: String = rewritten.iter().map(|b| b.text.as_str()).collect();
        let reconciled = accumulator.finish();

        let outcome = BackfillValidator::new(self.config.truncation_ratio)
            .validate(reconciled, &global, &stitched);

        let chunks = AnnotationSafeSegmenter::new(self.config.chunk_size, self.config.chunk_overlap)
            .segment(&outcome.text);

        let scorecard = outcome.registry.scorecard();
        let duration_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            %run_id,
            pass_through = pass_through_batches,
            chunks = chunks.len(),
            completeness_pct = scorecard.completeness_pct,
            duration_ms,
            "Footnote stitch complete"
        );
        if let Some(progress) = progress {
            progress(StitchEvent::Completed {
                completeness_pct: scorecard.completeness_pct,
                duration_ms,
            });
        }

        Ok(StitchOutput {
            run_id,
            report: RunReport {
                batch_count: batches.len(),
                rewritten_batches: batches.len() - pass_through_batches,
                pass_through_batches,
                chunk_count: chunks.len(),
                backfill: outcome.report,
                scorecard,
                started_at,
                duration_ms,
            },
            global_registry: global,
            final_registry: outcome.registry,
            final_text: outcome.text,
            chunks,
        })
    }

    /// Rewrite every batch; results in document order.
    fn rewrite_batches(
        &self,
        batches: &[Batch],
        global: &GlobalRegistry,
        rewriter: &dyn Rewriter,
        progress: Option<ProgressFn<'_>>,
        cancel: Option<&AtomicBool>,
    ) -> Result<(Vec<RewrittenBatch>, RegistryAccumulator), FootnoteError> {
        let is_cancelled = || cancel.is_some_and(|flag| flag.load(Ordering::SeqCst));

        let orchestrator = RewriteOrchestrator::new(rewriter, self.config.rewrite_attempts);
        let cursor = AtomicUsize::new(0);
        let accumulator = Mutex::new(RegistryAccumulator::new());
        let slots: Vec<OnceLock<RewrittenBatch>> = batches.iter().map(|_| OnceLock::new()).collect();
        let workers = self.config.max_concurrency.clamp(1, batches.len().max(1));

        let worker = || loop {
            if is_cancelled() {
                break;
            }
            let index = cursor.fetch_add(1, Ordering::SeqCst);
            let Some(batch) = batches.get(index) else {
                break;
            };

            let enriched = inject(batch, global);
            let result = orchestrator.rewrite(&enriched, batch);

            accumulator
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .absorb(&result.fragment);
            if let Some(progress) = progress {
                progress(StitchEvent::BatchCompleted {
                    batch_index: batch.index,
                    pass_through: result.is_pass_through(),
                });
            }
            store_result(&slots[index], index, result);
        };

        let panicked = std::thread::scope(|s| {
            let handles: Vec<_> = (0..workers).map(|_| s.spawn(worker)).collect();
            handles
                .into_iter()
                .map(|handle| handle.join())
                .filter(Result::is_err)
                .count()
        });

        if panicked > 0 {
            tracing::error!(panicked, "Rewrite workers panicked");
            return Err(FootnoteError::WorkerPanicked);
        }
        if is_cancelled() {
            tracing::warn!(
                completed = slots.iter().filter(|s| s.get().is_some()).count(),
                total = batches.len(),
                "Stitch run cancelled, discarding batch results"
            );
            return Err(FootnoteError::Cancelled);
        }

        let rewritten = slots
            .into_iter()
            .map(OnceLock::into_inner)
            .collect::<Option<Vec<_>>>()
            .ok_or(FootnoteError::WorkerPanicked)?;
        let accumulator = accumulator
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        Ok((rewritten, accumulator))
    }
}

/// Each batch index is pulled once, so a filled slot means a worker bug.
/// The first result is kept.
fn store_result(slot: &OnceLock<RewrittenBatch>, batch_index: usize, result: RewrittenBatch) -> bool {
    if slot.set(result).is_err() {
        tracing::error!(batch_index, "Batch result slot already filled, dropping duplicate");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::pipeline::footnotes::appendix::{strip_appendix, APPENDIX_CLOSE};
    use crate::pipeline::footnotes::grammar::annotations;
    use crate::pipeline::footnotes::planner::split_pages;
    use crate::pipeline::footnotes::types::{FootnoteStatus, Marker, Provenance};
    use crate::pipeline::rewriting::{FnRewriter, RewriteError};

    const FOUR_PAGES: &str = "\
Revenue grew 34% year over year [1].
[1] Includes the Meridian acquisition, closed in March.
[2] Segment figures are unaudited and exclude discontinued operations.
Page 1 of 4
Operations expanded into two new regions.
Page 2 of 4
Headcount remained flat.
Page 3 of 4
Segment revenue rose sharply [2].
Page 4 of 4
";

    fn runner(budget: usize) -> StitchRunner {
        StitchRunner::new(PipelineConfig {
            batch_char_budget: budget,
            ..PipelineConfig::default()
        })
        .unwrap()
    }

    /// Budget that fits the first two pages but not three.
    fn two_page_budget() -> usize {
        let pages = split_pages(FOUR_PAGES);
        pages[0].text.chars().count() + pages[1].text.chars().count()
    }

    /// Replaces each citation with an inline annotation using the appendix or
    /// in-batch definitions, and drops definition lines.
    fn echo_rewriter() -> impl Rewriter {
        FnRewriter::new(|batch| {
            let defs = extract_global_registry(&batch.text.replace(APPENDIX_CLOSE, ""));
            let body = strip_appendix(&batch.text);
            let mut out = String::new();
            for line in body.lines() {
                if line.starts_with('[') {
                    continue;
                }
                let mut line = line.to_string();
                for (marker, def) in defs.iter() {
                    let cite = marker.to_string();
                    if line.contains(&cite) {
                        line = line.replace(&cite, &format!("{cite} {{FOOTNOTE {cite}: {def}}}"));
                    }
                }
                out.push_str(&line);
                out.push('\n');
            }
            Ok(out)
        })
    }

    #[test]
    fn duplicate_batch_result_keeps_first() {
        use crate::pipeline::footnotes::types::{BatchOutcome, BatchRegistryFragment};

        let make = |text: &str| RewrittenBatch {
            batch_index: 0,
            text: text.to_string(),
            fragment: BatchRegistryFragment::new(0),
            outcome: BatchOutcome::Rewritten { attempts: 1 },
        };
        let slot = OnceLock::new();
        assert!(store_result(&slot, 0, make("first")));
        assert!(!store_result(&slot, 0, make("second")));
        assert_eq!(slot.get().map(|b| b.text.as_str()), Some("first"));
    }

    #[test]
    fn total_rewrite_failure_is_backfilled() {
        let runner = runner(two_page_budget());
        let failing = FnRewriter::new(|_| Err(RewriteError::Timeout(300)));
        let out = runner.run(FOUR_PAGES, &failing).unwrap();

        assert_eq!(out.report.batch_count, 2);
        assert_eq!(out.report.pass_through_batches, 2);
        for marker in [Marker(1), Marker(2)] {
            let entry = out.final_registry.get(marker).unwrap();
            assert_eq!(entry.status, FootnoteStatus::Resolved);
            assert_eq!(entry.provenance, Some(Provenance::Backfilled));
        }
        assert_eq!(out.final_text, FOUR_PAGES);
        assert_eq!(out.report.scorecard.completeness_pct, 100);
    }

    #[test]
    fn cross_page_definition_reaches_second_batch() {
        let runner = runner(two_page_budget());
        let out = runner.run(FOUR_PAGES, &echo_rewriter()).unwrap();

        assert_eq!(out.report.pass_through_batches, 0);
        let entry = out.final_registry.get(Marker(2)).unwrap();
        assert_eq!(entry.provenance, Some(Provenance::Rewriter));
        assert_eq!(
            entry.definition,
            "Segment figures are unaudited and exclude discontinued operations."
        );
        let inline: Vec<Marker> = annotations(&out.final_text).iter().map(|a| a.marker).collect();
        assert_eq!(inline, vec![Marker(1), Marker(2)]);
        assert!(!out.final_text.contains("INJECTED_FOOTNOTES"));
    }

    #[test]
    fn final_definitions_cover_global_registry() {
        let out = runner(two_page_budget()).run(FOUR_PAGES, &echo_rewriter()).unwrap();
        for (marker, def) in out.global_registry.iter() {
            let entry = out.final_registry.get(marker).unwrap();
            assert!(entry.len() >= def.chars().count());
        }
    }

    #[test]
    fn results_independent_of_concurrency() {
        let raw = FOUR_PAGES.repeat(3);
        let sequential = StitchRunner::new(PipelineConfig {
            batch_char_budget: 120,
            max_concurrency: 1,
            ..PipelineConfig::default()
        })
        .unwrap()
        .run(&raw, &echo_rewriter())
        .unwrap();
        let parallel = StitchRunner::new(PipelineConfig {
            batch_char_budget: 120,
            max_concurrency: 4,
            ..PipelineConfig::default()
        })
        .unwrap()
        .run(&raw, &echo_rewriter())
        .unwrap();

        assert!(sequential.report.batch_count > 2);
        assert_eq!(sequential.final_text, parallel.final_text);
        assert_eq!(sequential.final_registry, parallel.final_registry);
        assert_eq!(sequential.chunks, parallel.chunks);
    }

    #[test]
    fn progress_events_reported() {
        let events = Mutex::new(Vec::new());
        let record = |e: StitchEvent| events.lock().unwrap().push(e);
        runner(two_page_budget())
            .run_with(FOUR_PAGES, &echo_rewriter(), Some(&record), None)
            .unwrap();

        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0],
            StitchEvent::Started { batch_count: 2, footnote_count: 2 }
        );
        assert!(matches!(events[3], StitchEvent::Completed { completeness_pct: 100, .. }));
    }

    #[test]
    fn cancellation_discards_results() {
        let cancel = AtomicBool::new(false);
        let calls = AtomicU32::new(0);
        let rewriter = FnRewriter::new(|batch| {
            calls.fetch_add(1, Ordering::SeqCst);
            cancel.store(true, Ordering::SeqCst);
            Ok(batch.text.clone())
        });
        let runner = StitchRunner::new(PipelineConfig {
            batch_char_budget: 60,
            max_concurrency: 1,
            ..PipelineConfig::default()
        })
        .unwrap();

        let err = runner
            .run_with(FOUR_PAGES, &rewriter, None, Some(&cancel))
            .unwrap_err();
        assert!(matches!(err, FootnoteError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_rewriter_is_reported() {
        let rewriter = FnRewriter::new(|_| -> Result<String, RewriteError> {
            panic!("rewriter blew up")
        });
        let err = runner(two_page_budget()).run(FOUR_PAGES, &rewriter).unwrap_err();
        assert!(matches!(err, FootnoteError::WorkerPanicked));
    }

    #[test]
    fn empty_document_runs_cleanly() {
        let failing = FnRewriter::new(|_| Err(RewriteError::Timeout(1)));
        let out = runner(4500).run("", &failing).unwrap();
        assert_eq!(out.report.batch_count, 0);
        assert!(out.final_registry.is_empty());
        assert!(out.chunks.is_empty());
    }

    #[test]
    fn invalid_config_rejected() {
        let err = StitchRunner::new(PipelineConfig {
            max_concurrency: 0,
            ..PipelineConfig::default()
        });
        assert!(matches!(err, Err(FootnoteError::Config(_))));
    }

    #[test]
    fn output_serializes_to_json() {
        let out = runner(two_page_budget()).run(FOUR_PAGES, &echo_rewriter()).unwrap();
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["final_registry"]["entries"]["2"]["provenance"], "rewriter");
        assert_eq!(json["report"]["batch_count"], 2);
    }
}
