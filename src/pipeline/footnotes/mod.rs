//! Footnote stitching: resolve every `[N]` citation against its definition,
//! wherever in the document that definition lives, and inline it as
//! `{FOOTNOTE [N]: ...}` so downstream chunking never separates the two.
//!
//! Stages: Global Registry Extractor, Batch Planner, Appendix Injector,
//! Rewrite Orchestrator, Registry Reconciler, Backfill Validator. The
//! Annotation-Safe Segmenter lives in `pipeline::storage`.

pub mod types;
pub mod grammar;
pub mod registry;
pub mod planner;
pub mod appendix;
pub mod orchestrator;
pub mod reconcile;
pub mod backfill;
pub mod runner;

pub use types::*;
pub use registry::extract_global_registry;
pub use planner::BatchPlanner;
pub use appendix::{inject, strip_appendix};
pub use orchestrator::RewriteOrchestrator;
pub use reconcile::{merge_entry, reconcile, RegistryAccumulator};
pub use backfill::{BackfillOutcome, BackfillReport, BackfillValidator};
pub use runner::{RunReport, StitchOutput, StitchRunner};

use thiserror::Error;

use crate::pipeline::rewriting::RewriteError;
use crate::pipeline_config::ConfigError;

#[derive(Error, Debug)]
pub enum FootnoteError {
    #[error("Rewrite error: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Stitch run cancelled")]
    Cancelled,

    #[error("Rewrite worker panicked")]
    WorkerPanicked,
}
