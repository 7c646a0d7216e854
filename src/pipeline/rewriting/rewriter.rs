use super::prompt::{build_stitch_prompt, STITCH_SYSTEM_PROMPT};
use super::types::{LlmClient, Rewriter};
use super::RewriteError;
use crate::pipeline::footnotes::types::EnrichedBatch;

/// Rewriter backed by an LLM, sending the fixed stitching instruction set.
pub struct LlmRewriter<C: LlmClient> {
    client: C,
    model: String,
}

impl<C: LlmClient> LlmRewriter<C> {
    pub fn new(client: C, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

impl<C: LlmClient> Rewriter for LlmRewriter<C> {
    fn rewrite(&self, batch: &EnrichedBatch) -> Result<String, RewriteError> {
        let prompt = build_stitch_prompt(&batch.text, batch.has_appendix());
        tracing::debug!(
            batch_index = batch.batch_index,
            model = %self.model,
            prompt_chars = prompt.len(),
            "Sending batch to rewriter"
        );
        self.client.generate(&self.model, &prompt, STITCH_SYSTEM_PROMPT)
    }
}

/// Rewriter from a closure. Handy for wrapping other capabilities and for tests.
pub struct FnRewriter<F>
where
    F: Fn(&EnrichedBatch) -> Result<String, RewriteError> + Send + Sync,
{
    f: F,
}

impl<F> FnRewriter<F>
where
    F: Fn(&EnrichedBatch) -> Result<String, RewriteError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Rewriter for FnRewriter<F>
where
    F: Fn(&EnrichedBatch) -> Result<String, RewriteError> + Send + Sync,
{
    fn rewrite(&self, batch: &EnrichedBatch) -> Result<String, RewriteError> {
        (self.f)(batch)
    }
}
