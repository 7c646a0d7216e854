use super::RewriteError;
use crate::pipeline::footnotes::types::EnrichedBatch;

/// Ollama LLM client abstraction (allows mocking)
pub trait LlmClient: Send + Sync {
    fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
    ) -> Result<String, RewriteError>;

    fn is_model_available(&self, model: &str) -> Result<bool, RewriteError>;

    fn list_models(&self) -> Result<Vec<String>, RewriteError>;
}

/// The bounded-context rewriting step, one batch at a time.
///
/// Implementations must tolerate being retried with identical input.
pub trait Rewriter: Send + Sync {
    fn rewrite(&self, batch: &EnrichedBatch) -> Result<String, RewriteError>;
}
