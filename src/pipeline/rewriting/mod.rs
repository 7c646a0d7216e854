//! External rewriting capability.
//!
//! The footnote pipeline only sees the `Rewriter` trait: batch text in,
//! rewritten text out, explicit failure signal. `LlmRewriter` implements it
//! on top of any `LlmClient` (Ollama in production, mocks in tests).

pub mod types;
pub mod prompt;
pub mod sanitize;
pub mod ollama;
pub mod rewriter;

pub use types::*;
pub use prompt::*;
pub use sanitize::*;
pub use ollama::*;
pub use rewriter::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("Ollama is not running at {0}")]
    OllamaConnection(String),

    #[error("Ollama returned error (status {status}): {body}")]
    OllamaError { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Malformed rewriter output: {0}")]
    MalformedResponse(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),
}
