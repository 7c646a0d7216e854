//! Post-LLM output sanitization.
//!
//! Strips model artifacts (thinking blocks, unused tokens, code fences)
//! before the orchestrator parses annotations.

use std::sync::LazyLock;

use regex::Regex;

static UNUSED_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<unused\d+>").expect("valid regex"));

static THINK_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A```[a-zA-Z]*\n(.*?)\n?```\z").expect("valid regex"));

/// Strip model-specific artifacts from raw LLM output.
///
/// Handles:
/// 1. Gemma thinking prefixes (`<unusedN>thought\n...`)
/// 2. `<think>...</think>` blocks
/// 3. Stray `<unusedN>` tokens
/// 4. A code fence wrapping the whole response
pub fn sanitize_llm_output(raw: &str) -> String {
    let mut text = raw.to_string();

    if let Some(idx) = text.find("<unused") {
        if let Some(thought_offset) = text[idx..].find("thought\n") {
            text = text[idx + thought_offset + 8..].to_string();
        }
    }

    text = THINK_BLOCK_RE.replace_all(&text, "").into_owned();
    text = UNUSED_TOKEN_RE.replace_all(&text, "").into_owned();

    let trimmed = text.trim();
    match FENCE_RE.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}
