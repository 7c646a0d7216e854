//! Pipeline configuration for a stitch run.
//!
//! Layered: built-in defaults, then an optional JSON file, then `STITCH_*`
//! environment overrides. Policy constants (batch budget, truncation ratio,
//! chunking) live here rather than in pipeline code.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::footnotes::backfill::DEFAULT_TRUNCATION_RATIO;
use crate::pipeline::footnotes::orchestrator::DEFAULT_REWRITE_ATTEMPTS;
use crate::pipeline::footnotes::planner::DEFAULT_BATCH_CHAR_BUDGET;
use crate::pipeline::rewriting::DEFAULT_OLLAMA_URL;
use crate::pipeline::storage::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};

pub const DEFAULT_MODEL: &str = "gemma3:4b";
pub const DEFAULT_MAX_CONCURRENCY: usize = 2;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum characters per batch; a single larger page still forms one batch.
    pub batch_char_budget: usize,
    /// A rewritten definition below this fraction of the source length is truncated.
    pub truncation_ratio: f64,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Batches rewritten in parallel.
    pub max_concurrency: usize,
    /// Rewrite attempts per batch before it passes through unchanged.
    pub rewrite_attempts: u32,
    pub model: String,
    pub ollama_url: String,
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_char_budget: DEFAULT_BATCH_CHAR_BUDGET,
            truncation_ratio: DEFAULT_TRUNCATION_RATIO,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            rewrite_attempts: DEFAULT_REWRITE_ATTEMPTS,
            model: DEFAULT_MODEL.to_string(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

impl PipelineConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    /// Apply `STITCH_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup, keyed by `STITCH_*` variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STITCH_BATCH_CHAR_BUDGET") {
            self.batch_char_budget = parse_env("STITCH_BATCH_CHAR_BUDGET", v)?;
        }
        if let Some(v) = lookup("STITCH_TRUNCATION_RATIO") {
            self.truncation_ratio = parse_env("STITCH_TRUNCATION_RATIO", v)?;
        }
        if let Some(v) = lookup("STITCH_CHUNK_SIZE") {
            self.chunk_size = parse_env("STITCH_CHUNK_SIZE", v)?;
        }
        if let Some(v) = lookup("STITCH_CHUNK_OVERLAP") {
            self.chunk_overlap = parse_env("STITCH_CHUNK_OVERLAP", v)?;
        }
        if let Some(v) = lookup("STITCH_MAX_CONCURRENCY") {
            self.max_concurrency = parse_env("STITCH_MAX_CONCURRENCY", v)?;
        }
        if let Some(v) = lookup("STITCH_REWRITE_ATTEMPTS") {
            self.rewrite_attempts = parse_env("STITCH_REWRITE_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("STITCH_MODEL") {
            self.model = v;
        }
        if let Some(v) = lookup("STITCH_OLLAMA_URL") {
            self.ollama_url = v;
        }
        if let Some(v) = lookup("STITCH_TIMEOUT_SECS") {
            self.timeout_secs = parse_env("STITCH_TIMEOUT_SECS", v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_char_budget == 0 {
            return Err(ConfigError::Invalid("batch_char_budget must be positive".into()));
        }
        if !(self.truncation_ratio > 0.0 && self.truncation_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "truncation_ratio must be in (0, 1], got {}",
                self.truncation_ratio
            )));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be positive".into()));
        }
        if self.rewrite_attempts == 0 {
            return Err(ConfigError::Invalid("rewrite_attempts must be positive".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
