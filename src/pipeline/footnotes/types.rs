//! Core types for the footnote stitching pipeline.
//!
//! These types model the full lifecycle:
//! Raw text → Global Registry + Batches → Enriched Batch → Rewritten Batch
//! (fragment) → Reconciled Registry → Final Registry + Final Text.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════
// Marker
// ═══════════════════════════════════════════

/// Integer footnote key, cited in body text as `[N]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marker(pub u32);

impl Marker {
    pub fn value(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

/// Definition length used for every completeness comparison.
pub fn definition_len(text: &str) -> usize {
    text.chars().count()
}

// ═══════════════════════════════════════════
// Status & Provenance
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FootnoteStatus {
    /// The rewriter could not find a definition in the batch's visible context.
    Missing,
    Resolved,
}

impl FootnoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for FootnoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a final registry entry was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Rewriter,
    Backfilled,
    /// Defined in the source but never produced by any batch.
    UnresolvedAdded,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rewriter => "rewriter",
            Self::Backfilled => "backfilled",
            Self::UnresolvedAdded => "unresolved_added",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════
// Global Registry
// ═══════════════════════════════════════════

/// Authoritative `marker → definition` map built once from the untouched source.
///
/// Read-only after extraction. For a marker defined more than once, holds the
/// longest definition seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRegistry {
    entries: BTreeMap<Marker, String>,
}

impl GlobalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a definition, keeping whichever of the existing and new text is longer.
    /// Returns true if the new definition was kept.
    pub fn insert_longest(&mut self, marker: Marker, definition: String) -> bool {
        match self.entries.get(&marker) {
            Some(existing) if definition_len(existing) >= definition_len(&definition) => false,
            _ => {
                self.entries.insert(marker, definition);
                true
            }
        }
    }

    pub fn get(&self, marker: Marker) -> Option<&str> {
        self.entries.get(&marker).map(String::as_str)
    }

    pub fn contains(&self, marker: Marker) -> bool {
        self.entries.contains_key(&marker)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn markers(&self) -> impl Iterator<Item = Marker> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Marker, &str)> + '_ {
        self.entries.iter().map(|(m, d)| (*m, d.as_str()))
    }
}

// ═══════════════════════════════════════════
// Pages & Batches (output of the planner)
// ═══════════════════════════════════════════

/// One page of raw text, including the page-boundary line that closes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<'a> {
    pub index: usize,
    /// Byte offset of the page in the raw text.
    pub offset: usize,
    pub text: &'a str,
}

/// A contiguous, page-aligned slice of raw text sent as one rewrite unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub index: usize,
    /// Byte offset of the batch in the raw text.
    pub offset: usize,
    pub text: String,
    /// 0-based page indices spanned by this batch, ascending.
    pub pages: Vec<usize>,
    /// Markers cited in body lines of this batch.
    pub cited: BTreeSet<Marker>,
    /// Markers declared (defined) inside this batch.
    pub declared: BTreeSet<Marker>,
}

impl Batch {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// A batch augmented with an appendix of cross-page definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedBatch {
    pub batch_index: usize,
    /// Batch text followed by the injected appendix (if any).
    pub text: String,
    /// Markers whose definitions were injected, ascending.
    pub injected: Vec<Marker>,
}

impl EnrichedBatch {
    pub fn has_appendix(&self) -> bool {
        !self.injected.is_empty()
    }
}

// ═══════════════════════════════════════════
// Batch Registry Fragment (output of the rewrite step)
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentEntry {
    pub definition: String,
    pub status: FootnoteStatus,
}

impl FragmentEntry {
    pub fn resolved(definition: impl Into<String>) -> Self {
        Self {
            definition: definition.into(),
            status: FootnoteStatus::Resolved,
        }
    }

    pub fn missing() -> Self {
        Self {
            definition: String::new(),
            status: FootnoteStatus::Missing,
        }
    }

    pub fn len(&self) -> usize {
        definition_len(&self.definition)
    }

    pub fn is_empty(&self) -> bool {
        self.definition.is_empty()
    }
}

/// Per-batch `marker → (definition, status)` map. Ephemeral.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRegistryFragment {
    pub batch_index: usize,
    pub entries: BTreeMap<Marker, FragmentEntry>,
}

impl BatchRegistryFragment {
    pub fn new(batch_index: usize) -> Self {
        Self {
            batch_index,
            entries: BTreeMap::new(),
        }
    }

    /// Fragment for a batch whose rewrite failed: every cited marker is missing.
    pub fn all_missing(batch_index: usize, cited: &BTreeSet<Marker>) -> Self {
        Self {
            batch_index,
            entries: cited.iter().map(|m| (*m, FragmentEntry::missing())).collect(),
        }
    }

    pub fn get(&self, marker: Marker) -> Option<&FragmentEntry> {
        self.entries.get(&marker)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn missing_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.status == FootnoteStatus::Missing)
            .count()
    }
}

/// How the orchestrator obtained a batch's output text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchOutcome {
    Rewritten { attempts: u32 },
    /// The external step failed; original batch text was passed through.
    PassThrough { reason: String },
}

/// Rewritten text plus the fragment derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenBatch {
    pub batch_index: usize,
    pub text: String,
    pub fragment: BatchRegistryFragment,
    pub outcome: BatchOutcome,
}

impl RewrittenBatch {
    pub fn is_pass_through(&self) -> bool {
        matches!(self.outcome, BatchOutcome::PassThrough { .. })
    }
}

// ═══════════════════════════════════════════
// Reconciled / Final Registry
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledEntry {
    pub definition: String,
    pub status: FootnoteStatus,
    /// `None` for a marker no source could resolve.
    pub provenance: Option<Provenance>,
}

impl ReconciledEntry {
    pub fn len(&self) -> usize {
        definition_len(&self.definition)
    }

    pub fn is_empty(&self) -> bool {
        self.definition.is_empty()
    }

    pub fn is_resolved(&self) -> bool {
        self.status == FootnoteStatus::Resolved
    }
}

/// `marker → (definition, status, provenance)`. The Backfill Validator's output
/// of the same type is the final registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledRegistry {
    pub entries: BTreeMap<Marker, ReconciledEntry>,
}

pub type FinalRegistry = ReconciledRegistry;

impl ReconciledRegistry {
    pub fn get(&self, marker: Marker) -> Option<&ReconciledEntry> {
        self.entries.get(&marker)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Markers that are still missing with no known definition.
    pub fn unresolved(&self) -> Vec<Marker> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.is_resolved())
            .map(|(m, _)| *m)
            .collect()
    }

    /// Footnote completeness summary for downstream reporting.
    pub fn scorecard(&self) -> RegistryScorecard {
        let mut card = RegistryScorecard {
            total: self.entries.len(),
            ..RegistryScorecard::default()
        };
        for entry in self.entries.values() {
            if entry.is_resolved() {
                card.resolved += 1;
            } else {
                card.missing += 1;
            }
            match entry.provenance {
                Some(Provenance::Rewriter) => card.from_rewriter += 1,
                Some(Provenance::Backfilled) => card.backfilled += 1,
                Some(Provenance::UnresolvedAdded) => card.unresolved_added += 1,
                None => {}
            }
        }
        card.completeness_pct = if card.total == 0 {
            0
        } else {
            (card.resolved * 100 / card.total) as u8
        };
        card
    }
}

/// Completeness summary of a registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryScorecard {
    pub total: usize,
    pub resolved: usize,
    pub missing: usize,
    pub from_rewriter: usize,
    pub backfilled: usize,
    pub unresolved_added: usize,
    /// `resolved / total` as an integer percentage (0 for an empty registry).
    pub completeness_pct: u8,
}

// ═══════════════════════════════════════════
// Progress events
// ═══════════════════════════════════════════

/// Progress events emitted by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StitchEvent {
    Started { batch_count: usize, footnote_count: usize },
    BatchCompleted { batch_index: usize, pass_through: bool },
    Completed { completeness_pct: u8, duration_ms: u64 },
}
