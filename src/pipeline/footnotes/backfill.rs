//! Backfill Validator: last-line repair of the reconciled registry and the
//! stitched text against the global registry.
//!
//! After validation every marker with a known source definition is resolved
//! and at least as long as its global definition.

use serde::Serialize;

use super::grammar::{annotations, render_annotation};
use super::types::{
    definition_len, FinalRegistry, FootnoteStatus, GlobalRegistry, Marker, Provenance,
    ReconciledEntry, ReconciledRegistry,
};

pub const DEFAULT_TRUNCATION_RATIO: f64 = 0.6;

/// Markers touched by backfill, grouped by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Missing in every batch, filled from the global registry.
    pub backfilled_missing: Vec<Marker>,
    /// Resolved but below the truncation ratio, replaced.
    pub repaired_truncated: Vec<Marker>,
    /// Resolved above the ratio but shorter than the source, upgraded.
    pub upgraded_shorter: Vec<Marker>,
    /// Defined in the source, never produced by any batch.
    pub unresolved_added: Vec<Marker>,
    /// Cited but defined nowhere.
    pub still_unresolved: Vec<Marker>,
    /// Inline annotations rewritten in the stitched text.
    pub text_patches: usize,
}

impl BackfillReport {
    pub fn repaired_count(&self) -> usize {
        self.backfilled_missing.len()
            + self.repaired_truncated.len()
            + self.upgraded_shorter.len()
            + self.unresolved_added.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackfillOutcome {
    pub registry: FinalRegistry,
    pub text: String,
    pub report: BackfillReport,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackfillValidator {
    truncation_ratio: f64,
}

impl Default for BackfillValidator {
    fn default() -> Self {
        Self::new(DEFAULT_TRUNCATION_RATIO)
    }
}

impl BackfillValidator {
    pub fn new(truncation_ratio: f64) -> Self {
        Self { truncation_ratio }
    }

    pub fn truncation_ratio(&self) -> f64 {
        self.truncation_ratio
    }

    /// True when `len` is below the ratio of `reference_len`.
    pub fn is_truncated(&self, len: usize, reference_len: usize) -> bool {
        (len as f64) < self.truncation_ratio * reference_len as f64
    }

    /// Repair the registry, then patch the stitched text from the repaired registry.
    pub fn validate(
        &self,
        reconciled: ReconciledRegistry,
        global: &GlobalRegistry,
        stitched: &str,
    ) -> BackfillOutcome {
        let mut report = BackfillReport::default();
        let registry = self.repair_registry(reconciled, global, &mut report);
        let (text, patches) = self.patch_text(stitched, &registry);
        report.text_patches = patches;

        for marker in &report.still_unresolved {
            tracing::warn!(
                marker = marker.value(),
                "Footnote cited but never defined in source"
            );
        }
        tracing::info!(
            backfilled = report.backfilled_missing.len(),
            truncated = report.repaired_truncated.len(),
            upgraded = report.upgraded_shorter.len(),
            added = report.unresolved_added.len(),
            unresolved = report.still_unresolved.len(),
            text_patches = patches,
            "Backfill validation complete"
        );

        BackfillOutcome {
            registry,
            text,
            report,
        }
    }

    fn repair_registry(
        &self,
        mut registry: ReconciledRegistry,
        global: &GlobalRegistry,
        report: &mut BackfillReport,
    ) -> ReconciledRegistry {
        for (marker, source) in global.iter() {
            let source_len = definition_len(source);
            let Some(entry) = registry.entries.get_mut(&marker) else {
                registry.entries.insert(
                    marker,
                    ReconciledEntry {
                        definition: source.to_string(),
                        status: FootnoteStatus::Resolved,
                        provenance: Some(Provenance::UnresolvedAdded),
                    },
                );
                report.unresolved_added.push(marker);
                continue;
            };

            let bucket = if !entry.is_resolved() {
                &mut report.backfilled_missing
            } else if self.is_truncated(entry.len(), source_len) {
                tracing::debug!(
                    marker = marker.value(),
                    rewritten_len = entry.len(),
                    source_len,
                    "Truncated footnote replaced from source"
                );
                &mut report.repaired_truncated
            } else if entry.len() < source_len {
                &mut report.upgraded_shorter
            } else {
                continue;
            };

            entry.definition = source.to_string();
            entry.status = FootnoteStatus::Resolved;
            entry.provenance = Some(Provenance::Backfilled);
            bucket.push(marker);
        }

        report.still_unresolved = registry.unresolved();
        registry
    }

    /// Rewrite inline annotations that are tagged missing or truncated
    /// relative to the final definition. Citation positions are untouched.
    fn patch_text(&self, stitched: &str, registry: &FinalRegistry) -> (String, usize) {
        let mut out = String::with_capacity(stitched.len());
        let mut cursor = 0;
        let mut patches = 0;

        for annotation in annotations(stitched) {
            let Some(entry) = registry.get(annotation.marker) else {
                continue;
            };
            if !entry.is_resolved() {
                continue;
            }
            let needs_patch = annotation.missing
                || self.is_truncated(definition_len(&annotation.body), entry.len());
            if !needs_patch {
                continue;
            }
            out.push_str(&stitched[cursor..annotation.span.start]);
            out.push_str(&render_annotation(annotation.marker, &entry.definition));
            cursor = annotation.span.end;
            patches += 1;
        }

        out.push_str(&stitched[cursor..]);
        (out, patches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(entries: &[(u32, &str)]) -> GlobalRegistry {
        let mut reg = GlobalRegistry::new();
        for (m, d) in entries {
            reg.insert_longest(Marker(*m), d.to_string());
        }
        reg
    }

    fn reconciled(entries: &[(u32, &str, FootnoteStatus)]) -> ReconciledRegistry {
        let mut reg = ReconciledRegistry::default();
        for (m, d, status) in entries {
            let provenance = (*status == FootnoteStatus::Resolved).then_some(Provenance::Rewriter);
            reg.entries.insert(
                Marker(*m),
                ReconciledEntry {
                    definition: d.to_string(),
                    status: *status,
                    provenance,
                },
            );
        }
        reg
    }

    #[test]
    fn truncated_definition_is_replaced() {
        let source = "d".repeat(100);
        let short = "d".repeat(30);
        let g = global(&[(9, &source)]);
        let r = reconciled(&[(9, &short, FootnoteStatus::Resolved)]);
        let text = format!("Claim [9]. {{FOOTNOTE [9]: {short}}}");

        let out = BackfillValidator::default().validate(r, &g, &text);
        let entry = out.registry.get(Marker(9)).unwrap();
        assert_eq!(entry.definition, source);
        assert_eq!(entry.provenance, Some(Provenance::Backfilled));
        assert_eq!(out.report.repaired_truncated, vec![Marker(9)]);
        assert_eq!(out.text, format!("Claim [9]. {{FOOTNOTE [9]: {source}}}"));
        assert_eq!(out.report.text_patches, 1);
    }

    #[test]
    fn missing_entry_and_annotation_are_backfilled() {
        let g = global(&[(2, "Segment figures are unaudited.")]);
        let r = reconciled(&[(2, "", FootnoteStatus::Missing)]);
        let text = "Segment revenue rose [2]. {FOOTNOTE [2]: MISSING} Next sentence.";

        let out = BackfillValidator::default().validate(r, &g, text);
        let entry = out.registry.get(Marker(2)).unwrap();
        assert!(entry.is_resolved());
        assert_eq!(entry.provenance, Some(Provenance::Backfilled));
        assert_eq!(
            out.text,
            "Segment revenue rose [2]. {FOOTNOTE [2]: Segment figures are unaudited.} Next sentence."
        );
        assert_eq!(out.report.backfilled_missing, vec![Marker(2)]);
    }

    #[test]
    fn backfilled_definition_with_braces_parses_whole() {
        let source = "Rates in {fixed} tranches exclude hedging gains and are reported at the end of the period.";
        let g = global(&[(3, source)]);
        let r = reconciled(&[(3, "", FootnoteStatus::Missing)]);
        let text = "Floating exposure declined [3]. {FOOTNOTE [3]: MISSING} Next.";

        let out = BackfillValidator::default().validate(r, &g, text);
        let found = annotations(&out.text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].body, source);
        assert!(out.text.ends_with("} Next."));
    }

    #[test]
    fn never_produced_marker_is_added() {
        let g = global(&[(5, "Orphan definition.")]);
        let out = BackfillValidator::default().validate(ReconciledRegistry::default(), &g, "");
        let entry = out.registry.get(Marker(5)).unwrap();
        assert_eq!(entry.provenance, Some(Provenance::UnresolvedAdded));
        assert!(entry.is_resolved());
        assert_eq!(out.report.unresolved_added, vec![Marker(5)]);
    }

    #[test]
    fn undefined_marker_stays_missing_without_provenance() {
        let r = reconciled(&[(8, "", FootnoteStatus::Missing)]);
        let text = "Claim [8]. {FOOTNOTE [8]: MISSING}";
        let out = BackfillValidator::default().validate(r, &GlobalRegistry::new(), text);

        let entry = out.registry.get(Marker(8)).unwrap();
        assert_eq!(entry.status, FootnoteStatus::Missing);
        assert_eq!(entry.provenance, None);
        assert_eq!(out.report.still_unresolved, vec![Marker(8)]);
        assert_eq!(out.text, text);
    }

    #[test]
    fn near_complete_definition_is_upgraded_not_patched() {
        let source = "Includes the Meridian acquisition closed in March.";
        let rewritten = "Includes the Meridian acquisition closed in Mar";
        let g = global(&[(1, source)]);
        let r = reconciled(&[(1, rewritten, FootnoteStatus::Resolved)]);
        let text = format!("Revenue [1]. {{FOOTNOTE [1]: {rewritten}}}");

        let out = BackfillValidator::default().validate(r, &g, &text);
        assert_eq!(out.registry.get(Marker(1)).unwrap().definition, source);
        assert_eq!(out.report.upgraded_shorter, vec![Marker(1)]);
        assert_eq!(out.text, text);
        assert_eq!(out.report.text_patches, 0);
    }

    #[test]
    fn complete_entry_is_left_alone() {
        let g = global(&[(3, "Short.")]);
        let r = reconciled(&[(3, "Short, with extra context.", FootnoteStatus::Resolved)]);
        let out = BackfillValidator::default().validate(r, &g, "");
        let entry = out.registry.get(Marker(3)).unwrap();
        assert_eq!(entry.definition, "Short, with extra context.");
        assert_eq!(entry.provenance, Some(Provenance::Rewriter));
        assert_eq!(out.report.repaired_count(), 0);
    }

    #[test]
    fn final_definitions_are_never_shorter_than_source() {
        let g = global(&[(1, "aaaaaaaaaa"), (2, "bbbbbbbbbb"), (3, "cccccccccc"), (4, "dd")]);
        let r = reconciled(&[
            (1, "", FootnoteStatus::Missing),
            (2, "bbb", FootnoteStatus::Resolved),
            (3, "ccccccccc", FootnoteStatus::Resolved),
        ]);
        let out = BackfillValidator::default().validate(r, &g, "");
        for (marker, source) in g.iter() {
            let entry = out.registry.get(marker).unwrap();
            assert!(entry.len() >= definition_len(source), "marker {marker}");
        }
    }

    #[test]
    fn ratio_boundary_is_exclusive() {
        let v = BackfillValidator::new(0.6);
        assert!(v.is_truncated(59, 100));
        assert!(!v.is_truncated(60, 100));
    }

    #[test]
    fn text_without_annotations_is_unchanged() {
        let g = global(&[(1, "Definition.")]);
        let r = reconciled(&[(1, "", FootnoteStatus::Missing)]);
        let raw = "Pass-through body [1].\n[1] Definition.\nPage 1 of 1\n";
        let out = BackfillValidator::default().validate(r, &g, raw);
        assert_eq!(out.text, raw);
    }
}
