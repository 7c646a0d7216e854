//! Registry Reconciler: folds per-batch fragments with a "best entry wins" merge.
//!
//! The merge is the maximum under a total order (status, then length, then
//! text), so it is associative and commutative. Fragments can be folded in
//! any order, or in parallel and re-combined, with an identical result.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::types::{
    BatchRegistryFragment, FootnoteStatus, FragmentEntry, Marker, Provenance, ReconciledEntry,
    ReconciledRegistry,
};

/// Total order over competing entries for one marker.
///
/// 1. `Resolved` beats `Missing`.
/// 2. Same status: the longer definition wins.
/// 3. Equal length: lexicographically greater text wins.
pub fn compare_entries(a: &FragmentEntry, b: &FragmentEntry) -> Ordering {
    a.status
        .cmp(&b.status)
        .then_with(|| a.len().cmp(&b.len()))
        .then_with(|| a.definition.cmp(&b.definition))
}

/// Binary merge of two entries for the same marker.
pub fn merge_entry(a: &FragmentEntry, b: &FragmentEntry) -> FragmentEntry {
    match compare_entries(a, b) {
        Ordering::Less => b.clone(),
        _ => a.clone(),
    }
}

/// Incremental collector; absorb fragments as they complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryAccumulator {
    merged: BTreeMap<Marker, FragmentEntry>,
    fragments_absorbed: usize,
}

impl RegistryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, fragment: &BatchRegistryFragment) {
        for (marker, entry) in &fragment.entries {
            self.absorb_entry(*marker, entry);
        }
        self.fragments_absorbed += 1;
    }

    fn absorb_entry(&mut self, marker: Marker, entry: &FragmentEntry) {
        match self.merged.get_mut(&marker) {
            Some(existing) => {
                if compare_entries(existing, entry) == Ordering::Less {
                    *existing = entry.clone();
                }
            }
            None => {
                self.merged.insert(marker, entry.clone());
            }
        }
    }

    /// Combine two partial accumulations.
    pub fn combine(mut self, other: RegistryAccumulator) -> Self {
        for (marker, entry) in &other.merged {
            self.absorb_entry(*marker, entry);
        }
        self.fragments_absorbed += other.fragments_absorbed;
        self
    }

    pub fn fragments_absorbed(&self) -> usize {
        self.fragments_absorbed
    }

    pub fn finish(self) -> ReconciledRegistry {
        let entries = self
            .merged
            .into_iter()
            .map(|(marker, entry)| {
                let provenance = match entry.status {
                    FootnoteStatus::Resolved => Some(Provenance::Rewriter),
                    FootnoteStatus::Missing => None,
                };
                (
                    marker,
                    ReconciledEntry {
                        definition: entry.definition,
                        status: entry.status,
                        provenance,
                    },
                )
            })
            .collect();
        ReconciledRegistry { entries }
    }
}

/// Fold every fragment into one reconciled registry.
pub fn reconcile<'a, I>(fragments: I) -> ReconciledRegistry
where
    I: IntoIterator<Item = &'a BatchRegistryFragment>,
{
    let mut acc = RegistryAccumulator::new();
    for fragment in fragments {
        acc.absorb(fragment);
    }
    tracing::debug!(
        fragments = acc.fragments_absorbed(),
        markers = acc.merged.len(),
        "Reconciled batch registry fragments"
    );
    acc.finish()
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn fragment(batch_index: usize, entries: &[(u32, FragmentEntry)]) -> BatchRegistryFragment {
        BatchRegistryFragment {
            batch_index,
            entries: entries.iter().map(|(m, e)| (Marker(*m), e.clone())).collect(),
        }
    }

    #[test]
    fn resolved_beats_missing() {
        let missing = FragmentEntry::missing();
        let resolved = FragmentEntry::resolved("x");
        assert_eq!(merge_entry(&missing, &resolved), resolved);
        assert_eq!(merge_entry(&resolved, &missing), resolved);
    }

    #[test]
    fn resolved_beats_longer_missing_text() {
        let missing = FragmentEntry {
            definition: "a long note that was flagged missing anyway".into(),
            status: FootnoteStatus::Missing,
        };
        let resolved = FragmentEntry::resolved("short");
        assert_eq!(merge_entry(&missing, &resolved), resolved);
    }

    #[test]
    fn longer_definition_wins_between_resolved() {
        let truncated = FragmentEntry::resolved("Revenue includes");
        let full = FragmentEntry::resolved("Revenue includes a one-time insurance payout.");
        assert_eq!(merge_entry(&truncated, &full), full);
        assert_eq!(merge_entry(&full, &truncated), full);
    }

    #[test]
    fn equal_length_tie_is_deterministic() {
        let a = FragmentEntry::resolved("abc");
        let b = FragmentEntry::resolved("abd");
        assert_eq!(merge_entry(&a, &b), merge_entry(&b, &a));
    }

    #[test]
    fn missing_in_one_batch_resolved_in_another() {
        let a = fragment(0, &[(7, FragmentEntry::missing())]);
        let b = fragment(1, &[(7, FragmentEntry::resolved("r".repeat(120)))]);

        let reg = reconcile([&a, &b]);
        let entry = reg.get(Marker(7)).unwrap();
        assert_eq!(entry.status, FootnoteStatus::Resolved);
        assert_eq!(entry.len(), 120);
        assert_eq!(entry.provenance, Some(Provenance::Rewriter));
    }

    #[test]
    fn missing_only_entry_has_no_provenance() {
        let a = fragment(0, &[(3, FragmentEntry::missing())]);
        let reg = reconcile([&a]);
        let entry = reg.get(Marker(3)).unwrap();
        assert_eq!(entry.status, FootnoteStatus::Missing);
        assert_eq!(entry.provenance, None);
    }

    #[test]
    fn empty_input_yields_empty_registry() {
        assert!(reconcile(std::iter::empty()).is_empty());
    }

    fn random_entry(rng: &mut StdRng) -> FragmentEntry {
        if rng.gen_bool(0.3) {
            FragmentEntry::missing()
        } else {
            let len = rng.gen_range(1..12);
            let ch = ['a', 'b', 'c'][rng.gen_range(0..3)];
            FragmentEntry::resolved(ch.to_string().repeat(len))
        }
    }

    #[test]
    fn merge_is_order_independent() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..50 {
            let mut fragments: Vec<BatchRegistryFragment> = Vec::new();
            for i in 0..6 {
                let mut entries: Vec<(u32, FragmentEntry)> = Vec::new();
                for m in 1..=5 {
                    if rng.gen_bool(0.6) {
                        entries.push((m, random_entry(&mut rng)));
                    }
                }
                fragments.push(fragment(i, &entries));
            }

            let expected = reconcile(fragments.iter());
            for _ in 0..10 {
                fragments.shuffle(&mut rng);
                assert_eq!(reconcile(fragments.iter()), expected);
            }
        }
    }

    #[test]
    fn partial_accumulations_combine_to_same_result() {
        let f: Vec<BatchRegistryFragment> = vec![
            fragment(0, &[(1, FragmentEntry::resolved("one")), (2, FragmentEntry::missing())]),
            fragment(1, &[(2, FragmentEntry::resolved("two, fully")), (3, FragmentEntry::missing())]),
            fragment(2, &[(1, FragmentEntry::resolved("one, longer")), (3, FragmentEntry::resolved("3"))]),
        ];

        let mut left = RegistryAccumulator::new();
        left.absorb(&f[2]);
        let mut right = RegistryAccumulator::new();
        right.absorb(&f[0]);
        right.absorb(&f[1]);

        let combined = right.combine(left);
        assert_eq!(combined.fragments_absorbed(), 3);
        assert_eq!(combined.finish(), reconcile(f.iter()));
    }
}
