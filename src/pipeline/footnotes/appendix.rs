//! Appendix Injector: gives each batch the definitions it cites but does not contain.
//!
//! This is what lets a citation on page 3 find a definition that only
//! appears on page 7.

use std::sync::LazyLock;

use regex::Regex;

use super::types::{Batch, EnrichedBatch, GlobalRegistry, Marker};

pub const APPENDIX_OPEN: &str = "<<<INJECTED_FOOTNOTES>>>";
pub const APPENDIX_CLOSE: &str = "<<<END_INJECTED_FOOTNOTES>>>";

static APPENDIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\n*<<<INJECTED_FOOTNOTES>>>.*?(?:<<<END_INJECTED_FOOTNOTES>>>\n?|\z)")
        .expect("valid regex")
});

/// Append an appendix for every cited marker whose definition is absent from the batch.
///
/// Additive only: the batch text is copied unchanged and the appendix follows it.
pub fn inject(batch: &Batch, global: &GlobalRegistry) -> EnrichedBatch {
    let needed: Vec<(Marker, &str)> = batch
        .cited
        .iter()
        .filter_map(|marker| global.get(*marker).map(|def| (*marker, def)))
        .filter(|(_, def)| !batch.text.contains(def))
        .collect();

    if needed.is_empty() {
        return EnrichedBatch {
            batch_index: batch.index,
            text: batch.text.clone(),
            injected: Vec::new(),
        };
    }

    let mut text = batch.text.clone();
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text.push('\n');
    text.push_str(APPENDIX_OPEN);
    text.push('\n');
    for (marker, definition) in &needed {
        text.push_str(&format!("{marker} {definition}\n"));
    }
    text.push_str(APPENDIX_CLOSE);
    text.push('\n');

    tracing::debug!(
        batch_index = batch.index,
        injected = needed.len(),
        "Injected cross-page footnote definitions"
    );

    EnrichedBatch {
        batch_index: batch.index,
        text,
        injected: needed.into_iter().map(|(m, _)| m).collect(),
    }
}

/// Remove appendix sections, including one left unterminated at the end of the text.
pub fn strip_appendix(text: &str) -> String {
    if !text.contains(APPENDIX_OPEN) {
        return text.to_string();
    }
    APPENDIX_RE.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::footnotes::planner::BatchPlanner;
    use crate::pipeline::footnotes::registry::extract_global_registry;

    fn registry(entries: &[(u32, &str)]) -> GlobalRegistry {
        let mut reg = GlobalRegistry::new();
        for (m, d) in entries {
            reg.insert_longest(Marker(*m), d.to_string());
        }
        reg
    }

    fn single_batch(text: &str) -> Batch {
        BatchPlanner::new(100_000).plan(text).remove(0)
    }

    #[test]
    fn no_appendix_when_definitions_are_local() {
        let batch = single_batch("Claim [1].\n[1] Local note.\nPage 1/1\n");
        let reg = registry(&[(1, "Local note.")]);
        let enriched = inject(&batch, &reg);
        assert!(!enriched.has_appendix());
        assert_eq!(enriched.text, batch.text);
    }

    #[test]
    fn injects_cross_page_definition() {
        let batch = single_batch("Later claim [2].\nPage 4/4\n");
        let reg = registry(&[(1, "Other note."), (2, "Defined on page one.")]);
        let enriched = inject(&batch, &reg);

        assert_eq!(enriched.injected, vec![Marker(2)]);
        assert!(enriched.text.starts_with(&batch.text));
        assert!(enriched.text.contains(APPENDIX_OPEN));
        assert!(enriched.text.contains("[2] Defined on page one.\n"));
        assert!(!enriched.text.contains("Other note."));
    }

    #[test]
    fn unknown_marker_is_not_injected() {
        let batch = single_batch("Cites [9] which nobody defines.");
        let enriched = inject(&batch, &GlobalRegistry::new());
        assert!(enriched.injected.is_empty());
    }

    #[test]
    fn strip_removes_injected_section() {
        let batch = single_batch("Body [2]");
        let reg = registry(&[(2, "Remote definition.")]);
        let enriched = inject(&batch, &reg);
        let stripped = strip_appendix(&enriched.text);
        assert_eq!(stripped.trim_end(), "Body [2]");
    }

    #[test]
    fn strip_handles_unterminated_appendix() {
        let text = "Rewritten body.\n\n<<<INJECTED_FOOTNOTES>>>\n[2] Remote";
        assert_eq!(strip_appendix(text), "Rewritten body.");
    }

    #[test]
    fn strip_without_appendix_is_identity() {
        assert_eq!(strip_appendix("plain text\n"), "plain text\n");
    }

    #[test]
    fn injected_definitions_come_from_global_extraction() {
        let raw = "Claim [1].\nPage 1/2\nOther [1].\n[1] Definition at the bottom of page two.\nPage 2/2\n";
        let reg = extract_global_registry(raw);
        let batches = BatchPlanner::new(20).plan(raw);
        assert_eq!(batches.len(), 2);

        let first = inject(&batches[0], &reg);
        let second = inject(&batches[1], &reg);
        assert_eq!(first.injected, vec![Marker(1)]);
        assert!(second.injected.is_empty());
    }
}
