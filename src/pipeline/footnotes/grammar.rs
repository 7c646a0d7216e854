//! Marker grammar: what markers, definitions, page boundaries and inline
//! annotations look like in raw and rewritten text.
//!
//! Every other component recognises structure only through this module.

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use super::types::Marker;

/// Placeholder body the rewriter uses for a citation it cannot resolve.
pub const MISSING_PLACEHOLDER: &str = "MISSING";

/// Literal that opens every inline annotation block.
pub const ANNOTATION_OPENER: &str = "{FOOTNOTE";

static DECLARATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*\[(\d{1,9})\][ \t]*(.*)$").expect("valid regex"));

static PAGE_BOUNDARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[ \t]*[-–—]*[ \t]*page[ \t]+(\d{1,6})[ \t]*(?:/|of)[ \t]*(\d{1,6})[ \t]*[-–—]*[ \t]*$")
        .expect("valid regex")
});

static CONFIDENTIALITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]*CONFIDENTIAL\b").expect("valid regex"));

static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d{1,9})\]").expect("valid regex"));

/// Block header up to the colon. The body runs to the brace that balances the opener.
static ANNOTATION_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{FOOTNOTE\s*\[(\d{1,9})\]\s*:").expect("valid regex"));

static MISSING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^missing\b").expect("valid regex"));

/// Classification of a single line of raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineToken<'a> {
    /// `[N] text...`: starts a footnote definition.
    MarkerDeclaration { marker: Marker, rest: &'a str },
    /// `Page K of M` / `Page K/M` footer emitted by upstream extraction.
    PageBoundary { page: u32, total: u32 },
    /// Running confidentiality header repeated at the top of pages.
    ConfidentialityHeader,
    Body,
}

impl LineToken<'_> {
    /// True for tokens that terminate a definition body.
    pub fn ends_definition(&self) -> bool {
        !matches!(self, LineToken::Body)
    }
}

fn parse_marker(digits: &str) -> Option<Marker> {
    digits.parse::<u32>().ok().filter(|n| *n > 0).map(Marker)
}

/// Classify one line. Line terminators are ignored.
pub fn classify_line(line: &str) -> LineToken<'_> {
    let line = line.trim_end_matches(['\n', '\r']);

    if let Some(caps) = DECLARATION_RE.captures(line) {
        if let Some(marker) = parse_marker(&caps[1]) {
            let rest = caps.get(2).map(|m| m.as_str().trim_end()).unwrap_or("");
            return LineToken::MarkerDeclaration { marker, rest };
        }
    }

    if let Some(caps) = PAGE_BOUNDARY_RE.captures(line) {
        let page = caps[1].parse().unwrap_or(0);
        let total = caps[2].parse().unwrap_or(0);
        return LineToken::PageBoundary { page, total };
    }

    if CONFIDENTIALITY_RE.is_match(line) {
        return LineToken::ConfidentialityHeader;
    }

    LineToken::Body
}

/// Lines of `text` with their byte offsets. Each line keeps its terminator.
pub fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.split_inclusive('\n').scan(0usize, |offset, line| {
        let start = *offset;
        *offset += line.len();
        Some((start, line))
    })
}

/// A `[N]` reference in body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub marker: Marker,
    pub span: Range<usize>,
}

/// Every citation on body lines. Declaration lines and annotation blocks are skipped.
pub fn citations(text: &str) -> Vec<Citation> {
    let annotation_spans: Vec<Range<usize>> = annotations(text).into_iter().map(|a| a.span).collect();
    let inside_annotation =
        |pos: usize| annotation_spans.iter().any(|s| s.start <= pos && pos < s.end);

    let mut found = Vec::new();
    for (offset, line) in lines_with_offsets(text) {
        if matches!(classify_line(line), LineToken::MarkerDeclaration { .. }) {
            continue;
        }
        for caps in CITATION_RE.captures_iter(line) {
            let Some(whole) = caps.get(0) else { continue };
            let Some(marker) = parse_marker(&caps[1]) else { continue };
            let start = offset + whole.start();
            if inside_annotation(start) {
                continue;
            }
            found.push(Citation {
                marker,
                span: start..offset + whole.end(),
            });
        }
    }
    found
}

pub fn cited_markers(text: &str) -> BTreeSet<Marker> {
    citations(text).into_iter().map(|c| c.marker).collect()
}

/// Markers declared by definition lines.
pub fn declared_markers(text: &str) -> BTreeSet<Marker> {
    lines_with_offsets(text)
        .filter_map(|(_, line)| match classify_line(line) {
            LineToken::MarkerDeclaration { marker, .. } => Some(marker),
            _ => None,
        })
        .collect()
}

/// An inline `{FOOTNOTE [N]: body}` block in rewritten text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub marker: Marker,
    /// Trimmed body text.
    pub body: String,
    /// Byte span of the whole block, braces included.
    pub span: Range<usize>,
    /// True when the body is the missing placeholder.
    pub missing: bool,
}

pub fn is_missing_placeholder(body: &str) -> bool {
    MISSING_RE.is_match(body.trim())
}

/// Every annotation block in order of appearance.
///
/// Braces inside a body nest, so `{FOOTNOTE [3]: Rates in {fixed} tranches}`
/// is one block. An opener whose braces never balance is not a block.
pub fn annotations(text: &str) -> Vec<Annotation> {
    let mut found = Vec::new();
    let mut search_from = 0;

    while let Some(caps) = ANNOTATION_HEADER_RE.captures_at(text, search_from) {
        let Some(header) = caps.get(0) else { break };
        let Some(close) = closing_brace(text, header.end()) else {
            search_from = header.end();
            continue;
        };
        search_from = close + 1;

        let Some(marker) = parse_marker(&caps[1]) else { continue };
        let body = text[header.end()..close].trim();
        found.push(Annotation {
            marker,
            missing: is_missing_placeholder(body),
            body: body.to_string(),
            span: header.start()..close + 1,
        });
    }
    found
}

/// Byte index of the `}` closing a block whose opener precedes `from`.
fn closing_brace(text: &str, from: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (i, ch) in text[from..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(from + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn braces_balance(text: &str) -> bool {
    let mut depth = 0i64;
    for ch in text.chars() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Number of `{FOOTNOTE` openers, parsable or not.
pub fn count_annotation_openers(text: &str) -> usize {
    text.matches(ANNOTATION_OPENER).count()
}

/// Canonical annotation block for `marker`.
///
/// Balanced braces in the definition are kept. Unbalanced ones become
/// parentheses so the block always parses back to the whole definition.
pub fn render_annotation(marker: Marker, definition: &str) -> String {
    if braces_balance(definition) {
        format!("{ANNOTATION_OPENER} [{}]: {}}}", marker.value(), definition)
    } else {
        let safe: String = definition
            .chars()
            .map(|ch| match ch {
                '{' => '(',
                '}' => ')',
                other => other,
            })
            .collect();
        format!("{ANNOTATION_OPENER} [{}]: {}}}", marker.value(), safe)
    }
}

pub fn render_missing_annotation(marker: Marker) -> String {
    render_annotation(marker, MISSING_PLACEHOLDER)
}
