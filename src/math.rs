//! Gate in front of the math-rendering collaborator, plus formula helpers.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

fn delimiter_regex() -> &'static Regex {
    static DELIMITER_REGEX: OnceLock<Regex> = OnceLock::new();
    DELIMITER_REGEX.get_or_init(|| Regex::new(r"\$|\\\(|\\\[").unwrap())
}

fn span_regex() -> &'static Regex {
    static SPAN_REGEX: OnceLock<Regex> = OnceLock::new();
    SPAN_REGEX.get_or_init(|| {
        Regex::new(r"\$\$([^$]+)\$\$|\\\[([^\]]+)\\\]|\$([^$\n]+)\$|\\\(([^)]+)\\\)").unwrap()
    })
}

/// Cheap pre-check: does the text contain any math delimiter at all?
pub fn has_math_delimiters(text: &str) -> bool {
    delimiter_regex().is_match(text)
}

/// Whether the text contains at least one complete math span.
pub fn has_math_spans(text: &str) -> bool {
    span_regex().is_match(text)
}

/// 32-bit rolling hash used to detect unchanged content between renders.
pub fn content_hash(text: &str) -> i32 {
    text.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(unit as i32))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MathFormula {
    /// The full delimited source, e.g. `$x^2$`.
    pub formula: String,
    pub content: String,
    pub display: bool,
}

/// Delimited formulas in document order. `$$..$$` and `\[..\]` are display
/// math; `$..$` and `\(..\)` are inline.
pub fn extract_math_formulas(text: &str) -> Vec<MathFormula> {
    span_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let formula = caps.get(0)?.as_str().to_string();
            let (content, display) = match (caps.get(1), caps.get(2), caps.get(3), caps.get(4)) {
                (Some(c), _, _, _) | (_, Some(c), _, _) => (c.as_str(), true),
                (_, _, Some(c), _) | (_, _, _, Some(c)) => (c.as_str(), false),
                _ => return None,
            };
            Some(MathFormula {
                formula,
                content: content.trim().to_string(),
                display,
            })
        })
        .collect()
}

/// Lets the math collaborator run only when delimiters are present and the
/// content changed since the last run.
#[derive(Debug, Default)]
pub struct MathGate {
    last_hash: Option<i32>,
}

impl MathGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_render(&mut self, content: &str) -> bool {
        if !has_math_delimiters(content) {
            return false;
        }
        let hash = content_hash(content);
        if self.last_hash == Some(hash) {
            tracing::debug!("Math content unchanged, skipping render");
            return false;
        }
        self.last_hash = Some(hash);
        true
    }

    pub fn reset(&mut self) {
        self.last_hash = None;
    }
}
