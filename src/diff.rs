//! Line-level diff used to review AI changes before they touch the document.

use crate::constants::{DIFF_CONDENSE_THRESHOLD, DIFF_CONTEXT_LINES, DIFF_MAX_LINES};
use horrorshow::{html, Raw};
use html_escape::encode_text;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum DiffEntry {
    Unchanged(String),
    Added(String),
    Removed(String),
    /// Summary line standing in for elided content.
    Skip(String),
}

impl DiffEntry {
    pub fn value(&self) -> &str {
        match self {
            DiffEntry::Unchanged(v)
            | DiffEntry::Added(v)
            | DiffEntry::Removed(v)
            | DiffEntry::Skip(v) => v,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, DiffEntry::Unchanged(_))
    }

    fn css_class(&self) -> &'static str {
        match self {
            DiffEntry::Unchanged(_) => "diff-unchanged",
            DiffEntry::Added(_) => "diff-added",
            DiffEntry::Removed(_) => "diff-removed",
            DiffEntry::Skip(_) => "diff-skip",
        }
    }

    /// The line as shown in a plain-text review, with its `+`/`-` marker.
    pub fn display_line(&self) -> String {
        match self {
            DiffEntry::Unchanged(v) => format!("  {}", v),
            DiffEntry::Added(v) => format!("+ {}", v),
            DiffEntry::Removed(v) => format!("- {}", v),
            DiffEntry::Skip(v) => v.clone(),
        }
    }
}

/// Splits on `\n`, dropping the `\r` of CRLF endings.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect()
}

fn too_large_notice() -> DiffEntry {
    DiffEntry::Skip("Document is large; detailed diff omitted.".to_string())
}

/// Diffs two texts line by line.
///
/// Uses the full LCS table, so inputs above [`DIFF_MAX_LINES`] lines on either
/// side return a single skip entry instead.
pub fn diff_lines(old_text: &str, new_text: &str) -> Vec<DiffEntry> {
    let old_lines = split_lines(old_text);
    let new_lines = split_lines(new_text);
    if old_lines.len() > DIFF_MAX_LINES || new_lines.len() > DIFF_MAX_LINES {
        tracing::debug!(
            "Skipping line diff ({} vs {} lines)",
            old_lines.len(),
            new_lines.len()
        );
        return vec![too_large_notice()];
    }
    compute_line_diff(&old_lines, &new_lines)
}

fn compute_line_diff(old_lines: &[&str], new_lines: &[&str]) -> Vec<DiffEntry> {
    let m = old_lines.len();
    let n = new_lines.len();
    let width = n + 1;
    // lcs[i * width + j] = LCS length of old[i..] and new[j..]
    let mut lcs = vec![0usize; (m + 1) * width];

    for i in (0..m).rev() {
        for j in (0..n).rev() {
            lcs[i * width + j] = if old_lines[i] == new_lines[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let mut result = Vec::with_capacity(m.max(n));
    let (mut i, mut j) = (0, 0);
    while i < m && j < n {
        if old_lines[i] == new_lines[j] {
            result.push(DiffEntry::Unchanged(old_lines[i].to_string()));
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            // Ties go to removal so deletions precede insertions.
            result.push(DiffEntry::Removed(old_lines[i].to_string()));
            i += 1;
        } else {
            result.push(DiffEntry::Added(new_lines[j].to_string()));
            j += 1;
        }
    }
    result.extend(old_lines[i..].iter().map(|l| DiffEntry::Removed(l.to_string())));
    result.extend(new_lines[j..].iter().map(|l| DiffEntry::Added(l.to_string())));
    result
}

/// Collapses long unchanged runs to their first and last two lines around a
/// skip summary. Idempotent: a condensed run never exceeds the threshold.
pub fn condense(entries: Vec<DiffEntry>) -> Vec<DiffEntry> {
    let mut condensed = Vec::with_capacity(entries.len());
    let mut run: Vec<DiffEntry> = Vec::new();

    fn flush(run: &mut Vec<DiffEntry>, out: &mut Vec<DiffEntry>) {
        if run.len() > DIFF_CONDENSE_THRESHOLD {
            let hidden = run.len() - 2 * DIFF_CONTEXT_LINES;
            let tail = run.split_off(run.len() - DIFF_CONTEXT_LINES);
            run.truncate(DIFF_CONTEXT_LINES);
            out.append(run);
            out.push(DiffEntry::Skip(format!("... {} unchanged lines ...", hidden)));
            out.extend(tail);
        } else {
            out.append(run);
        }
    }

    for entry in entries {
        if entry.is_unchanged() {
            run.push(entry);
        } else {
            flush(&mut run, &mut condensed);
            condensed.push(entry);
        }
    }
    flush(&mut run, &mut condensed);
    condensed
}

/// Renders entries as a block of `<span class="diff-line ...">` lines.
pub fn render_html(entries: &[DiffEntry]) -> String {
    let mut body = String::new();
    for entry in entries {
        body.push_str(&format!(
            "<span class=\"diff-line {}\">{}</span>\n",
            entry.css_class(),
            encode_text(&entry.display_line())
        ));
    }

    format!(
        "{}",
        html! {
            div(class="diff-view") {
                : Raw(&body);
            }
        }
    )
}
