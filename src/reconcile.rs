//! Review and application of AI results.
//!
//! A [`FixResultPacket`] is consumed by value, so it can be accepted or
//! rejected exactly once.

use crate::diff::{condense, diff_lines, render_html, DiffEntry};
use crate::document::{Document, DocumentStats};
use crate::notice::Notice;
use crate::orchestrator::Orchestrator;
use crate::prompt::FixOptions;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("The selected content changed; the AI result was discarded")]
    StaleSelection,
    #[error("The selection no longer fits the document")]
    InvalidRange,
}

impl ReconcileError {
    pub fn notice(&self) -> Notice {
        match self {
            ReconcileError::StaleSelection => Notice::warning(
                "Selection changed",
                "The selected content changed; select it again and retry",
            ),
            ReconcileError::InvalidRange => Notice::warning(
                "Selection changed",
                "The selection no longer fits the document; the result was discarded",
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixResultPacket {
    pub original_text: String,
    pub improved_text: String,
    pub provider_name: String,
    pub options_used: FixOptions,
}

/// What the review dialog shows for a packet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewView {
    pub chips: Vec<String>,
    pub entries: Vec<DiffEntry>,
    pub added: usize,
    pub removed: usize,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub stats: DocumentStats,
    /// Usage count after the debit; `None` when the counter could not be saved.
    pub usage_count: Option<i64>,
    pub notice: Notice,
}

impl FixResultPacket {
    pub fn is_partial(&self) -> bool {
        self.options_used.range.is_some()
    }

    pub fn chips(&self) -> Vec<String> {
        let options = &self.options_used;
        let focus = options.focus_labels();
        let mut chips = vec![
            format!("Mode: {}", options.kind.label()),
            format!(
                "Focus: {}",
                if focus.is_empty() {
                    "Default strategy".to_string()
                } else {
                    focus.join(" + ")
                }
            ),
            format!("Provider: {}", self.provider_name),
        ];
        if options.preserve_code_blocks {
            chips.push("Keep code blocks".to_string());
        }
        if options.preserve_quotes {
            chips.push("Keep quotes".to_string());
        }
        if self.is_partial() {
            chips.push("Range: partial selection".to_string());
        }
        chips
    }

    pub fn review(&self) -> ReviewView {
        let raw = diff_lines(&self.original_text, &self.improved_text);
        let added = raw.iter().filter(|e| matches!(e, DiffEntry::Added(_))).count();
        let removed = raw
            .iter()
            .filter(|e| matches!(e, DiffEntry::Removed(_)))
            .count();
        let entries = condense(raw);
        let html = render_html(&entries);
        ReviewView {
            chips: self.chips(),
            entries,
            added,
            removed,
            html,
        }
    }

    /// Conventional unified diff of the change.
    pub fn unified_patch(&self) -> String {
        diffy::create_patch(&self.original_text, &self.improved_text).to_string()
    }

    /// Applies the improved text. A range-scoped packet is re-validated
    /// against the live document first; on mismatch nothing is changed and
    /// usage is not debited.
    pub fn accept(
        self,
        document: &mut Document,
        orchestrator: &Orchestrator,
    ) -> Result<Applied, ReconcileError> {
        match &self.options_used.range {
            Some(range) => {
                if !range.is_current(document.text()) {
                    tracing::warn!(
                        "Discarding AI result: range {}..{} changed since selection",
                        range.start,
                        range.end
                    );
                    return Err(ReconcileError::StaleSelection);
                }
                if !document.replace_range(range.start, range.end, &self.improved_text) {
                    return Err(ReconcileError::InvalidRange);
                }
            }
            None => document.set_text(self.improved_text.as_str()),
        }
        document.clear_selection();

        let usage_count = match orchestrator.debit_usage() {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!("Failed to record AI usage: {}", e);
                None
            }
        };
        tracing::info!(
            "Applied {} from {}",
            self.options_used.kind.label(),
            self.provider_name
        );

        Ok(Applied {
            stats: document.stats(),
            usage_count,
            notice: Notice::success(
                "Applied",
                format!("{} was written to the document", self.options_used.kind.label()),
            ),
        })
    }

    pub fn reject(self) -> Notice {
        tracing::info!("Rejected AI result from {}", self.provider_name);
        Notice::info(
            "Original kept",
            "The AI result was discarded; the document is unchanged",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SelectionRange;
    use crate::orchestrator::tests::{day, orchestrator, Reply, ScriptedTransport};
    use crate::prompt::FixKind;
    use crate::usage::Tier;

    fn packet(original: &str, improved: &str, range: Option<SelectionRange>) -> FixResultPacket {
        let mut options = FixOptions::for_kind(FixKind::QuickFix);
        options.range = range;
        FixResultPacket {
            original_text: original.to_string(),
            improved_text: improved.to_string(),
            provider_name: "Kimi".to_string(),
            options_used: options,
        }
    }

    #[test]
    fn test_accept_whole_document() {
        let (orch, _, _) = orchestrator(ScriptedTransport::new(vec![Reply::Ok("x")]), Tier::Basic);
        let mut doc = Document::new("#Title\ntext");
        let applied = packet("#Title\ntext", "# Title\n\ntext", None)
            .accept(&mut doc, &orch)
            .unwrap();
        assert_eq!(doc.text(), "# Title\n\ntext");
        assert_eq!(applied.usage_count, Some(1));
        assert_eq!(applied.stats.lines, 3);
        assert_eq!(orch.usage().count(Tier::Basic, day()), 1);
    }

    #[test]
    fn test_accept_range() {
        let (orch, _, _) = orchestrator(ScriptedTransport::new(vec![Reply::Ok("x")]), Tier::Basic);
        let mut doc = Document::new("# A\n\nbad  para\n\ntail");
        let range = SelectionRange::capture(doc.text(), 5, 14).unwrap();
        packet("bad  para", "Good paragraph.", Some(range))
            .accept(&mut doc, &orch)
            .unwrap();
        assert_eq!(doc.text(), "# A\n\nGood paragraph.\n\ntail");
    }

    #[test]
    fn test_stale_range_leaves_document_untouched() {
        let (orch, _, _) = orchestrator(ScriptedTransport::new(vec![Reply::Ok("x")]), Tier::Basic);
        let mut doc = Document::new("# A\n\nbad  para\n\ntail");
        let range = SelectionRange::capture(doc.text(), 5, 14).unwrap();
        doc.set_text("# A\n\nbad  pare\n\ntail");
        let before = doc.text().to_string();

        let err = packet("bad  para", "Good", Some(range))
            .accept(&mut doc, &orch)
            .unwrap_err();
        assert_eq!(err, ReconcileError::StaleSelection);
        assert_eq!(doc.text(), before);
        assert_eq!(orch.usage().count(Tier::Basic, day()), 0);
    }

    #[test]
    fn test_reject_has_no_effect() {
        let (orch, _, _) = orchestrator(ScriptedTransport::new(vec![Reply::Ok("x")]), Tier::Basic);
        let notice = packet("a", "b", None).reject();
        assert_eq!(notice.level, crate::notice::NoticeLevel::Info);
        assert_eq!(orch.usage().count(Tier::Basic, day()), 0);
    }

    #[test]
    fn test_review_view() {
        let original = (1..=10).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let improved = original.replace("line 10", "line ten");
        let mut p = packet(&original, &improved, None);
        p.options_used.preserve_quotes = true;
        p.options_used.range = SelectionRange::capture(&original, 0, 4);

        let view = p.review();
        assert_eq!(view.added, 1);
        assert_eq!(view.removed, 1);
        assert!(view.entries.iter().any(|e| matches!(e, DiffEntry::Skip(_))));
        assert!(view.html.contains("diff-added"));
        assert_eq!(view.chips[0], "Mode: Quick fix");
        assert_eq!(view.chips[1], "Focus: Format repair");
        assert!(view.chips.contains(&"Keep quotes".to_string()));
        assert!(view.chips.contains(&"Range: partial selection".to_string()));
    }

    #[test]
    fn test_unified_patch() {
        let patch = packet("a\nb\n", "a\nc\n", None).unified_patch();
        assert!(patch.contains("-b"));
        assert!(patch.contains("+c"));
    }
}
