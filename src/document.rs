//! The live document buffer, its preview mapping and block selection.

use crate::constants::WORDS_PER_MINUTE;
use crate::mapper::BlockMapping;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A byte range of the document together with the text it held when captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRange {
    pub start: usize,
    pub end: usize,
    pub snapshot: String,
}

impl SelectionRange {
    /// Captures `text[start..end]`; `None` when the bounds are out of range or
    /// not on character boundaries.
    pub fn capture(text: &str, start: usize, end: usize) -> Option<Self> {
        if start > end {
            return None;
        }
        text.get(start..end).map(|slice| Self {
            start,
            end,
            snapshot: slice.to_string(),
        })
    }

    /// Staleness check against the live text.
    pub fn is_current(&self, text: &str) -> bool {
        text.get(self.start..self.end) == Some(self.snapshot.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DocumentStats {
    pub chars: usize,
    pub words: usize,
    pub lines: usize,
    pub read_minutes: usize,
}

impl DocumentStats {
    pub fn of(text: &str) -> Self {
        let words = text.split_whitespace().count();
        Self {
            chars: text.chars().count(),
            words,
            lines: if text.is_empty() { 0 } else { text.split('\n').count() },
            read_minutes: words.div_ceil(WORDS_PER_MINUTE),
        }
    }
}

#[derive(Debug, Default)]
pub struct Document {
    text: String,
    revision: u64,
    mapping: Option<BlockMapping>,
    selected_blocks: BTreeSet<String>,
    selection: Option<SelectionRange>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn stats(&self) -> DocumentStats {
        DocumentStats::of(&self.text)
    }

    /// Replaces the whole buffer, as a user edit does.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.touch();
    }

    /// Splices `replacement` over `start..end`. Returns `false` and leaves the
    /// buffer alone when the range is invalid.
    pub fn replace_range(&mut self, start: usize, end: usize, replacement: &str) -> bool {
        if start > end || self.text.get(start..end).is_none() {
            return false;
        }
        self.text.replace_range(start..end, replacement);
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.invalidate();
    }

    /// Drops the preview mapping and any selection built on it.
    pub fn invalidate(&mut self) {
        self.mapping = None;
        self.clear_selection();
    }

    pub fn mapping(&self) -> Option<&BlockMapping> {
        self.mapping.as_ref()
    }

    /// Installs a mapping computed for `revision`. Mappings for an older
    /// revision are refused.
    pub fn apply_mapping(&mut self, revision: u64, mapping: BlockMapping) -> bool {
        if revision != self.revision {
            tracing::debug!(
                "Discarding mapping for revision {} (current {})",
                revision,
                self.revision
            );
            return false;
        }
        self.clear_selection();
        self.mapping = Some(mapping);
        true
    }

    pub fn supports_partial_selection(&self) -> bool {
        self.mapping.as_ref().is_some_and(BlockMapping::is_supported)
    }

    /// Handles a click on a preview block. A plain click selects only that
    /// block; `multi` toggles it within the current set.
    pub fn click_block(&mut self, block_id: &str, multi: bool) {
        let Some(map) = self.mapping.as_ref().and_then(BlockMapping::map) else {
            self.clear_selection();
            return;
        };
        if map.get(block_id).is_none() {
            return;
        }

        if !multi {
            self.selected_blocks.clear();
            self.selected_blocks.insert(block_id.to_string());
        } else if !self.selected_blocks.remove(block_id) {
            self.selected_blocks.insert(block_id.to_string());
        }

        self.selection =
            map.resolve_selection(self.selected_blocks.iter().map(String::as_str), &self.text);
    }

    /// Selects an explicit range, replacing any block selection.
    pub fn select_range(&mut self, range: SelectionRange) {
        self.selected_blocks.clear();
        self.selection = Some(range);
    }

    pub fn selected_blocks(&self) -> impl Iterator<Item = &str> {
        self.selected_blocks.iter().map(String::as_str)
    }

    pub fn selection(&self) -> Option<&SelectionRange> {
        self.selection.as_ref()
    }

    pub fn clear_selection(&mut self) {
        self.selected_blocks.clear();
        self.selection = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::{map_blocks_to_source, RenderedNode};

    fn mapped(text: &str, tags: &[&str]) -> Document {
        let mut doc = Document::new(text);
        let nodes: Vec<RenderedNode> = tags.iter().map(|t| RenderedNode::new(*t)).collect();
        let mapping = map_blocks_to_source(doc.text(), &nodes);
        assert!(doc.apply_mapping(doc.revision(), mapping));
        doc
    }

    #[test]
    fn test_selection_range_capture_and_staleness() {
        let range = SelectionRange::capture("hello world", 6, 11).unwrap();
        assert_eq!(range.snapshot, "world");
        assert!(range.is_current("hello world"));
        assert!(!range.is_current("hello there"));
        assert!(!range.is_current("hi"));
        assert!(SelectionRange::capture("abc", 2, 9).is_none());
        assert!(SelectionRange::capture("abc", 2, 1).is_none());
        assert!(SelectionRange::capture("héllo", 2, 3).is_none());
    }

    #[test]
    fn test_stats() {
        let stats = DocumentStats::of("one two\nthree");
        assert_eq!(stats.words, 3);
        assert_eq!(stats.lines, 2);
        assert_eq!(stats.chars, 13);
        assert_eq!(stats.read_minutes, 1);
        assert_eq!(DocumentStats::of(""), DocumentStats::default());
    }

    #[test]
    fn test_mutation_clears_mapping_and_selection() {
        let mut doc = mapped("# A\n\nPara", &["h1", "p"]);
        doc.click_block("pb-1", false);
        assert_eq!(doc.selection().unwrap().snapshot, "Para");

        doc.set_text("# A\n\nPara!");
        assert!(doc.mapping().is_none());
        assert!(doc.selection().is_none());
        assert_eq!(doc.selected_blocks().count(), 0);
    }

    #[test]
    fn test_stale_mapping_is_refused() {
        let mut doc = Document::new("Para");
        let old = doc.revision();
        doc.set_text("Other");
        let mapping = map_blocks_to_source("Para", &[RenderedNode::new("p")]);
        assert!(!doc.apply_mapping(old, mapping));
        assert!(!doc.supports_partial_selection());
    }

    #[test]
    fn test_single_and_multi_click() {
        let mut doc = mapped("# A\n\nB\n\nC", &["h1", "p", "p"]);
        doc.click_block("pb-0", false);
        doc.click_block("pb-2", false);
        assert_eq!(doc.selected_blocks().collect::<Vec<_>>(), vec!["pb-2"]);

        doc.click_block("pb-0", true);
        let range = doc.selection().unwrap();
        assert_eq!(range.snapshot, "# A\n\nB\n\nC");

        doc.click_block("pb-2", true);
        assert_eq!(doc.selection().unwrap().snapshot, "# A");

        doc.click_block("pb-0", true);
        assert!(doc.selection().is_none());
    }

    #[test]
    fn test_click_without_supported_mapping_selects_nothing() {
        let mut doc = mapped("# A\n\nPara", &["h1"]);
        assert!(!doc.supports_partial_selection());
        doc.click_block("pb-0", false);
        assert!(doc.selection().is_none());
    }

    #[test]
    fn test_replace_range() {
        let mut doc = Document::new("hello world");
        assert!(doc.replace_range(6, 11, "there"));
        assert_eq!(doc.text(), "hello there");
        assert_eq!(doc.revision(), 1);
        assert!(!doc.replace_range(4, 99, "x"));
        assert_eq!(doc.text(), "hello there");
    }
}
