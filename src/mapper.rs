//! Maps rendered top-level preview blocks back to byte ranges of the source.
//!
//! The source is re-tokenized into the same coarse block units the renderer
//! produced and both sequences are walked in lock-step. Anything that does
//! not line up marks the whole render pass as unsupported.

use crate::constants::BLOCK_ID_PREFIX;
use crate::document::SelectionRange;
use crate::render::markdown_options;
use pulldown_cmark::{Event, Parser, Tag};
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Heading(u8),
    Paragraph,
    List { ordered: bool },
    BlockQuote,
    CodeBlock,
    Table,
    Rule,
    Html,
    Other,
}

impl BlockKind {
    /// Whether a rendered element with `tag` can originate from this block.
    pub fn accepts(self, tag: &str) -> bool {
        match self {
            BlockKind::Heading(level) => {
                tag.len() == 2
                    && tag.starts_with('h')
                    && tag[1..].parse::<u8>().map_or(false, |l| l == level)
            }
            BlockKind::Paragraph => tag == "p",
            BlockKind::List { ordered: true } => tag == "ol",
            BlockKind::List { ordered: false } => tag == "ul",
            BlockKind::BlockQuote => tag == "blockquote",
            BlockKind::CodeBlock => tag == "pre",
            BlockKind::Table => tag == "table",
            BlockKind::Rule => tag == "hr",
            BlockKind::Html | BlockKind::Other => true,
        }
    }
}

/// A top-level block of the source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockToken<'a> {
    pub kind: BlockKind,
    pub raw: &'a str,
}

/// Opaque handle for a top-level rendered element; only its tag is inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedNode {
    pub tag: String,
}

impl RenderedNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewBlockMeta {
    pub block_id: String,
    pub start: usize,
    pub end: usize,
}

impl PreviewBlockMeta {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Result of one mapping pass. `Unsupported` disables partial fixes until the
/// next successful render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockMapping {
    Supported(PreviewMap),
    Unsupported,
}

impl BlockMapping {
    pub fn map(&self) -> Option<&PreviewMap> {
        match self {
            BlockMapping::Supported(map) => Some(map),
            BlockMapping::Unsupported => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, BlockMapping::Supported(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewMap {
    pub blocks: Vec<PreviewBlockMeta>,
}

impl PreviewMap {
    pub fn get(&self, block_id: &str) -> Option<&PreviewBlockMeta> {
        self.blocks.iter().find(|b| b.block_id == block_id)
    }

    /// Span covering every listed block, with the snapshot taken from
    /// `source`. Unknown ids are ignored; `None` when nothing matches.
    pub fn resolve_selection<'a, I>(&self, block_ids: I, source: &str) -> Option<SelectionRange>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut selected: Vec<&PreviewBlockMeta> =
            block_ids.into_iter().filter_map(|id| self.get(id)).collect();
        if selected.is_empty() {
            return None;
        }
        selected.sort_by_key(|b| b.start);

        let start = selected[0].start;
        let end = selected.iter().map(|b| b.end).max().unwrap_or(start);
        SelectionRange::capture(source, start, end)
    }
}

pub fn block_id(index: usize) -> String {
    format!("{}{}", BLOCK_ID_PREFIX, index)
}

/// Top-level block tokens of `source`, trailing whitespace trimmed from each.
pub fn tokenize_blocks(source: &str) -> Vec<BlockToken<'_>> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;

    for (event, range) in Parser::new_ext(source, markdown_options()).into_offset_iter() {
        match event {
            Event::Start(tag) => {
                if depth == 0 {
                    let kind = match tag {
                        Tag::Heading { level, .. } => BlockKind::Heading(level as u8),
                        Tag::Paragraph => BlockKind::Paragraph,
                        Tag::List(first) => BlockKind::List {
                            ordered: first.is_some(),
                        },
                        Tag::BlockQuote(..) => BlockKind::BlockQuote,
                        Tag::CodeBlock(_) => BlockKind::CodeBlock,
                        Tag::Table(_) => BlockKind::Table,
                        Tag::HtmlBlock => BlockKind::Html,
                        _ => BlockKind::Other,
                    };
                    push_token(&mut tokens, source, range, kind);
                }
                depth += 1;
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Rule if depth == 0 => push_token(&mut tokens, source, range, BlockKind::Rule),
            _ => {}
        }
    }
    tokens
}

fn push_token<'a>(
    tokens: &mut Vec<BlockToken<'a>>,
    source: &'a str,
    range: Range<usize>,
    kind: BlockKind,
) {
    let raw = source.get(range).unwrap_or("").trim_end();
    if !raw.is_empty() {
        tokens.push(BlockToken { kind, raw });
    }
}

/// Aligns tokens to rendered nodes; any disagreement yields `Unsupported`.
pub fn map_tokens(source: &str, tokens: &[BlockToken<'_>], nodes: &[RenderedNode]) -> BlockMapping {
    if tokens.len() != nodes.len() {
        tracing::debug!(
            "Block mapping unsupported: {} tokens vs {} rendered nodes",
            tokens.len(),
            nodes.len()
        );
        return BlockMapping::Unsupported;
    }

    let mut cursor = 0;
    let mut blocks = Vec::with_capacity(tokens.len());
    for (index, (token, node)) in tokens.iter().zip(nodes).enumerate() {
        if !token.kind.accepts(&node.tag) {
            tracing::debug!(
                "Block mapping unsupported: <{}> does not match {:?}",
                node.tag,
                token.kind
            );
            return BlockMapping::Unsupported;
        }
        let Some(found) = source.get(cursor..).and_then(|rest| rest.find(token.raw)) else {
            return BlockMapping::Unsupported;
        };
        let start = cursor + found;
        let end = start + token.raw.len();
        blocks.push(PreviewBlockMeta {
            block_id: block_id(index),
            start,
            end,
        });
        cursor = end;
    }

    BlockMapping::Supported(PreviewMap { blocks })
}

pub fn map_blocks_to_source(source: &str, nodes: &[RenderedNode]) -> BlockMapping {
    map_tokens(source, &tokenize_blocks(source), nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(tags: &[&str]) -> Vec<RenderedNode> {
        tags.iter().map(|t| RenderedNode::new(*t)).collect()
    }

    #[test]
    fn test_heading_and_paragraph_offsets() {
        let source = "# A\n\nPara";
        let mapping = map_blocks_to_source(source, &nodes(&["h1", "p"]));
        let map = mapping.map().unwrap();
        assert_eq!(map.blocks.len(), 2);
        assert_eq!(&source[map.blocks[0].range()], "# A");
        assert_eq!(&source[map.blocks[1].range()], "Para");
        assert_eq!(map.blocks[0].block_id, "pb-0");
        assert_eq!(map.blocks[1].block_id, "pb-1");
    }

    #[test]
    fn test_repeated_lines_are_matched_positionally() {
        let source = "same\n\nsame\n\nsame\n";
        let map = map_blocks_to_source(source, &nodes(&["p", "p", "p"]));
        let starts: Vec<usize> = map.map().unwrap().blocks.iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![0, 6, 12]);
    }

    #[test]
    fn test_count_mismatch_is_unsupported() {
        let mapping = map_blocks_to_source("# A\n\nPara", &nodes(&["h1"]));
        assert_eq!(mapping, BlockMapping::Unsupported);
    }

    #[test]
    fn test_kind_mismatch_is_unsupported() {
        let mapping = map_blocks_to_source("# A\n\nPara", &nodes(&["h2", "p"]));
        assert!(!mapping.is_supported());
    }

    #[test]
    fn test_block_kinds() {
        let source = "## Title\n\n- a\n- b\n\n1. one\n\n> quote\n\n```rust\nfn x() {}\n```\n\n---\n\n| a | b |\n|---|---|\n| 1 | 2 |\n";
        let kinds: Vec<BlockKind> = tokenize_blocks(source).iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                BlockKind::Heading(2),
                BlockKind::List { ordered: false },
                BlockKind::List { ordered: true },
                BlockKind::BlockQuote,
                BlockKind::CodeBlock,
                BlockKind::Rule,
                BlockKind::Table,
            ]
        );
        let mapping = map_blocks_to_source(
            source,
            &nodes(&["h2", "ul", "ol", "blockquote", "pre", "hr", "table"]),
        );
        let map = mapping.map().unwrap();
        assert_eq!(&source[map.blocks[4].range()], "```rust\nfn x() {}\n```");
    }

    #[test]
    fn test_html_block_maps_to_any_element() {
        let source = "para\n\n<!-- note -->\n\nafter\n";
        let kinds: Vec<BlockKind> = tokenize_blocks(source).iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![BlockKind::Paragraph, BlockKind::Html, BlockKind::Paragraph]
        );
        let mapping = map_blocks_to_source(source, &nodes(&["p", "p", "p"]));
        let map = mapping.map().unwrap();
        assert_eq!(&source[map.blocks[1].range()], "<!-- note -->");
    }

    #[test]
    fn test_resolve_selection_spans_blocks() {
        let source = "# A\n\nPara one\n\nPara two\n";
        let mapping = map_blocks_to_source(source, &nodes(&["h1", "p", "p"]));
        let map = mapping.map().unwrap();

        let range = map.resolve_selection(["pb-2", "pb-1"], source).unwrap();
        assert_eq!(range.snapshot, "Para one\n\nPara two");
        assert_eq!(range.start, 5);

        assert!(map.resolve_selection(Vec::<&str>::new(), source).is_none());
        assert!(map.resolve_selection(["pb-9"], source).is_none());
    }
}
