//! Maps rendered HTML into the structural description consumed by the
//! word-processor encoder.

use crate::constants::{LARGE_DOC_CHARS, LARGE_DOC_LINES};
use crate::html::{parse_fragment, top_level_elements, Element, HtmlNode};
use crate::math::has_math_spans;
use crate::render::MarkdownRenderer;
use serde::Serialize;

const UNTITLED: &str = "Untitled document";

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TextRun {
    pub text: String,
    #[serde(skip_serializing_if = "is_false")]
    pub bold: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub italic: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub strike: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub underline: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub code: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl TextRun {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRow {
    pub cells: Vec<String>,
    pub header: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportBlock {
    Heading { level: u8, runs: Vec<TextRun> },
    Paragraph { runs: Vec<TextRun>, has_math: bool },
    ListItem { ordered: bool, level: usize, text: String },
    BlockQuote { text: String },
    CodeBlock { language: Option<String>, lines: Vec<String> },
    Table { rows: Vec<TableRow> },
    Rule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DocumentComplexity {
    pub size: usize,
    pub lines: usize,
    pub has_tables: bool,
    pub has_code_blocks: bool,
    pub has_math: bool,
    pub is_large: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportDocument {
    pub title: String,
    pub complexity: DocumentComplexity,
    pub blocks: Vec<ExportBlock>,
}

/// Title from a leading heading line, otherwise a fixed placeholder.
pub fn extract_document_title(markdown: &str) -> String {
    let first = markdown.lines().next().unwrap_or("").trim();
    if !first.starts_with('#') {
        return UNTITLED.to_string();
    }
    let title = first.trim_start_matches('#').trim();
    if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title.to_string()
    }
}

pub fn analyze_complexity(markdown: &str) -> DocumentComplexity {
    let size = markdown.chars().count();
    let lines = markdown.split('\n').count();
    DocumentComplexity {
        size,
        lines,
        has_tables: markdown.contains('|'),
        has_code_blocks: markdown.contains("```"),
        has_math: has_math_spans(markdown),
        is_large: size > LARGE_DOC_CHARS || lines > LARGE_DOC_LINES,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RunStyle {
    bold: bool,
    italic: bool,
    strike: bool,
    underline: bool,
    code: bool,
}

impl RunStyle {
    fn with_tag(mut self, tag: &str) -> Self {
        match tag {
            "strong" | "b" => self.bold = true,
            "em" | "i" => self.italic = true,
            "s" | "del" | "strike" => self.strike = true,
            "u" => self.underline = true,
            "code" => self.code = true,
            _ => {}
        }
        self
    }

    fn run(self, text: &str) -> TextRun {
        TextRun {
            text: text.to_string(),
            bold: self.bold,
            italic: self.italic,
            strike: self.strike,
            underline: self.underline,
            code: self.code,
            link: None,
        }
    }
}

fn collect_runs(nodes: &[HtmlNode], style: RunStyle, runs: &mut Vec<TextRun>) {
    for node in nodes {
        match node {
            HtmlNode::Text(text) if !text.is_empty() => runs.push(style.run(text)),
            HtmlNode::Text(_) => {}
            HtmlNode::Element(e) => match e.tag.as_str() {
                "a" => {
                    let mut run = style.run(&e.text_content());
                    run.underline = true;
                    run.link = e.attr("href").map(str::to_string);
                    runs.push(run);
                }
                "img" => {
                    let alt = e.attr("alt").filter(|a| !a.is_empty()).unwrap_or("Image");
                    let text = match e.attr("src").filter(|s| !s.is_empty()) {
                        Some(src) => format!("[Image: {} - {}] ", alt, src),
                        None => format!("[Image: {}] ", alt),
                    };
                    let mut run = style.run(&text);
                    run.italic = true;
                    runs.push(run);
                }
                "br" => runs.push(style.run("\n")),
                tag => collect_runs(&e.children, style.with_tag(tag), runs),
            },
        }
    }
}

fn inline_runs(element: &Element) -> Vec<TextRun> {
    let mut runs = Vec::new();
    collect_runs(&element.children, RunStyle::default(), &mut runs);
    runs
}

fn descendants<'a>(element: &'a Element, tags: &[&str], out: &mut Vec<&'a Element>) {
    for child in element.child_elements() {
        if tags.contains(&child.tag.as_str()) {
            out.push(child);
        }
        descendants(child, tags, out);
    }
}

fn list_items(list: &Element, ordered: bool, level: usize, blocks: &mut Vec<ExportBlock>) {
    for item in list.child_elements().filter(|e| e.tag == "li") {
        let mut direct = String::new();
        for child in &item.children {
            match child {
                HtmlNode::Text(t) => direct.push_str(t),
                HtmlNode::Element(e) if e.tag != "ul" && e.tag != "ol" => {
                    direct.push_str(&e.text_content())
                }
                HtmlNode::Element(_) => {}
            }
        }
        let text = direct.trim();
        if !text.is_empty() {
            blocks.push(ExportBlock::ListItem {
                ordered,
                level,
                text: text.to_string(),
            });
        }
        for nested in item
            .child_elements()
            .filter(|e| e.tag == "ul" || e.tag == "ol")
        {
            list_items(nested, nested.tag == "ol", level + 1, blocks);
        }
    }
}

fn table_rows(table: &Element) -> Vec<TableRow> {
    let mut rows = Vec::new();
    descendants(table, &["tr"], &mut rows);
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let mut cells = Vec::new();
            descendants(row, &["td", "th"], &mut cells);
            TableRow {
                header: index == 0 || cells.iter().any(|c| c.tag == "th"),
                cells: cells
                    .iter()
                    .map(|c| c.text_content().trim().to_string())
                    .collect(),
            }
        })
        .collect()
}

fn code_block(pre: &Element) -> ExportBlock {
    let code = pre.find("code");
    let language = code
        .and_then(|c| c.attr("class"))
        .and_then(|class| {
            class
                .split_whitespace()
                .find_map(|c| c.strip_prefix("language-"))
        })
        .map(str::to_string);
    let text = code.map_or_else(|| pre.text_content(), Element::text_content);
    let text = text.strip_suffix('\n').unwrap_or(&text);
    ExportBlock::CodeBlock {
        language,
        lines: text.split('\n').map(str::to_string).collect(),
    }
}

/// Converts a rendered fragment into export blocks. Top-level elements with
/// no text are skipped, except rules.
pub fn html_to_export_blocks(html: &str) -> Vec<ExportBlock> {
    let tree = parse_fragment(html);
    let mut blocks = Vec::new();

    for element in top_level_elements(&tree) {
        let tag = element.tag.as_str();
        if tag == "hr" {
            blocks.push(ExportBlock::Rule);
            continue;
        }
        let text = element.text_content();
        if text.trim().is_empty() {
            continue;
        }

        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => blocks.push(ExportBlock::Heading {
                level: tag[1..].parse().unwrap_or(1),
                runs: vec![TextRun {
                    bold: true,
                    ..TextRun::plain(text.trim())
                }],
            }),
            "ul" | "ol" => list_items(element, tag == "ol", 0, &mut blocks),
            "blockquote" => blocks.push(ExportBlock::BlockQuote {
                text: text.trim().to_string(),
            }),
            "pre" => blocks.push(code_block(element)),
            "table" => blocks.push(ExportBlock::Table {
                rows: table_rows(element),
            }),
            _ => {
                let mut runs = inline_runs(element);
                if runs.is_empty() {
                    runs.push(TextRun::plain(text.trim()));
                }
                blocks.push(ExportBlock::Paragraph {
                    has_math: has_math_spans(&text),
                    runs,
                });
            }
        }
    }
    blocks
}

pub fn build_export(markdown: &str, renderer: &dyn MarkdownRenderer) -> ExportDocument {
    let html = renderer.render(markdown);
    let document = ExportDocument {
        title: extract_document_title(markdown),
        complexity: analyze_complexity(markdown),
        blocks: html_to_export_blocks(&html),
    };
    tracing::info!(
        "Prepared export of '{}' with {} blocks",
        document.title,
        document.blocks.len()
    );
    document
}
