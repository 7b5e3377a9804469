//! Markdown rendering collaborator.
//!
//! The core only needs `render(markdown) -> html`; the default implementation
//! delegates to pulldown-cmark with raw HTML neutralised.

use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag, TagEnd};

/// Extensions shared by the renderer and the block tokenizer, so both see the
/// same block structure.
pub fn markdown_options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_FOOTNOTES
}

pub trait MarkdownRenderer: Send + Sync {
    fn render(&self, markdown: &str) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CmarkRenderer {
    /// Pass inline and block HTML through untouched instead of escaping it.
    pub allow_raw_html: bool,
}

impl MarkdownRenderer for CmarkRenderer {
    fn render(&self, markdown: &str) -> String {
        let allow_raw = self.allow_raw_html;
        // Escaped HTML blocks stay one top-level element so block mapping
        // still lines up with the source.
        let parser = Parser::new_ext(markdown, markdown_options()).map(move |event| match event {
            Event::Start(Tag::HtmlBlock) if !allow_raw => Event::Start(Tag::Paragraph),
            Event::End(TagEnd::HtmlBlock) if !allow_raw => Event::End(TagEnd::Paragraph),
            Event::Html(raw) | Event::InlineHtml(raw) if !allow_raw => {
                Event::Text(CowStr::from(raw.into_string()))
            }
            other => other,
        });

        let mut out = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }
}
