//! Lenient HTML fragment parser over quick-xml.
//!
//! Rendered Markdown is close to XHTML (void elements are self-closed), but raw
//! HTML from documents may not be, so void tags are never pushed on the stack
//! and stray end tags are ignored.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::ops::Range;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Clone, PartialEq)]
pub enum HtmlNode {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<HtmlNode>,
    /// Byte range of the element in the source fragment, tags included.
    pub span: Range<usize>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Concatenated text of all descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            HtmlNode::Element(e) => Some(e),
            HtmlNode::Text(_) => None,
        })
    }

    /// First descendant element with the given tag, depth first.
    pub fn find(&self, tag: &str) -> Option<&Element> {
        for child in self.child_elements() {
            if child.tag == tag {
                return Some(child);
            }
            if let Some(found) = child.find(tag) {
                return Some(found);
            }
        }
        None
    }
}

fn collect_text(nodes: &[HtmlNode], out: &mut String) {
    for node in nodes {
        match node {
            HtmlNode::Text(t) => out.push_str(t),
            HtmlNode::Element(e) => collect_text(&e.children, out),
        }
    }
}

fn position(reader: &Reader<&[u8]>) -> usize {
    usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX)
}

fn open_element(start: &BytesStart<'_>, at: usize) -> Element {
    let tag = String::from_utf8_lossy(start.name().as_ref()).to_ascii_lowercase();
    let attrs = start
        .attributes()
        .filter_map(Result::ok)
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.as_ref()).to_ascii_lowercase();
            let raw = String::from_utf8_lossy(&a.value);
            (key, html_escape::decode_html_entities(&raw).into_owned())
        })
        .collect();
    Element {
        tag,
        attrs,
        children: Vec::new(),
        span: at..at,
    }
}

fn attach(stack: &mut [Element], roots: &mut Vec<HtmlNode>, node: HtmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

/// Parses a fragment into a forest. Parsing stops quietly at the first
/// syntax error; everything read so far is kept.
pub fn parse_fragment(html: &str) -> Vec<HtmlNode> {
    let mut reader = Reader::from_str(html);
    reader.config_mut().check_end_names = false;

    let mut roots = Vec::new();
    let mut stack: Vec<Element> = Vec::new();

    loop {
        let before = position(&reader);
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("Stopping HTML parse at byte {}: {}", before, e);
                break;
            }
        };
        let after = position(&reader);

        match event {
            Event::Start(start) => {
                let mut element = open_element(&start, before);
                if VOID_ELEMENTS.contains(&element.tag.as_str()) {
                    element.span = before..after;
                    attach(&mut stack, &mut roots, HtmlNode::Element(element));
                } else {
                    stack.push(element);
                }
            }
            Event::Empty(start) => {
                let mut element = open_element(&start, before);
                element.span = before..after;
                attach(&mut stack, &mut roots, HtmlNode::Element(element));
            }
            Event::End(end) => {
                let tag = String::from_utf8_lossy(end.name().as_ref()).to_ascii_lowercase();
                if !stack.iter().any(|e| e.tag == tag) {
                    continue;
                }
                while let Some(mut element) = stack.pop() {
                    let matched = element.tag == tag;
                    element.span.end = after;
                    attach(&mut stack, &mut roots, HtmlNode::Element(element));
                    if matched {
                        break;
                    }
                }
            }
            Event::Text(text) => {
                let raw = String::from_utf8_lossy(&text);
                let decoded = html_escape::decode_html_entities(&raw).into_owned();
                if !decoded.is_empty() {
                    attach(&mut stack, &mut roots, HtmlNode::Text(decoded));
                }
            }
            Event::CData(data) => {
                let raw = String::from_utf8_lossy(&data).into_owned();
                attach(&mut stack, &mut roots, HtmlNode::Text(raw));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let end = html.len();
    while let Some(mut element) = stack.pop() {
        element.span.end = end;
        attach(&mut stack, &mut roots, HtmlNode::Element(element));
    }
    roots
}

/// Top-level elements of a fragment, ignoring whitespace between them.
pub fn top_level_elements(nodes: &[HtmlNode]) -> Vec<&Element> {
    nodes
        .iter()
        .filter_map(|n| match n {
            HtmlNode::Element(e) => Some(e),
            HtmlNode::Text(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_nested_elements_with_spans() {
        let html = "<h1>Title</h1>\n<p>Some <strong>bold</strong> &amp; more</p>\n";
        let nodes = parse_fragment(html);
        let top = top_level_elements(&nodes);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].tag, "h1");
        assert_eq!(&html[top[0].span.clone()], "<h1>Title</h1>");
        assert_eq!(top[1].text_content(), "Some bold & more");
        assert!(top[1].find("strong").is_some());
    }

    #[test]
    fn test_void_and_self_closed_elements() {
        let html = "<p>a<br>b<img src=\"x.png\" alt=\"pic\" /></p><hr />";
        let nodes = parse_fragment(html);
        let top = top_level_elements(&nodes);
        assert_eq!(top.len(), 2);
        assert_eq!(top[1].tag, "hr");
        let img = top[0].find("img").unwrap();
        assert_eq!(img.attr("alt"), Some("pic"));
        assert_eq!(top[0].text_content(), "ab");
    }

    #[test]
    fn test_unclosed_elements_are_closed_at_end() {
        let nodes = parse_fragment("<ul><li>one<li>two");
        let top = top_level_elements(&nodes);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].text_content(), "onetwo");
    }
}
