use crate::constants::APP_NAME;
use crate::html::{parse_fragment, top_level_elements};
use crate::mapper::{map_blocks_to_source, BlockMapping, RenderedNode};
use crate::math::has_math_delimiters;
use crate::render::{CmarkRenderer, MarkdownRenderer};
use horrorshow::helper::doctype;
use horrorshow::{html, Raw};
use html_escape::encode_double_quoted_attribute;
use std::sync::Arc;

/// Output of one render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPreview {
    /// Fragment produced by the renderer.
    pub html: String,
    pub nodes: Vec<RenderedNode>,
    pub mapping: BlockMapping,
    /// Standalone page with mapped blocks wrapped for click selection.
    pub page: String,
    pub has_math: bool,
}

#[derive(Clone)]
pub struct Preview {
    renderer: Arc<dyn MarkdownRenderer>,
}

impl Default for Preview {
    fn default() -> Self {
        Self::new()
    }
}

impl Preview {
    pub fn new() -> Self {
        Self::with_renderer(Arc::new(CmarkRenderer::default()))
    }

    pub fn with_renderer(renderer: Arc<dyn MarkdownRenderer>) -> Self {
        Self { renderer }
    }

    pub fn render(&self, markdown: &str) -> RenderedPreview {
        let start = std::time::Instant::now();
        let fragment = self.renderer.render(markdown);
        let tree = parse_fragment(&fragment);
        let elements = top_level_elements(&tree);

        let nodes: Vec<RenderedNode> = elements
            .iter()
            .map(|e| RenderedNode::new(e.tag.as_str()))
            .collect();
        let mapping = map_blocks_to_source(markdown, &nodes);

        let body = match mapping.map() {
            Some(map) => {
                let mut body = String::with_capacity(fragment.len() + map.blocks.len() * 96);
                let mut cursor = 0;
                for (element, meta) in elements.iter().zip(&map.blocks) {
                    body.push_str(fragment.get(cursor..element.span.start).unwrap_or(""));
                    body.push_str(&format!(
                        "<div class=\"preview-block\" data-block-id=\"{}\" data-md-start=\"{}\" data-md-end=\"{}\">",
                        encode_double_quoted_attribute(&meta.block_id),
                        meta.start,
                        meta.end
                    ));
                    body.push_str(fragment.get(element.span.clone()).unwrap_or(""));
                    body.push_str("</div>");
                    cursor = element.span.end;
                }
                body.push_str(fragment.get(cursor..).unwrap_or(""));
                body
            }
            None => fragment.clone(),
        };

        let page = if markdown.trim().is_empty() {
            Self::wrap_placeholder()
        } else {
            Self::wrap_page(&body)
        };

        tracing::debug!(
            "Preview rendered in {:.1}ms ({} blocks, mapping {})",
            start.elapsed().as_secs_f64() * 1000.0,
            nodes.len(),
            if mapping.is_supported() { "ok" } else { "unsupported" }
        );

        RenderedPreview {
            has_math: has_math_delimiters(markdown),
            html: fragment,
            nodes,
            mapping,
            page,
        }
    }

    fn wrap_page(body: &str) -> String {
        format!(
            "{}",
            html! {
                : doctype::HTML;
                html {
                    head {
                        meta(charset="utf-8");
                        title { : APP_NAME }
                        meta(http-equiv="Content-Security-Policy",
                             content="default-src 'self'; script-src 'none'; style-src 'unsafe-inline';");
                        meta(http-equiv="X-Content-Type-Options", content="nosniff");
                        style {
                            : Raw("
                                body {
                                    font-family: -apple-system, 'Segoe UI', sans-serif;
                                    line-height: 1.6;
                                    max-width: 860px;
                                    margin: 0 auto;
                                    padding: 24px;
                                }
                                .preview-block { border-radius: 4px; }
                                .preview-block:hover { background: rgba(59,130,246,0.06); }
                                .preview-block.selected { outline: 2px solid #3b82f6; }
                                pre { background: #f6f8fa; padding: 12px; overflow-x: auto; }
                                table { border-collapse: collapse; }
                                th, td { border: 1px solid #d0d7de; padding: 4px 10px; }
                                blockquote { border-left: 4px solid #d0d7de; margin-left: 0; padding-left: 12px; color: #57606a; }

                                @media (prefers-color-scheme: dark) {
                                    body { background-color: #1e1e1e; color: #ddd; }
                                    pre { background: #2a2a2a; }
                                }
                            ")
                        }
                    }
                    body {
                        : Raw(body);
                    }
                }
            }
        )
    }

    fn wrap_placeholder() -> String {
        format!(
            "{}",
            html! {
                : doctype::HTML;
                html {
                    head {
                        meta(charset="utf-8");
                        title { : APP_NAME }
                        style {
                            : Raw("body { font-family: sans-serif; color: #888; text-align: center; padding-top: 80px; }")
                        }
                    }
                    body {
                        h2 { : "Start writing your document" }
                        p { : "Type Markdown in the editor and the preview appears here." }
                    }
                }
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_wraps_mapped_blocks() {
        let preview = Preview::new().render("# A\n\nPara");
        assert_eq!(
            preview.nodes,
            vec![RenderedNode::new("h1"), RenderedNode::new("p")]
        );
        assert!(preview.mapping.is_supported());
        assert!(preview
            .page
            .contains("<div class=\"preview-block\" data-block-id=\"pb-0\" data-md-start=\"0\" data-md-end=\"3\"><h1>A</h1></div>"));
        assert!(preview.page.contains("data-block-id=\"pb-1\""));
        assert!(!preview.has_math);
    }

    #[test]
    fn test_unsupported_mapping_renders_plain_fragment() {
        struct Fixed;
        impl MarkdownRenderer for Fixed {
            fn render(&self, _markdown: &str) -> String {
                "<p>one</p><p>two</p>".to_string()
            }
        }
        let preview = Preview::with_renderer(Arc::new(Fixed)).render("# only one block");
        assert_eq!(preview.mapping, BlockMapping::Unsupported);
        assert!(!preview.page.contains("preview-block\""));
        assert!(preview.page.contains("<p>one</p><p>two</p>"));
    }

    #[test]
    fn test_empty_document_shows_placeholder() {
        let preview = Preview::new().render("   \n");
        assert!(preview.page.contains("Start writing your document"));
        assert!(preview.page.contains("<title>mdcraft</title>"));
    }

    #[test]
    fn test_html_block_keeps_mapping() {
        let source = "para\n\n<div>\nblock html\n</div>\n\nafter\n";
        let preview = Preview::new().render(source);
        assert_eq!(preview.nodes.len(), 3);
        let map = preview.mapping.map().unwrap();
        assert_eq!(&source[map.blocks[1].range()], "<div>\nblock html\n</div>");
        assert_eq!(&source[map.blocks[2].range()], "after");
        assert!(preview.page.contains("<title>mdcraft</title>"));
    }

    #[test]
    fn test_math_flag() {
        assert!(Preview::new().render("Euler: $e^{i\\pi}+1=0$").has_math);
    }
}
