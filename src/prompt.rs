//! System prompt templates and the directive toggles appended to them.

use crate::document::SelectionRange;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixKind {
    #[default]
    QuickFix,
    AdvancedOptimize,
}

impl FixKind {
    pub fn label(self) -> &'static str {
        match self {
            FixKind::QuickFix => "Quick fix",
            FixKind::AdvancedOptimize => "Deep optimization",
        }
    }

    pub fn template(self) -> &'static str {
        match self {
            FixKind::QuickFix => QUICK_FIX_PROMPT,
            FixKind::AdvancedOptimize => ADVANCED_OPTIMIZE_PROMPT,
        }
    }
}

const QUICK_FIX_PROMPT: &str = "You are a Markdown formatting expert. Repair the text the user provides so that it follows standard Markdown syntax and clean writing conventions:

1. Fix headings (a space after the #, consistent H1-H6 hierarchy).
2. Fix lists (spaces around - and 1. markers, nested and task lists).
3. Fix code blocks (balanced ``` fences, add a language tag).
4. Fix links [text](url) and images ![alt](url).
5. Fix tables (correct | separators and alignment rows).
6. Fix block quotes (a space after >, nested quotes).
7. Fix emphasis (bold, italic, strikethrough) so delimiters do not run into neighbouring text.
8. Insert spaces between CJK text and Latin words or digits.
9. Normalise punctuation.
10. Keep every LaTeX formula on a single line with spaces around it.
11. Keep the original meaning and logical structure.
12. Inside math, write accented characters with LaTeX commands (\\dot{a}, \\ddot{x}, \\bar{a}) rather than Unicode.
Important: return only the repaired Markdown, without explanations or a surrounding code fence.
Do not change spacing inside code, links or images, and never add spaces inside emphasis delimiters.

Repair the following content:";

const ADVANCED_OPTIMIZE_PROMPT: &str = "You are a document optimization expert. Improve the user's Markdown document in depth across structure, content and readability:

Structure:
1. Complete the H1-H6 hierarchy so the logic is clear.
2. Phrase headings so they produce a clean table of contents.
3. Split paragraphs so each has one clear topic and a moderate length.
4. Separate major sections with horizontal rules where helpful.
5. Express hierarchy with indentation, lists and quotes.

Content:
1. Smooth the logical transitions between paragraphs.
2. Add brief explanations or examples where they are clearly missing.
3. Emphasise key information with bold, italics or quotes.
4. Improve table structure and information density.
5. Use ordered and unordered lists where they present information better.

Readability:
1. Create visual rhythm with blank lines and separators.
2. Normalise mixed-language spacing and punctuation.
3. Complete code block fences and language tags.
4. Keep LaTeX formulas on a single line.
5. Improve link descriptions.

Important: keep the core content and opinions unchanged and return only the complete optimized Markdown, without explanations or a surrounding code fence.

Optimize the following content:";

const DIRECTIVE_FORMAT: &str = "Prioritise fixing Markdown syntax, tables, lists, code blocks and quotes so the document renders correctly.";
const DIRECTIVE_LANGUAGE: &str = "Polish the wording so it is accurate and fluent, without changing the original meaning.";
const DIRECTIVE_STRUCTURE: &str = "You may reorder paragraphs, adjust heading levels and restructure lists to improve overall logic and readability.";
const DIRECTIVE_PRESERVE_CODE: &str = "Keep every code block exactly as written; only fix the prose around code blocks.";
const DIRECTIVE_PRESERVE_QUOTES: &str = "Keep the original text of block quotes; only quote markers and punctuation may change.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixOptions {
    pub kind: FixKind,
    pub enhance_format: bool,
    pub enhance_language: bool,
    pub enhance_structure: bool,
    pub preserve_code_blocks: bool,
    pub preserve_quotes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<SelectionRange>,
}

impl FixOptions {
    /// The toggles the mode dialog starts with for `kind`.
    pub fn for_kind(kind: FixKind) -> Self {
        let advanced = kind == FixKind::AdvancedOptimize;
        Self {
            kind,
            enhance_format: true,
            enhance_language: advanced,
            enhance_structure: advanced,
            preserve_code_blocks: true,
            preserve_quotes: false,
            range: None,
        }
    }

    pub fn with_range(mut self, range: SelectionRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Focus labels for the review summary.
    pub fn focus_labels(&self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.enhance_format {
            labels.push("Format repair");
        }
        if self.enhance_language {
            labels.push("Language polish");
        }
        if self.enhance_structure {
            labels.push("Structure");
        }
        labels
    }

    /// Directive sentences in their fixed order; disabled flags are omitted.
    pub fn directives(&self) -> Vec<&'static str> {
        [
            (self.enhance_format, DIRECTIVE_FORMAT),
            (self.enhance_language, DIRECTIVE_LANGUAGE),
            (self.enhance_structure, DIRECTIVE_STRUCTURE),
            (self.preserve_code_blocks, DIRECTIVE_PRESERVE_CODE),
            (self.preserve_quotes, DIRECTIVE_PRESERVE_QUOTES),
        ]
        .into_iter()
        .filter_map(|(enabled, text)| enabled.then_some(text))
        .collect()
    }
}

impl Default for FixOptions {
    fn default() -> Self {
        Self::for_kind(FixKind::QuickFix)
    }
}

/// Template for the fix kind followed by a numbered list of the enabled directives.
pub fn compose_system_prompt(options: &FixOptions) -> String {
    let base = options.kind.template();
    let directives = options.directives();
    if directives.is_empty() {
        return base.to_string();
    }

    let list = directives
        .iter()
        .enumerate()
        .map(|(i, text)| format!("{}. {}", i + 1, text))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}\n\nAdditional requirements:\n{}", base, list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_per_kind() {
        let quick = FixOptions::for_kind(FixKind::QuickFix);
        assert!(quick.enhance_format && !quick.enhance_language && !quick.enhance_structure);
        assert!(quick.preserve_code_blocks && !quick.preserve_quotes);

        let deep = FixOptions::for_kind(FixKind::AdvancedOptimize);
        assert!(deep.enhance_language && deep.enhance_structure);
    }

    #[test]
    fn test_directives_follow_fixed_order() {
        let options = FixOptions {
            kind: FixKind::QuickFix,
            enhance_format: false,
            enhance_language: true,
            enhance_structure: false,
            preserve_code_blocks: true,
            preserve_quotes: true,
            range: None,
        };
        let prompt = compose_system_prompt(&options);
        assert!(prompt.starts_with(QUICK_FIX_PROMPT));
        assert!(prompt.contains(&format!("1. {}", DIRECTIVE_LANGUAGE)));
        assert!(prompt.contains(&format!("2. {}", DIRECTIVE_PRESERVE_CODE)));
        assert!(prompt.contains(&format!("3. {}", DIRECTIVE_PRESERVE_QUOTES)));
        assert!(!prompt.contains(DIRECTIVE_FORMAT));
    }

    #[test]
    fn test_all_flags_off_keeps_bare_template() {
        let options = FixOptions {
            kind: FixKind::AdvancedOptimize,
            enhance_format: false,
            enhance_language: false,
            enhance_structure: false,
            preserve_code_blocks: false,
            preserve_quotes: false,
            range: None,
        };
        assert_eq!(compose_system_prompt(&options), ADVANCED_OPTIMIZE_PROMPT);
        assert!(options.focus_labels().is_empty());
    }
}
