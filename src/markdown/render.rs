//! Markdown-to-markup rendering port

use pulldown_cmark_escape::FmtWriter;
use pulldown_cmark::{html, Options, Parser};

/// Transient marker appended to a field while it is still streaming
pub const CURSOR_MARKER: &str = r#"<span class="cursor">▋</span>"#;

/// Pure Markdown-to-presentation function.
///
/// Implementations must be deterministic: the same input always yields the
/// same markup.
pub trait MarkdownRenderer: Send + Sync {
    fn render(&self, markdown: &str) -> String;
}

impl<F> MarkdownRenderer for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn render(&self, markdown: &str) -> String {
        self(markdown)
    }
}

/// CommonMark renderer backed by pulldown-cmark
#[derive(Debug, Clone, Copy, Default)]
pub struct CmarkRenderer;

impl MarkdownRenderer for CmarkRenderer {
    fn render(&self, markdown: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);

        let parser = Parser::new_ext(markdown, options);
        let mut out = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }
}

/// Escape text for verbatim display inside markup
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    // Writing into a String cannot fail
    let _ = pulldown_cmark_escape::escape_html(FmtWriter(&mut out), text);
    out
}
