//! Streaming text buffer with a monotone render boundary

use super::render::{escape_html, MarkdownRenderer, CURSOR_MARKER};
use super::scanner::render_boundary;
use serde::Serialize;
use std::fmt;

/// One streaming text field (a reasoning iteration or the final answer)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamingText {
    buffer: String,
    /// High-water mark of the settled prefix, in bytes
    boundary: usize,
    open: bool,
}

impl StreamingText {
    /// An empty field that expects more chunks
    pub fn open() -> Self {
        Self {
            buffer: String::new(),
            boundary: 0,
            open: true,
        }
    }

    /// A field whose full text is already known
    pub fn complete(text: impl Into<String>) -> Self {
        let buffer = text.into();
        Self {
            boundary: buffer.len(),
            buffer,
            open: false,
        }
    }

    /// Append a chunk and return the new boundary
    pub fn push(&mut self, chunk: &str) -> usize {
        if !self.open {
            tracing::warn!(len = chunk.len(), "Dropping chunk for a finished text field");
            return self.boundary;
        }
        self.buffer.push_str(chunk);
        self.boundary = self.boundary.max(render_boundary(&self.buffer));
        self.boundary
    }

    /// End of stream: everything is settled from now on
    pub fn finish(&mut self) {
        self.open = false;
        self.boundary = self.buffer.len();
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn boundary(&self) -> usize {
        self.boundary
    }

    /// Prefix that is safe to render as Markdown
    pub fn settled(&self) -> &str {
        self.buffer.get(..self.boundary).unwrap_or(&self.buffer)
    }

    /// Suffix shown verbatim until its syntax completes
    pub fn pending(&self) -> &str {
        self.buffer.get(self.boundary..).unwrap_or_default()
    }

    pub fn render(&self, renderer: &dyn MarkdownRenderer) -> RenderedText {
        let settled = self.settled();
        RenderedText {
            html: if settled.is_empty() {
                String::new()
            } else {
                renderer.render(settled)
            },
            pending: escape_html(self.pending()),
            streaming: self.open,
        }
    }
}

/// Presentation of a [`StreamingText`] at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedText {
    /// Renderer output for the settled prefix
    pub html: String,
    /// Escaped, unrendered remainder
    pub pending: String,
    /// Whether the cursor marker is shown
    pub streaming: bool,
}

impl fmt::Display for RenderedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.html)?;
        f.write_str(&self.pending)?;
        if self.streaming {
            f.write_str(CURSOR_MARKER)?;
        }
        Ok(())
    }
}
