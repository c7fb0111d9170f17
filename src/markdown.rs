//! Incremental Markdown assembly for streaming text fields
//!
//! A streaming field is split into a settled prefix, handed to a
//! [`MarkdownRenderer`], and an escaped remainder that is shown verbatim
//! until its syntax is complete.

mod assembler;
mod render;
mod scanner;

pub use assembler::{RenderedText, StreamingText};
pub use render::{escape_html, CmarkRenderer, MarkdownRenderer, CURSOR_MARKER};
pub use scanner::render_boundary;
