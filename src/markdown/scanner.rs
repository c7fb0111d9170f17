//! Completeness scanner for streamed Markdown
//!
//! Finds the end offset of the last construct whose syntax is complete.
//! The scan runs once, left to right, line by line:
//!
//! - fenced code blocks win over everything; nothing inside a fence counts
//! - inline code wins over emphasis; nothing inside a code span counts
//! - `**` is tried before `*`, so a bold delimiter never opens an italic
//! - a backslash escapes the next byte
//! - inline constructs live on one line; an unclosed opener stops the scan
//!   of the rest of that line
//! - line constructs (heading, list item, blockquote) are complete once the
//!   line is terminated by `\n`
//!
//! Decisions at a given offset only look backwards or at bytes that are
//! already present, so appending text can only add complete constructs.

const FENCE: &[u8] = b"```";

/// Byte offset up to which `text` can be rendered as Markdown.
///
/// Always lands on a `char` boundary: every offset returned sits right
/// after an ASCII delimiter or newline.
pub fn render_boundary(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut boundary = 0;
    let mut in_fence = false;
    let mut pos = 0;

    while pos < bytes.len() {
        let newline = bytes[pos..].iter().position(|&b| b == b'\n').map(|n| pos + n);
        let line_end = newline.unwrap_or(bytes.len());
        let line = trim_cr(&bytes[pos..line_end]);
        let indent = leading_spaces(line);
        let body = &line[indent..];

        if body.starts_with(FENCE) {
            if in_fence {
                boundary = boundary.max(pos + indent + FENCE.len());
            }
            in_fence = !in_fence;
        } else if !in_fence {
            if newline.is_some() && is_line_construct(body) {
                boundary = boundary.max(line_end + 1);
            }
            let inline_start = indent + block_marker_len(body);
            let inline_end = scan_inline(&line[inline_start..]);
            if inline_end > 0 {
                boundary = boundary.max(pos + inline_start + inline_end);
            }
        }

        pos = line_end + 1;
    }

    boundary.min(bytes.len())
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn leading_spaces(line: &[u8]) -> usize {
    line.iter().take_while(|&&b| b == b' ' || b == b'\t').count()
}

fn has_content(rest: &[u8]) -> bool {
    rest.iter().any(|b| !b.is_ascii_whitespace())
}

/// Length of a heading, list or quote marker at the start of `body`
/// (including the separating space), 0 if there is none.
fn block_marker_len(body: &[u8]) -> usize {
    let hashes = body.iter().take_while(|&&b| b == b'#').count();
    if (1..=6).contains(&hashes) && body.get(hashes) == Some(&b' ') {
        return hashes + 1;
    }

    if matches!(body.first(), Some(b'-' | b'*' | b'+')) && body.get(1) == Some(&b' ') {
        return 2;
    }

    let digits = body.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits > 0 && body.get(digits) == Some(&b'.') && body.get(digits + 1) == Some(&b' ') {
        return digits + 2;
    }

    if body.first() == Some(&b'>') {
        return if body.get(1) == Some(&b' ') { 2 } else { 1 };
    }

    0
}

/// Heading, unordered item, ordered item or blockquote with content
fn is_line_construct(body: &[u8]) -> bool {
    let marker = block_marker_len(body);
    if marker == 0 {
        return false;
    }
    // "# " needs the space, "1. " too; a bare ">" is not a quote
    has_content(&body[marker..])
}

fn find_byte(line: &[u8], from: usize, needle: u8) -> Option<usize> {
    line.get(from..)?
        .iter()
        .position(|&b| b == needle)
        .map(|n| from + n)
}

fn find_pair(line: &[u8], from: usize, needle: u8) -> Option<usize> {
    line.get(from..)?
        .windows(2)
        .position(|w| w[0] == needle && w[1] == needle)
        .map(|n| from + n)
}

/// End offset (relative to `line`) of the last complete inline construct
fn scan_inline(line: &[u8]) -> usize {
    let mut end = 0;
    let mut i = 0;

    while i < line.len() {
        match line[i] {
            b'\\' => i += 2,
            b'`' => match find_byte(line, i + 1, b'`') {
                // `x` with at least one byte between the ticks
                Some(close) if close > i + 1 => {
                    end = close + 1;
                    i = close + 1;
                }
                Some(close) => i = close + 1,
                None => break,
            },
            b'*' if line.get(i + 1) == Some(&b'*') => {
                if line.get(i + 2).is_some_and(u8::is_ascii_whitespace) {
                    i += 2;
                    continue;
                }
                match find_pair(line, i + 2, b'*') {
                    Some(close) if close > i + 2 => {
                        end = close + 2;
                        i = close + 2;
                    }
                    Some(close) => i = close + 2,
                    None => break,
                }
            }
            b'*' => {
                if line.get(i + 1).is_some_and(u8::is_ascii_whitespace) {
                    i += 1;
                    continue;
                }
                match find_byte(line, i + 1, b'*') {
                    Some(close) => {
                        end = close + 1;
                        i = close + 1;
                    }
                    None => break,
                }
            }
            _ => i += 1,
        }
    }

    end.min(line.len())
}
