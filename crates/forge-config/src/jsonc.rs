//! JSON-with-comments parsing.
//!
//! `//` and `/* */` comments are blanked out and trailing commas before `}`
//! or `]` are dropped. Blanking keeps every byte offset in place, so line and
//! column numbers reported by the JSON parser still point into the source.
//!
//! Multi-line strings are folded afterwards: adjacent string literals merge
//! into one joined by `\n`, and raw newlines inside a literal become `\n`
//! with continuation lines trimmed. Line numbers are kept by re-emitting the
//! swallowed newlines after the folded literal.

use serde_json::Value;
use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;

use crate::error::LoadError;

/// Marker used by IDE formatter directives embedded in string values.
pub const FORMATTER_HINT: &str = "# @formatter:";

/// Parse JSONC text into a JSON value, folding multi-line strings.
pub fn parse(text: &str, path: &Path) -> Result<Value, LoadError> {
    parse_with(text, path, true)
}

/// Parse JSONC text, optionally folding multi-line strings.
pub fn parse_with(text: &str, path: &Path, fold_multiline: bool) -> Result<Value, LoadError> {
    let mut clean = sanitize(text);
    if fold_multiline {
        clean = fold_multiline_strings(&clean);
    }
    serde_json::from_str(&clean).map_err(|e| {
        let message = e.to_string();
        let message = match message.rfind(" at line ") {
            Some(idx) => message[..idx].to_string(),
            None => message,
        };
        LoadError::MalformedDocument {
            path: path.to_path_buf(),
            line: e.line(),
            column: e.column(),
            message,
        }
    })
}

/// Blank out comments and trailing commas, leaving everything else intact.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;
    // Byte offset in `out` of a comma that follows a value and is not yet
    // followed by another one.
    let mut pending_comma: Option<usize> = None;
    // Last character outside strings and comments, `"` for a closed string.
    let mut last = '\0';

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                last = '"';
            }
            continue;
        }

        match c {
            '/' if chars.peek() == Some(&'/') => {
                blank(&mut out, c);
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    blank(&mut out, next);
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                blank(&mut out, c);
                if let Some(star) = chars.next() {
                    blank(&mut out, star);
                }
                let mut prev = '\0';
                for next in chars.by_ref() {
                    blank(&mut out, next);
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            ',' => {
                pending_comma = ends_value(last).then_some(out.len());
                last = c;
                out.push(c);
            }
            '}' | ']' => {
                if let Some(idx) = pending_comma.take() {
                    out.replace_range(idx..idx + 1, " ");
                }
                last = c;
                out.push(c);
            }
            c if c.is_whitespace() => out.push(c),
            '"' => {
                pending_comma = None;
                in_string = true;
                out.push(c);
            }
            _ => {
                pending_comma = None;
                last = c;
                out.push(c);
            }
        }
    }

    out
}

/// Whether `c` can be the final character of a JSON value.
fn ends_value(c: char) -> bool {
    matches!(c, '"' | ']' | '}') || c.is_ascii_alphanumeric()
}

/// Replace a comment character with padding of the same byte width.
fn blank(out: &mut String, c: char) {
    if c == '\n' || c == '\r' {
        out.push(c);
    } else {
        for _ in 0..c.len_utf8() {
            out.push(' ');
        }
    }
}

/// Merge adjacent string literals and escape raw newlines inside literals.
///
/// Expects comment-free input, as produced by [`sanitize`].
pub fn fold_multiline_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '"' {
            out.push(c);
            continue;
        }

        let (first, closed) = read_literal(&mut chars);
        if !closed {
            out.push('"');
            out.push_str(&first);
            break;
        }
        let mut parts = vec![first];
        let mut swallowed = 0;
        loop {
            let mut gap = String::new();
            while let Some(&next) = chars.peek() {
                if !next.is_whitespace() {
                    break;
                }
                gap.push(next);
                chars.next();
            }
            if chars.peek() == Some(&'"') {
                let mut lookahead = chars.clone();
                lookahead.next();
                let (next, closed) = read_literal(&mut lookahead);
                if closed {
                    chars = lookahead;
                    swallowed += gap.matches('\n').count();
                    parts.push(next);
                    continue;
                }
            }

            let content = if parts.len() > 1 {
                parts
                    .iter()
                    .map(|p| p.trim())
                    .collect::<Vec<_>>()
                    .join("\\n")
            } else {
                parts.remove(0)
            };
            swallowed += content.matches('\n').count();
            out.push('"');
            out.push_str(&fold_lines(&content));
            out.push('"');
            out.extend(std::iter::repeat_n('\n', swallowed));
            out.push_str(&gap);
            break;
        }
    }

    out
}

/// Read a string literal body after its opening quote, escapes kept verbatim.
/// The flag is false when the input ends before the closing quote.
fn read_literal(chars: &mut Peekable<Chars<'_>>) -> (String, bool) {
    let mut body = String::new();
    let mut escaped = false;
    for c in chars.by_ref() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return (body, true);
        }
        body.push(c);
    }
    (body, false)
}

/// Join the lines of a literal body with an escaped newline, trimming
/// every line after the first.
fn fold_lines(body: &str) -> String {
    if !body.contains('\n') {
        return body.to_string();
    }
    let mut lines = body.lines();
    let mut folded = lines.next().unwrap_or_default().to_string();
    for line in lines {
        folded.push_str("\\n");
        folded.push_str(line.trim());
    }
    folded
}

/// Drop object entries whose string value carries an IDE formatter directive.
pub fn strip_formatter_hints(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.as_str().is_some_and(|s| s.contains(FORMATTER_HINT)))
                .map(|(k, v)| (k, strip_formatter_hints(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_formatter_hints).collect()),
        other => other,
    }
}
