//! Mapping diagnostic positions onto source text.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::site::{char_to_byte, ConstructKind};

/// A diagnostic position resolved against file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    /// Byte offset of the marker.
    pub start: usize,
    pub line_text: String,
    /// Byte offset of the start of the marker line.
    pub line_start: usize,
}

/// Resolve a 1-based (line, column) pair to a byte offset.
pub fn locate(content: &str, line: u32, column: u32) -> Option<Located> {
    if line == 0 || column == 0 {
        return None;
    }
    let mut offset = 0usize;
    for (idx, raw) in content.split_inclusive('\n').enumerate() {
        if idx + 1 == line as usize {
            let line_text = raw.trim_end_matches('\n').trim_end_matches('\r');
            let col = (column - 1) as usize;
            if col > line_text.chars().count() {
                return None;
            }
            return Some(Located {
                start: offset + char_to_byte(line_text, col),
                line_text: line_text.to_string(),
                line_start: offset,
            });
        }
        offset += raw.len();
    }
    None
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Whether `marker` sits at `start` as a whole word.
pub fn marker_at(content: &str, start: usize, marker: &str) -> bool {
    if content.get(start..start + marker.len()) != Some(marker) {
        return false;
    }
    let before_ok = content[..start]
        .chars()
        .next_back()
        .map_or(true, |c| !is_ident_char(c));
    let after_ok = content[start + marker.len()..]
        .chars()
        .next()
        .map_or(true, |c| !is_ident_char(c));
    before_ok && after_ok
}

/// Lines `[line - radius, line + radius]` (1-based, clamped) and the line
/// number of the first one.
pub fn context_window(content: &str, line: u32, radius: usize) -> (Vec<String>, u32) {
    let lines: Vec<&str> = content.lines().collect();
    let idx = (line as usize).saturating_sub(1).min(lines.len().saturating_sub(1));
    let first = idx.saturating_sub(radius);
    let last = (idx + radius).min(lines.len().saturating_sub(1));
    let window = if lines.is_empty() {
        Vec::new()
    } else {
        lines[first..=last].iter().map(|s| s.to_string()).collect()
    };
    (window, first as u32 + 1)
}

fn catch_binding() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"catch\s*\(\s*[\w$]+\s*:$").expect("valid catch pattern"))
}

fn variable_decl() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:const|let|var)\s+[\w$]+!?$").expect("valid declaration pattern")
    })
}

/// Unclosed `(` and `<` in `text`, ignoring `=>`, `<=` and `>=`.
fn open_depths(text: &str) -> (i32, i32) {
    let chars: Vec<char> = text.chars().collect();
    let (mut parens, mut angles) = (0i32, 0i32);
    for (i, &c) in chars.iter().enumerate() {
        let next = chars.get(i + 1).copied();
        let prev = if i > 0 { chars.get(i - 1).copied() } else { None };
        match c {
            '(' => parens += 1,
            ')' => parens -= 1,
            '<' if next != Some('=') => angles += 1,
            '>' if prev != Some('=') && next != Some('=') => angles = (angles - 1).max(0),
            _ => {}
        }
    }
    (parens, angles)
}

/// Infer the construct holding the marker from the text before it on its line.
pub fn infer_construct(prefix: &str) -> ConstructKind {
    let p = prefix.trim_end();

    if p == "as" || p.ends_with(" as") || p.ends_with("(as") {
        return ConstructKind::Cast;
    }
    if catch_binding().is_match(p) {
        return ConstructKind::CatchBinding;
    }

    let (parens, angles) = open_depths(p);
    if angles > 0 {
        return ConstructKind::GenericArgument;
    }

    if let Some(before) = p.strip_suffix(':') {
        let before = before.trim_end();
        if before.ends_with(')') {
            return ConstructKind::ReturnType;
        }
        if variable_decl().is_match(before) {
            return ConstructKind::Variable;
        }
        if parens > 0 {
            return ConstructKind::Parameter;
        }
        return ConstructKind::Property;
    }

    ConstructKind::Other
}
