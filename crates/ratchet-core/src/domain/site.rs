//! Escape-annotation sites.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cas::Digest;

/// Syntactic position an escape annotation occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructKind {
    Parameter,
    ReturnType,
    Variable,
    GenericArgument,
    Cast,
    CatchBinding,
    Property,
    Other,
}

impl ConstructKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstructKind::Parameter => "parameter",
            ConstructKind::ReturnType => "return_type",
            ConstructKind::Variable => "variable",
            ConstructKind::GenericArgument => "generic_argument",
            ConstructKind::Cast => "cast",
            ConstructKind::CatchBinding => "catch_binding",
            ConstructKind::Property => "property",
            ConstructKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ConstructKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of the marker in its file. `start..end` are byte offsets;
/// `line` and `column` are 1-based, column counted in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

/// One escape annotation found by the collector.
///
/// Sites are re-derived on every run and never mutated. If the same logical
/// annotation shows up again after edits it is a new site with, usually, the
/// same `content_hash`. Byte-identical annotated lines in one file are told
/// apart by their order of appearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscapeSite {
    /// Path relative to the workspace root.
    pub path: PathBuf,
    pub span: SourceSpan,
    pub kind: ConstructKind,
    /// The marker text found at `span` (e.g. `any`).
    pub marker: String,
    /// Full text of the line holding the marker, without the newline.
    pub line_text: String,
    /// Bounded window of lines around the marker line.
    pub context: Vec<String>,
    /// 1-based line number of `context[0]`.
    pub context_start_line: u32,
    /// Analyzer rule that reported the site.
    pub rule_id: String,
    pub content_hash: Digest,
}

impl EscapeSite {
    /// Stable identity across runs: ignores line numbers so that edits to other
    /// parts of the file do not change it.
    pub fn compute_hash(path: &Path, kind: ConstructKind, line_text: &str, column: u32) -> Digest {
        let trimmed = line_text.trim_start();
        let indent = line_text.chars().count() - trimmed.chars().count();
        let offset = (column as usize).saturating_sub(1).saturating_sub(indent);
        let path = path.to_string_lossy();
        let offset = offset.to_string();
        Digest::of_fields([
            path.as_bytes(),
            kind.as_str().as_bytes(),
            trimmed.trim_end().as_bytes(),
            offset.as_bytes(),
        ])
    }

    /// Identity of the `occurrence`-th site in a file sharing the same base
    /// hash (byte-identical annotated lines). Occurrence 0 keeps the base hash.
    pub fn nth_occurrence(base: Digest, occurrence: usize) -> Digest {
        if occurrence == 0 {
            return base;
        }
        let hex = base.to_hex();
        let nth = occurrence.to_string();
        Digest::of_fields([hex.as_bytes(), b"occurrence".as_slice(), nth.as_bytes()])
    }

    /// The context window as one string.
    pub fn context_text(&self) -> String {
        self.context.join("\n")
    }

    /// Index of the marker line inside `context`.
    pub fn line_index(&self) -> usize {
        self.span.line.saturating_sub(self.context_start_line) as usize
    }

    /// Text on the marker line before the marker.
    pub fn prefix(&self) -> &str {
        let col = char_to_byte(&self.line_text, self.span.column.saturating_sub(1) as usize);
        &self.line_text[..col]
    }

    /// Text on the marker line after the marker.
    pub fn suffix(&self) -> &str {
        let start = char_to_byte(&self.line_text, self.span.column.saturating_sub(1) as usize);
        let end = (start + self.marker.len()).min(self.line_text.len());
        &self.line_text[end..]
    }

    /// Comments attached to the site: a trailing comment on the marker line
    /// plus the contiguous run of comment lines directly above it.
    pub fn attached_comments(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if let Some(pos) = self.line_text.find("//") {
            out.push(&self.line_text[pos..]);
        }
        if let Some(pos) = self.line_text.find("/*") {
            out.push(&self.line_text[pos..]);
        }
        let mut idx = self.line_index().min(self.context.len());
        while idx > 0 {
            idx -= 1;
            let line = self.context[idx].trim();
            if is_comment_line(line) {
                out.push(line);
            } else {
                break;
            }
        }
        out
    }

    pub fn location(&self) -> String {
        format!(
            "{}:{}:{}",
            self.path.display(),
            self.span.line,
            self.span.column
        )
    }
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with("//") || line.starts_with("/*") || line.starts_with('*') || line.ends_with("*/")
}

/// Byte offset of the `n`-th char, clamped to the string length.
pub(crate) fn char_to_byte(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}
