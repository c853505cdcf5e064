//! Analyzer output parsing.
//!
//! Two shapes are understood and auto-detected:
//! - ESLint JSON (`--format json`): an array of file results with `messages`
//! - line-oriented text from the compiler (`file(l,c): error TS…: msg`,
//!   `file:l:c - error TS…: msg`) or ESLint's `unix` formatter
//!   (`file:l:c: msg [Error/rule-id]`)

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::domain::error::CollectionError;

/// One diagnostic record as reported by the analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDiagnostic {
    pub file: PathBuf,
    /// 1-based.
    pub line: u32,
    /// 1-based, in characters.
    pub column: u32,
    pub rule_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintFileResult {
    file_path: String,
    #[serde(default)]
    messages: Vec<EslintMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintMessage {
    rule_id: Option<String>,
    #[serde(default)]
    message: String,
    line: Option<u32>,
    column: Option<u32>,
}

/// Parse analyzer stdout into diagnostics.
///
/// Empty output means a clean tree. Non-empty text in which no line has a
/// known shape is `Unparseable`: a misconfigured formatter must not read as
/// zero escapes.
pub fn parse_output(stdout: &str) -> Result<Vec<RawDiagnostic>, CollectionError> {
    let trimmed = stdout.trim_start();
    if trimmed.starts_with('[') {
        return parse_eslint_json(trimmed);
    }

    let diagnostics = parse_text(stdout);
    if diagnostics.is_empty() {
        if let Some(first) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
            return Err(CollectionError::Unparseable(format!(
                "no diagnostics recognized in analyzer output (first line: {first:?})"
            )));
        }
    }
    Ok(diagnostics)
}

/// Parse ESLint's JSON formatter output.
pub fn parse_eslint_json(json: &str) -> Result<Vec<RawDiagnostic>, CollectionError> {
    let files: Vec<EslintFileResult> =
        serde_json::from_str(json).map_err(|e| CollectionError::Unparseable(e.to_string()))?;

    let mut out = Vec::new();
    for file in files {
        for msg in file.messages {
            // Fatal parse errors carry no position and no rule.
            let (Some(line), Some(column)) = (msg.line, msg.column) else {
                continue;
            };
            out.push(RawDiagnostic {
                file: PathBuf::from(&file.file_path),
                line,
                column,
                rule_id: msg.rule_id,
                message: msg.message,
            });
        }
    }
    Ok(out)
}

fn text_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(
                r"^(?P<file>.+?)\((?P<line>\d+),(?P<col>\d+)\): (?:error|warning) (?P<code>TS\d+): (?P<msg>.*)$",
            )
            .expect("valid compiler pattern"),
            Regex::new(
                r"^(?P<file>.+?):(?P<line>\d+):(?P<col>\d+) - (?:error|warning) (?P<code>TS\d+): (?P<msg>.*)$",
            )
            .expect("valid pretty compiler pattern"),
            Regex::new(
                r"^(?P<file>.+?):(?P<line>\d+):(?P<col>\d+): (?P<msg>.*) \[(?:Error|Warning)/(?P<code>[^\]]+)\]$",
            )
            .expect("valid unix pattern"),
        ]
    })
}

/// Parse line-oriented diagnostics; lines in no known shape are ignored.
pub fn parse_text(text: &str) -> Vec<RawDiagnostic> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        for pattern in text_patterns() {
            let Some(caps) = pattern.captures(line) else {
                continue;
            };
            let (Ok(l), Ok(c)) = (caps["line"].parse(), caps["col"].parse()) else {
                continue;
            };
            out.push(RawDiagnostic {
                file: PathBuf::from(caps["file"].trim()),
                line: l,
                column: c,
                rule_id: Some(caps["code"].to_string()),
                message: caps["msg"].to_string(),
            });
            break;
        }
    }
    out
}
