//! Replacement candidates and the text edits that carry them.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::cas::Digest;

/// Estimated chance that applying a candidate breaks the build.
///
/// Ordered so that sorting ascending puts the safest edits first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Pure narrowing, e.g. a catch binding.
    Low,
    /// Inferred from a single usage.
    Medium,
    /// Inferred from ambiguous, multi-usage context or widened blindly.
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the replacement type was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStrategy {
    ErrorNarrowing,
    DoubleCastNarrowing,
    LiteralInference,
    UsageInference,
    SafeDefault,
}

impl std::fmt::Display for SynthesisStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SynthesisStrategy::ErrorNarrowing => "error_narrowing",
            SynthesisStrategy::DoubleCastNarrowing => "double_cast_narrowing",
            SynthesisStrategy::LiteralInference => "literal_inference",
            SynthesisStrategy::UsageInference => "usage_inference",
            SynthesisStrategy::SafeDefault => "safe_default",
        };
        f.write_str(s)
    }
}

/// Condition the edit must satisfy to be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    /// The workspace must type-check after application.
    TypeChecks,
}

/// Minimal, localized replacement of one byte range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub path: PathBuf,
    pub start: usize,
    pub end: usize,
    /// Text that must currently occupy `start..end`.
    pub expected: String,
    pub replacement: String,
}

impl TextEdit {
    /// Whether `content` still holds the expected text at this edit's range.
    pub fn matches(&self, content: &str) -> bool {
        content.get(self.start..self.end) == Some(self.expected.as_str())
    }
}

/// A proposed fix for one site. At most one is applied per site per batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacementCandidate {
    pub site_hash: Digest,
    pub replacement: String,
    pub strategy: SynthesisStrategy,
    pub risk: RiskLevel,
    pub precondition: Precondition,
    pub edit: TextEdit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_orders_low_first() {
        let mut risks = vec![RiskLevel::High, RiskLevel::Low, RiskLevel::Medium];
        risks.sort();
        assert_eq!(risks, vec![RiskLevel::Low, RiskLevel::Medium, RiskLevel::High]);
    }

    #[test]
    fn edit_detects_stale_content() {
        let edit = TextEdit {
            path: PathBuf::from("a.ts"),
            start: 7,
            end: 10,
            expected: "any".to_string(),
            replacement: "number".to_string(),
        };
        assert!(edit.matches("let x: any = 1;"));
        assert!(!edit.matches("let x: number = 1;"));
        assert!(!edit.matches("let"));
    }
}
