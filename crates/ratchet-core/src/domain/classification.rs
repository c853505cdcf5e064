//! Classification verdicts.

use serde::{Deserialize, Serialize};

/// Whether an escape annotation was a deliberate choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Documented escape hatch; leave it alone.
    Intentional,
    /// Typing debt; eligible for replacement.
    Unintentional,
    /// Not enough signal; routed to manual review.
    Unknown,
}

impl Verdict {
    /// Preference when support is tied: the more conservative verdict wins.
    pub(crate) fn tie_rank(self) -> u8 {
        match self {
            Verdict::Intentional => 2,
            Verdict::Unknown => 1,
            Verdict::Unintentional => 0,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Verdict::Intentional => "intentional",
            Verdict::Unintentional => "unintentional",
            Verdict::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Outcome of classifying one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub verdict: Verdict,
    /// Confidence in 0.0–1.0.
    pub confidence: f64,
    /// Ids of every rule that matched, in rule-table order.
    pub matched_rules: Vec<String>,
    pub rationale: String,
}

impl Classification {
    pub fn unknown(rationale: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Unknown,
            confidence: 0.0,
            matched_rules: Vec::new(),
            rationale: rationale.into(),
        }
    }

    /// Eligible for replacement at `threshold`.
    pub fn is_actionable(&self, threshold: f64) -> bool {
        self.verdict == Verdict::Unintentional && self.confidence >= threshold
    }
}
