//! Replacement engine: proposes a concrete type for unintentional escapes.
//!
//! Strategies are tried from most to least precise. When nothing precise is
//! available the engine either widens to `unknown` (for positions where a
//! value flows in) or declines and leaves the site for manual review.

pub mod edit;
pub mod infer;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::candidate::{
    Precondition, ReplacementCandidate, RiskLevel, SynthesisStrategy, TextEdit,
};
use crate::domain::classification::Classification;
use crate::domain::site::{ConstructKind, EscapeSite};

pub use edit::{render, EditError};

/// Result of asking the engine for a replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "proposal", rename_all = "snake_case")]
pub enum Proposal {
    Candidate(ReplacementCandidate),
    /// Synthesis declined; needs a human.
    Manual { reason: String },
    /// Not unintentional, or not confident enough to touch.
    NotEligible { reason: String },
}

impl Proposal {
    pub fn candidate(&self) -> Option<&ReplacementCandidate> {
        match self {
            Proposal::Candidate(c) => Some(c),
            _ => None,
        }
    }

    fn manual(reason: impl Into<String>) -> Self {
        Proposal::Manual {
            reason: reason.into(),
        }
    }
}

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone)]
pub struct ReplacementEngine {
    threshold: f64,
}

impl Default for ReplacementEngine {
    fn default() -> Self {
        Self::new(0.7)
    }
}

impl ReplacementEngine {
    /// `threshold` is the minimum classification confidence to act on.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn propose(&self, site: &EscapeSite, classification: &Classification) -> Proposal {
        if !classification.is_actionable(self.threshold) {
            return Proposal::NotEligible {
                reason: format!(
                    "{} at confidence {:.2} (threshold {:.2})",
                    classification.verdict, classification.confidence, self.threshold
                ),
            };
        }

        let prefix = site.prefix();
        let suffix = site.suffix();
        let element_type = suffix.trim_start().starts_with('[');

        match site.kind {
            ConstructKind::CatchBinding => {
                self.candidate(site, UNKNOWN, SynthesisStrategy::ErrorNarrowing, RiskLevel::Low)
            }
            ConstructKind::Cast if infer::continues_cast(suffix) => self.candidate(
                site,
                UNKNOWN,
                SynthesisStrategy::DoubleCastNarrowing,
                RiskLevel::Low,
            ),
            ConstructKind::Cast => Proposal::manual("plain cast; target type needs a human"),
            ConstructKind::GenericArgument if infer::is_type_param_default(prefix) => {
                Proposal::manual("type parameter default; changing it affects every caller")
            }
            ConstructKind::GenericArgument => {
                self.candidate(site, UNKNOWN, SynthesisStrategy::SafeDefault, RiskLevel::Medium)
            }
            ConstructKind::Variable | ConstructKind::Parameter if element_type => {
                self.candidate(site, UNKNOWN, SynthesisStrategy::SafeDefault, RiskLevel::Medium)
            }
            ConstructKind::Variable | ConstructKind::Parameter => self.infer_binding(site, prefix, suffix),
            ConstructKind::ReturnType => {
                self.candidate(site, UNKNOWN, SynthesisStrategy::SafeDefault, RiskLevel::High)
            }
            ConstructKind::Property => Proposal::manual("property type; shape must be decided by hand"),
            ConstructKind::Other => Proposal::manual("unrecognized position"),
        }
    }

    /// Proposals for many sites in parallel; output order follows input order.
    pub fn propose_all(&self, sites: &[EscapeSite], classifications: &[Classification]) -> Vec<Proposal> {
        sites
            .par_iter()
            .zip(classifications.par_iter())
            .map(|(s, c)| self.propose(s, c))
            .collect()
    }

    fn infer_binding(&self, site: &EscapeSite, prefix: &str, suffix: &str) -> Proposal {
        if site.kind == ConstructKind::Variable {
            if let Some(ty) = infer::literal_type(suffix) {
                return self.candidate(site, &ty, SynthesisStrategy::LiteralInference, RiskLevel::Medium);
            }
        }
        if let Some(name) = infer::binding_name(prefix) {
            let usages = infer::usage_types(site, name);
            if usages.len() == 1 {
                if let Some(ty) = usages.first() {
                    return self.candidate(site, ty, SynthesisStrategy::UsageInference, RiskLevel::Medium);
                }
            }
        }
        self.candidate(site, UNKNOWN, SynthesisStrategy::SafeDefault, RiskLevel::High)
    }

    fn candidate(
        &self,
        site: &EscapeSite,
        replacement: &str,
        strategy: SynthesisStrategy,
        risk: RiskLevel,
    ) -> Proposal {
        let replacement = parenthesize_for_suffix(replacement, site.suffix());
        Proposal::Candidate(ReplacementCandidate {
            site_hash: site.content_hash,
            replacement: replacement.clone(),
            strategy,
            risk,
            precondition: Precondition::TypeChecks,
            edit: TextEdit {
                path: site.path.clone(),
                start: site.span.start,
                end: site.span.end,
                expected: site.marker.clone(),
                replacement,
            },
        })
    }
}

/// `A | B` followed by `[]` must become `(A | B)[]`.
fn parenthesize_for_suffix(replacement: &str, suffix: &str) -> String {
    let compound = replacement.contains('|') || replacement.contains('&');
    if compound && suffix.starts_with('[') {
        format!("({replacement})")
    } else {
        replacement.to_string()
    }
}
