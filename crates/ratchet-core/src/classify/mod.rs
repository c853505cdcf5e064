//! Classification engine: decides whether an escape annotation is deliberate.
//!
//! Every rule is evaluated against the site. A single strong match
//! (weight >= `decisive_weight`) settles the verdict on its own; otherwise the
//! matches vote with their weights. Ties and weak results resolve towards the
//! verdict that touches less code.

pub mod rules;

use std::cmp::Ordering;
use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::domain::classification::{Classification, Verdict};
use crate::domain::error::{RatchetError, Result};
use crate::domain::site::EscapeSite;

pub use rules::{default_rules, Predicate, Rule, RuleSet};
use rules::{CompiledRule, SiteView};

/// Supports and weights closer than this are treated as equal.
const WEIGHT_EPSILON: f64 = 1e-9;

fn cmp_weight(a: f64, b: f64) -> Ordering {
    if (a - b).abs() < WEIGHT_EPSILON {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

/// Thresholds used when turning rule matches into a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Weight at which one match decides the verdict alone.
    pub decisive_weight: f64,
    /// Below this confidence the verdict becomes `Unknown`.
    pub min_confidence: f64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            decisive_weight: 0.9,
            min_confidence: 0.5,
        }
    }
}

impl ClassifierSettings {
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("decisive_weight", self.decisive_weight),
            ("min_confidence", self.min_confidence),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(RatchetError::Config(format!("{name} must be within 0.0..=1.0, got {v}")));
            }
        }
        Ok(())
    }
}

pub struct ClassificationEngine {
    rules: RuleSet,
    settings: ClassifierSettings,
}

impl ClassificationEngine {
    pub fn new(rules: RuleSet, settings: ClassifierSettings) -> Self {
        Self { rules, settings }
    }

    /// Engine over the built-in rule table with default thresholds.
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(RuleSet::builtin()?, ClassifierSettings::default()))
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Classify one site. Pure: the same site and rules give the same result.
    pub fn classify(&self, site: &EscapeSite) -> Classification {
        let view = SiteView::new(site);
        let matched: Vec<&CompiledRule> = self.rules.iter().filter(|r| r.matches(&view)).collect();
        let classification = self.decide(&matched);
        trace!(
            site = %site.location(),
            verdict = %classification.verdict,
            confidence = classification.confidence,
            "classified"
        );
        classification
    }

    /// Classify many sites in parallel; output order follows input order.
    pub fn classify_all(&self, sites: &[EscapeSite]) -> Vec<Classification> {
        sites.par_iter().map(|s| self.classify(s)).collect()
    }

    fn decide(&self, matched: &[&CompiledRule]) -> Classification {
        if matched.is_empty() {
            return Classification::unknown("no rule matched");
        }
        let matched_rules: Vec<String> = matched.iter().map(|r| r.rule.id.clone()).collect();

        if let Some(decisive) = self.decisive(matched) {
            return self.finish(
                decisive.rule.verdict,
                decisive.rule.weight,
                matched_rules,
                decisive.rule.rationale.clone(),
            );
        }

        let mut support: HashMap<Verdict, f64> = HashMap::new();
        for r in matched {
            *support.entry(r.rule.verdict).or_default() += r.rule.weight;
        }
        let total: f64 = support.values().sum();
        let (winner, winner_support) = support
            .iter()
            .map(|(v, s)| (*v, *s))
            .max_by(|(va, sa), (vb, sb)| {
                cmp_weight(*sa, *sb).then_with(|| va.tie_rank().cmp(&vb.tie_rank()))
            })
            .unwrap_or((Verdict::Unknown, 0.0));

        let backing: Vec<&&CompiledRule> = matched.iter().filter(|r| r.rule.verdict == winner).collect();
        let sum_sq: f64 = backing.iter().map(|r| r.rule.weight * r.rule.weight).sum();
        let mut confidence = if winner_support > 0.0 {
            sum_sq / winner_support
        } else {
            0.0
        };
        if winner == Verdict::Unintentional && winner_support < total {
            confidence *= winner_support / total;
        }

        let rationale = backing
            .iter()
            .map(|r| r.rule.rationale.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        self.finish(winner, confidence, matched_rules, rationale)
    }

    /// First decisive match, yielding to an `Intentional` match of equal weight.
    fn decisive<'r>(&self, matched: &[&'r CompiledRule]) -> Option<&'r CompiledRule> {
        let first = *matched
            .iter()
            .find(|r| r.rule.weight >= self.settings.decisive_weight)?;
        if first.rule.verdict == Verdict::Intentional {
            return Some(first);
        }
        let intentional = matched.iter().find(|r| {
            r.rule.verdict == Verdict::Intentional
                && r.rule.weight >= self.settings.decisive_weight
                && cmp_weight(r.rule.weight, first.rule.weight) == Ordering::Equal
        });
        Some(intentional.copied().unwrap_or(first))
    }

    fn finish(
        &self,
        verdict: Verdict,
        confidence: f64,
        matched_rules: Vec<String>,
        rationale: String,
    ) -> Classification {
        let confidence = confidence.clamp(0.0, 1.0);
        if confidence < self.settings.min_confidence {
            return Classification {
                verdict: Verdict::Unknown,
                confidence,
                matched_rules,
                rationale: format!("weak signal ({confidence:.2}): {rationale}"),
            };
        }
        Classification {
            verdict,
            confidence,
            matched_rules,
            rationale,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::domain::site::{ConstructKind, SourceSpan};

    fn site_at(path: &str, kind: ConstructKind, context: &[&str], line_idx: usize) -> EscapeSite {
        let line_text = context[line_idx].to_string();
        let column = line_text.find("any").map(|c| c as u32 + 1).unwrap_or(1);
        let path = PathBuf::from(path);
        EscapeSite {
            content_hash: EscapeSite::compute_hash(&path, kind, &line_text, column),
            path,
            span: SourceSpan {
                start: 0,
                end: 3,
                line: line_idx as u32 + 1,
                column,
            },
            kind,
            marker: "any".to_string(),
            line_text,
            context: context.iter().map(|s| s.to_string()).collect(),
            context_start_line: 1,
            rule_id: "@typescript-eslint/no-explicit-any".to_string(),
        }
    }

    fn engine() -> ClassificationEngine {
        ClassificationEngine::builtin().unwrap()
    }

    #[test]
    fn suppressed_site_is_intentional() {
        let s = site_at(
            "src/legacy.ts",
            ConstructKind::Variable,
            &[
                "// eslint-disable-next-line @typescript-eslint/no-explicit-any",
                "const legacy_001: any = 1;",
            ],
            1,
        );
        let c = engine().classify(&s);
        assert_eq!(c.verdict, Verdict::Intentional);
        assert_eq!(c.confidence, 0.95);
        assert_eq!(c.matched_rules[0], "suppression-comment");
    }

    #[test]
    fn catch_binding_is_decisively_unintentional() {
        let s = site_at(
            "src/api.ts",
            ConstructKind::CatchBinding,
            &["try {", "  run();", "} catch (err: any) {", "  log(err.message);", "}"],
            2,
        );
        let c = engine().classify(&s);
        assert_eq!(c.verdict, Verdict::Unintentional);
        assert_eq!(c.confidence, 0.95);
    }

    #[test]
    fn literal_initializer_blends_above_threshold() {
        let s = site_at("src/mod_07.ts", ConstructKind::Variable, &["const value_07: any = 7;"], 0);
        let c = engine().classify(&s);
        assert_eq!(c.verdict, Verdict::Unintentional);
        assert_eq!(c.matched_rules, vec!["literal-initializer", "initialized-variable"]);
        // (0.85² + 0.65²) / 1.5
        assert!((c.confidence - 0.763_333).abs() < 1e-4);
        assert!(c.is_actionable(0.7));
    }

    #[test]
    fn opposing_signals_scale_unintentional_confidence() {
        let s = site_at(
            "src/handlers/user.test.ts",
            ConstructKind::Variable,
            &["const fixture: any = 'alice';"],
            0,
        );
        let c = engine().classify(&s);
        // Unintentional support 1.5 beats intentional 0.6 but is scaled by 1.5 / 2.1.
        assert_eq!(c.verdict, Verdict::Unintentional);
        assert!((c.confidence - 0.763_333 * 1.5 / 2.1).abs() < 1e-4);
        assert!(!c.is_actionable(0.7));
    }

    #[test]
    fn no_match_is_unknown() {
        let s = site_at("src/types.ts", ConstructKind::Other, &["type Loose = any;"], 0);
        let c = engine().classify(&s);
        assert_eq!(c.verdict, Verdict::Unknown);
        assert!(c.matched_rules.is_empty());
    }

    #[test]
    fn weak_signal_becomes_unknown() {
        let s = site_at("src/a.ts", ConstructKind::Cast, &["const y = x as any;"], 0);
        let engine = ClassificationEngine::new(
            RuleSet::builtin().unwrap(),
            ClassifierSettings {
                min_confidence: 0.6,
                ..Default::default()
            },
        );
        let c = engine.classify(&s);
        assert_eq!(c.verdict, Verdict::Unknown);
        assert_eq!(c.matched_rules, vec!["plain-cast"]);
    }

    #[test]
    fn equal_decisive_weights_prefer_intentional() {
        let rules = RuleSet::compile(vec![
            Rule {
                id: "strong-debt".into(),
                verdict: Verdict::Unintentional,
                weight: 0.95,
                predicate: Predicate::ConstructIs {
                    kinds: vec![ConstructKind::Parameter],
                },
                rationale: "debt".into(),
            },
            Rule {
                id: "strong-hatch".into(),
                verdict: Verdict::Intentional,
                weight: 0.95,
                predicate: Predicate::PathMatches {
                    pattern: "^shims/".into(),
                },
                rationale: "hatch".into(),
            },
        ])
        .unwrap();
        let engine = ClassificationEngine::new(rules, ClassifierSettings::default());
        let s = site_at("shims/dom.ts", ConstructKind::Parameter, &["function f(x: any) {}"], 0);
        let c = engine.classify(&s);
        assert_eq!(c.verdict, Verdict::Intentional);
        assert_eq!(c.rationale, "hatch");
    }

    #[test]
    fn classify_all_preserves_order() {
        let a = site_at("src/a.ts", ConstructKind::CatchBinding, &["} catch (e: any) {"], 0);
        let b = site_at("src/b.d.ts", ConstructKind::Variable, &["declare const b: any;"], 0);
        let out = engine().classify_all(&[a, b]);
        assert_eq!(out[0].verdict, Verdict::Unintentional);
        assert_eq!(out[1].verdict, Verdict::Intentional);
    }

    #[test]
    fn settings_are_validated() {
        let bad = ClassifierSettings {
            decisive_weight: 1.2,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(ClassifierSettings::default().validate().is_ok());
    }
}
