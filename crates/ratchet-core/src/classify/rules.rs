//! Data-driven classification rules.
//!
//! Rules are plain serde data so extra rules can be loaded from TOML:
//!
//! ```toml
//! [[rules]]
//! id = "vendored-shim"
//! verdict = "intentional"
//! weight = 0.9
//! rationale = "vendored shims mirror untyped upstream code"
//! predicate = { kind = "path_matches", pattern = "^vendor/" }
//! ```

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::classification::Verdict;
use crate::domain::error::{RatchetError, Result};
use crate::domain::site::{ConstructKind, EscapeSite};

/// Condition over a site. Regex patterns use the `regex` crate syntax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Site construct is one of `kinds`.
    ConstructIs { kinds: Vec<ConstructKind> },
    /// The marker line matches.
    LineMatches { pattern: String },
    /// Any line of the context window matches.
    ContextMatches { pattern: String },
    /// A comment on the marker line, or directly above it, matches.
    CommentMatches { pattern: String },
    /// The workspace-relative path (with `/` separators) matches.
    PathMatches { pattern: String },
    All { of: Vec<Predicate> },
    Any { of: Vec<Predicate> },
    Not { of: Box<Predicate> },
}

/// One row of the rule table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub verdict: Verdict,
    /// Strength of the signal in 0.0–1.0.
    pub weight: f64,
    pub predicate: Predicate,
    pub rationale: String,
}

impl Rule {
    fn new(id: &str, verdict: Verdict, weight: f64, predicate: Predicate, rationale: &str) -> Self {
        Self {
            id: id.to_string(),
            verdict,
            weight,
            predicate,
            rationale: rationale.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<Rule>,
}

#[derive(Debug)]
enum Compiled {
    ConstructIs(Vec<ConstructKind>),
    Line(Regex),
    Context(Regex),
    Comment(Regex),
    Path(Regex),
    All(Vec<Compiled>),
    Any(Vec<Compiled>),
    Not(Box<Compiled>),
}

impl Compiled {
    fn build(rule_id: &str, predicate: &Predicate) -> Result<Self> {
        let re = |pattern: &str| {
            Regex::new(pattern).map_err(|e| RatchetError::InvalidRule {
                id: rule_id.to_string(),
                reason: e.to_string(),
            })
        };
        let many = |preds: &[Predicate]| {
            preds
                .iter()
                .map(|p| Compiled::build(rule_id, p))
                .collect::<Result<Vec<_>>>()
        };
        Ok(match predicate {
            Predicate::ConstructIs { kinds } => Compiled::ConstructIs(kinds.clone()),
            Predicate::LineMatches { pattern } => Compiled::Line(re(pattern)?),
            Predicate::ContextMatches { pattern } => Compiled::Context(re(pattern)?),
            Predicate::CommentMatches { pattern } => Compiled::Comment(re(pattern)?),
            Predicate::PathMatches { pattern } => Compiled::Path(re(pattern)?),
            Predicate::All { of } => Compiled::All(many(of)?),
            Predicate::Any { of } => Compiled::Any(many(of)?),
            Predicate::Not { of } => Compiled::Not(Box::new(Compiled::build(rule_id, of)?)),
        })
    }

    fn eval(&self, site: &SiteView<'_>) -> bool {
        match self {
            Compiled::ConstructIs(kinds) => kinds.contains(&site.kind),
            Compiled::Line(re) => re.is_match(site.line),
            Compiled::Context(re) => re.is_match(&site.context),
            Compiled::Comment(re) => site.comments.iter().any(|c| re.is_match(c)),
            Compiled::Path(re) => re.is_match(&site.path),
            Compiled::All(of) => of.iter().all(|p| p.eval(site)),
            Compiled::Any(of) => of.iter().any(|p| p.eval(site)),
            Compiled::Not(of) => !of.eval(site),
        }
    }
}

/// The parts of a site predicates look at, computed once per site.
pub(crate) struct SiteView<'a> {
    kind: ConstructKind,
    line: &'a str,
    context: String,
    comments: Vec<&'a str>,
    path: String,
}

impl<'a> SiteView<'a> {
    pub(crate) fn new(site: &'a EscapeSite) -> Self {
        Self {
            kind: site.kind,
            line: &site.line_text,
            context: site.context_text(),
            comments: site.attached_comments(),
            path: site.path.to_string_lossy().replace('\\', "/"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct CompiledRule {
    pub(crate) rule: Rule,
    predicate: Compiled,
}

impl CompiledRule {
    pub(crate) fn matches(&self, site: &SiteView<'_>) -> bool {
        self.predicate.eval(site)
    }
}

/// Ordered, compiled rule table.
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Validate and compile `rules`, keeping their order.
    pub fn compile(rules: Vec<Rule>) -> Result<Self> {
        let mut ids = HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            if !ids.insert(rule.id.clone()) {
                return Err(RatchetError::InvalidRule {
                    id: rule.id,
                    reason: "duplicate rule id".to_string(),
                });
            }
            if !(0.0..=1.0).contains(&rule.weight) {
                return Err(RatchetError::InvalidRule {
                    id: rule.id,
                    reason: format!("weight {} outside 0.0..=1.0", rule.weight),
                });
            }
            let predicate = Compiled::build(&rule.id, &rule.predicate)?;
            compiled.push(CompiledRule { rule, predicate });
        }
        Ok(Self { rules: compiled })
    }

    /// The built-in table.
    pub fn builtin() -> Result<Self> {
        Self::compile(default_rules())
    }

    /// Built-in rules with `extra` merged in: a rule whose id matches a built-in
    /// replaces it in place, the rest are appended.
    pub fn with_overrides(extra: Vec<Rule>) -> Result<Self> {
        let mut rules = default_rules();
        for rule in extra {
            match rules.iter_mut().find(|r| r.id == rule.id) {
                Some(slot) => *slot = rule,
                None => rules.push(rule),
            }
        }
        Self::compile(rules)
    }

    /// Parse a `[[rules]]` TOML document.
    pub fn parse_toml(text: &str) -> Result<Vec<Rule>> {
        let file: RuleFile =
            toml::from_str(text).map_err(|e| RatchetError::Config(format!("rules: {e}")))?;
        Ok(file.rules)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.rule.id.as_str())
    }
}

fn construct(kinds: &[ConstructKind]) -> Predicate {
    Predicate::ConstructIs {
        kinds: kinds.to_vec(),
    }
}

fn line(pattern: &str) -> Predicate {
    Predicate::LineMatches {
        pattern: pattern.to_string(),
    }
}

fn context(pattern: &str) -> Predicate {
    Predicate::ContextMatches {
        pattern: pattern.to_string(),
    }
}

fn comment(pattern: &str) -> Predicate {
    Predicate::CommentMatches {
        pattern: pattern.to_string(),
    }
}

fn path(pattern: &str) -> Predicate {
    Predicate::PathMatches {
        pattern: pattern.to_string(),
    }
}

const DOUBLE_CAST: &str = r"\bas\s+any\s+as\s+[\w$]";

/// The default rule table, strongest intentional signals first.
pub fn default_rules() -> Vec<Rule> {
    use ConstructKind::*;
    use Verdict::*;

    vec![
        Rule::new(
            "suppression-comment",
            Intentional,
            0.95,
            comment(
                r"(?i)eslint-disable(-next-line|-line)?\b.*no-explicit-any|@ts-expect-error|@ts-ignore|intentional(ly)?\s+any",
            ),
            "explicitly suppressed escape annotation",
        ),
        Rule::new(
            "declaration-file",
            Intentional,
            0.9,
            path(r"\.d\.[cm]?ts$"),
            "ambient declaration file",
        ),
        Rule::new(
            "documented-escape-hatch",
            Intentional,
            0.85,
            comment(r"(?i)escape[- ]hatch|deliberate(ly)?|on purpose|untyped (library|lib|module|dependency|api)|any-ok"),
            "documented escape hatch",
        ),
        Rule::new(
            "catch-binding",
            Unintentional,
            0.95,
            Predicate::All {
                of: vec![
                    construct(&[CatchBinding]),
                    Predicate::Not {
                        of: Box::new(context(r"\binstanceof\b")),
                    },
                ],
            },
            "catch binding typed as any without narrowing",
        ),
        Rule::new(
            "double-cast",
            Unintentional,
            0.9,
            Predicate::All {
                of: vec![construct(&[Cast]), line(DOUBLE_CAST)],
            },
            "double cast through any",
        ),
        Rule::new(
            "unbounded-generic",
            Unknown,
            0.7,
            Predicate::All {
                of: vec![
                    construct(&[GenericArgument]),
                    line(r"[<,]\s*[A-Z][\w$]*(\s+extends\s+[^=<>]+)?\s*=\s*any\b"),
                ],
            },
            "type parameter defaulting to any",
        ),
        Rule::new(
            "literal-initializer",
            Unintentional,
            0.85,
            Predicate::All {
                of: vec![
                    construct(&[Variable]),
                    line(r#":\s*any\s*=\s*(["'`\[{]|-?\d|true\b|false\b|new\s+[A-Z])"#),
                ],
            },
            "initialized from a literal with an obvious type",
        ),
        Rule::new(
            "generic-container",
            Unintentional,
            0.75,
            line(r"Record<\s*[\w$]+\s*,\s*any\s*>|Array<\s*any\s*>|Promise<\s*any\s*>|\bany\s*\[\]"),
            "container element typed as any",
        ),
        Rule::new(
            "external-api-flow",
            Unintentional,
            0.7,
            context(r"\bJSON\.parse\s*\(|\bfetch\s*\(|\.json\s*\(\s*\)"),
            "value flows in from an external API",
        ),
        Rule::new(
            "test-file",
            Intentional,
            0.6,
            path(r"\.(test|spec)\.[cm]?[jt]sx?$|(^|/)(__tests__|__mocks__|tests?|mocks?|fixtures)/|\.mock\.[cm]?[jt]sx?$"),
            "test or mock code",
        ),
        Rule::new(
            "initialized-variable",
            Unintentional,
            0.65,
            Predicate::All {
                of: vec![construct(&[Variable]), line(r":\s*any\s*=[^=>]")],
            },
            "initialized variable whose type can be inferred",
        ),
        Rule::new(
            "return-type",
            Unintentional,
            0.6,
            construct(&[ReturnType]),
            "return type declared as any",
        ),
        Rule::new(
            "parameter",
            Unintentional,
            0.55,
            construct(&[Parameter]),
            "parameter declared as any",
        ),
        Rule::new(
            "plain-cast",
            Unintentional,
            0.5,
            Predicate::All {
                of: vec![
                    construct(&[Cast]),
                    Predicate::Not {
                        of: Box::new(line(DOUBLE_CAST)),
                    },
                ],
            },
            "cast to any",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_rules_compile_in_order() {
        let set = RuleSet::builtin().unwrap();
        assert_eq!(set.len(), 14);
        let ids: Vec<_> = set.ids().collect();
        assert_eq!(ids[0], "suppression-comment");
        assert_eq!(ids[13], "plain-cast");
    }

    #[test]
    fn bad_regex_is_invalid_rule() {
        let rule = Rule::new("broken", Verdict::Unknown, 0.5, line("(unclosed"), "x");
        match RuleSet::compile(vec![rule]) {
            Err(RatchetError::InvalidRule { id, .. }) => assert_eq!(id, "broken"),
            other => panic!("expected InvalidRule, got {other:?}"),
        }
    }

    #[test]
    fn weight_out_of_range_is_rejected() {
        let rule = Rule::new("heavy", Verdict::Unknown, 1.5, line("x"), "x");
        assert!(RuleSet::compile(vec![rule]).is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let a = Rule::new("dup", Verdict::Unknown, 0.5, line("x"), "x");
        assert!(RuleSet::compile(vec![a.clone(), a]).is_err());
    }

    #[test]
    fn toml_rules_override_builtin_by_id() {
        let text = r#"
            [[rules]]
            id = "parameter"
            verdict = "unintentional"
            weight = 0.8
            rationale = "parameters are always debt here"
            predicate = { kind = "construct_is", kinds = ["parameter"] }

            [[rules]]
            id = "vendored"
            verdict = "intentional"
            weight = 0.9
            rationale = "vendored code"

            [rules.predicate]
            kind = "path_matches"
            pattern = "^vendor/"
        "#;
        let extra = RuleSet::parse_toml(text).unwrap();
        assert_eq!(extra.len(), 2);

        let set = RuleSet::with_overrides(extra).unwrap();
        assert_eq!(set.len(), 15);
        let param = set.iter().find(|r| r.rule.id == "parameter").unwrap();
        assert_eq!(param.rule.weight, 0.8);
        assert_eq!(set.ids().last(), Some("vendored"));
    }

    #[test]
    fn nested_predicates_deserialize() {
        let json = serde_json::json!({
            "kind": "all",
            "of": [
                { "kind": "path_matches", "pattern": "^vendor/" },
                { "kind": "not", "of": { "kind": "line_matches", "pattern": "TODO" } }
            ]
        });
        let pred: Predicate = serde_json::from_value(json).unwrap();
        match pred {
            Predicate::All { of } => {
                assert_eq!(of.len(), 2);
                assert!(matches!(of[1], Predicate::Not { .. }));
            }
            other => panic!("expected All, got {other:?}"),
        }
    }
}
