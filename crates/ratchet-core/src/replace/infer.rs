//! Type inference from the text around a site.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::domain::site::EscapeSite;

fn binding_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([A-Za-z_$][\w$]*)\s*[?!]?\s*:\s*$").expect("valid binding pattern"))
}

fn constructor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^new\s+([A-Z][\w$]*)\s*\(").expect("valid constructor pattern"))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^-?(0[xXoObB][0-9a-fA-F_]+|\d[\d_]*(\.\d+)?([eE][+-]?\d+)?)(n)?\b")
            .expect("valid number pattern")
    })
}

fn type_param_default_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[<,]\s*[A-Z][\w$]*(\s+extends\s+[^=<>]+)?\s*=\s*$")
            .expect("valid type parameter pattern")
    })
}

/// Name bound by the annotation, e.g. `payload` in `function f(payload: any)`.
pub fn binding_name(prefix: &str) -> Option<&str> {
    binding_re()
        .captures(prefix.trim_end())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Whether the marker is the default of a type parameter (`<T = any>`).
pub fn is_type_param_default(prefix: &str) -> bool {
    type_param_default_re().is_match(prefix.trim_end())
}

/// Whether the text after the marker continues a double cast (`as any as T`).
pub fn continues_cast(suffix: &str) -> bool {
    suffix
        .trim_start()
        .strip_prefix("as")
        .is_some_and(|rest| rest.starts_with(char::is_whitespace))
}

/// Type of a literal initializer following the marker, e.g. ` = 42;` gives `number`.
pub fn literal_type(suffix: &str) -> Option<String> {
    let rest = suffix.trim_start().strip_prefix('=')?;
    if rest.starts_with(['=', '>']) {
        return None;
    }
    let value = rest.trim_start();
    let first = value.chars().next()?;

    let ty = match first {
        '"' | '\'' | '`' => "string".to_string(),
        '[' => "unknown[]".to_string(),
        '{' => "Record<string, unknown>".to_string(),
        _ if value.starts_with("true") || value.starts_with("false") => {
            let word = if value.starts_with("true") { "true" } else { "false" };
            if value[word.len()..].starts_with(|c: char| c.is_alphanumeric() || c == '_' || c == '$') {
                return None;
            }
            "boolean".to_string()
        }
        '-' | '0'..='9' => {
            let caps = number_re().captures(value)?;
            if caps.get(4).is_some() {
                "bigint".to_string()
            } else {
                "number".to_string()
            }
        }
        'n' => constructor_re().captures(value)?.get(1)?.as_str().to_string(),
        _ => return None,
    };
    Some(ty)
}

/// Distinct types the bound name flows into within the context window:
/// `: T = name` assignments and `name as T` casts. The marker line is skipped.
pub fn usage_types(site: &EscapeSite, name: &str) -> BTreeSet<String> {
    let name = regex::escape(name);
    let patterns = [
        format!(r":\s*([A-Za-z_$][\w$.]*(?:<[^=;]*?>)?(?:\[\])*)\s*=\s*{name}\s*[;,)]"),
        format!(r"\b{name}\s+as\s+([A-Za-z_$][\w$.]*(?:<[^;]*?>)?(?:\[\])*)"),
    ];
    let mut found = BTreeSet::new();
    let marker_idx = site.line_index();
    for pattern in patterns {
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        for (idx, line) in site.context.iter().enumerate() {
            if idx == marker_idx {
                continue;
            }
            for caps in re.captures_iter(line) {
                if let Some(ty) = caps.get(1) {
                    let ty = ty.as_str().trim();
                    if !matches!(ty, "any" | "unknown" | "const") {
                        found.insert(ty.to_string());
                    }
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::domain::site::{ConstructKind, SourceSpan};

    #[test]
    fn literal_types_are_recognized() {
        let cases = [
            (" = 'hello';", Some("string")),
            (" = `tpl ${x}`;", Some("string")),
            (" = 42;", Some("number")),
            (" = -3.5;", Some("number")),
            (" = 0xff;", Some("number")),
            (" = 10n;", Some("bigint")),
            (" = true;", Some("boolean")),
            (" = [];", Some("unknown[]")),
            (" = {};", Some("Record<string, unknown>")),
            (" = new Map();", Some("Map")),
            (" = trueish;", None),
            (" = load();", None),
            (" => x", None),
            (";", None),
        ];
        for (suffix, expected) in cases {
            assert_eq!(literal_type(suffix).as_deref(), expected, "suffix: {suffix:?}");
        }
    }

    #[test]
    fn binding_names_are_extracted() {
        assert_eq!(binding_name("function f(payload: "), Some("payload"));
        assert_eq!(binding_name("  let result?: "), Some("result"));
        assert_eq!(binding_name("const x!: "), Some("x"));
        assert_eq!(binding_name("function f(): "), None);
    }

    #[test]
    fn double_cast_and_defaults_are_detected() {
        assert!(continues_cast(" as User;"));
        assert!(!continues_cast(";"));
        assert!(!continues_cast(" assert();"));
        assert!(is_type_param_default("function id<T = "));
        assert!(is_type_param_default("class Box<K, V extends object = "));
        assert!(!is_type_param_default("const m: Record<string, "));
    }

    #[test]
    fn usage_types_scan_context_but_not_marker_line() {
        let context = [
            "function handle(payload: any) {",
            "  const user: User = payload;",
            "  const again = payload as User;",
            "  const loose: any = payload;",
            "}",
        ];
        let site = EscapeSite {
            path: PathBuf::from("src/h.ts"),
            span: SourceSpan {
                start: 25,
                end: 28,
                line: 1,
                column: 26,
            },
            kind: ConstructKind::Parameter,
            marker: "any".to_string(),
            line_text: context[0].to_string(),
            context: context.iter().map(|s| s.to_string()).collect(),
            context_start_line: 1,
            rule_id: "no-explicit-any".to_string(),
            content_hash: crate::cas::Digest::compute(b"h"),
        };
        let types = usage_types(&site, "payload");
        assert_eq!(types.into_iter().collect::<Vec<_>>(), vec!["User".to_string()]);
    }
}
