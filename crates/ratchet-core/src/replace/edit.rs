//! Applying text edits to file content.

use thiserror::Error;

use crate::domain::candidate::TextEdit;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("stale edit at {start}..{end}: expected {expected:?}")]
    Stale {
        start: usize,
        end: usize,
        expected: String,
    },

    #[error("edits overlap at byte {0}")]
    Overlap(usize),
}

/// Apply `edits` (all for the same file, ranges against `base`) in one pass.
///
/// Ranges always refer to the original content, so the result does not
/// depend on the order the edits are passed in.
pub fn render(base: &str, edits: &[&TextEdit]) -> Result<String, EditError> {
    let mut sorted: Vec<&TextEdit> = edits.to_vec();
    sorted.sort_by_key(|e| (e.start, e.end));

    let mut out = String::with_capacity(base.len() + edits.len() * 8);
    let mut cursor = 0usize;
    for edit in sorted {
        if edit.start < cursor {
            return Err(EditError::Overlap(edit.start));
        }
        if !edit.matches(base) {
            return Err(EditError::Stale {
                start: edit.start,
                end: edit.end,
                expected: edit.expected.clone(),
            });
        }
        out.push_str(&base[cursor..edit.start]);
        out.push_str(&edit.replacement);
        cursor = edit.end;
    }
    out.push_str(&base[cursor..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn edit(start: usize, expected: &str, replacement: &str) -> TextEdit {
        TextEdit {
            path: PathBuf::from("a.ts"),
            start,
            end: start + expected.len(),
            expected: expected.to_string(),
            replacement: replacement.to_string(),
        }
    }

    #[test]
    fn edits_apply_against_original_offsets() {
        let base = "let a: any = 1;\nlet b: any = 's';\n";
        let e1 = edit(7, "any", "number");
        let e2 = edit(23, "any", "string");
        let out = render(base, &[&e2, &e1]).unwrap();
        assert_eq!(out, "let a: number = 1;\nlet b: string = 's';\n");
    }

    #[test]
    fn stale_edit_is_rejected() {
        let e = edit(7, "any", "number");
        assert!(matches!(
            render("let a: int = 1;", &[&e]),
            Err(EditError::Stale { start: 7, .. })
        ));
    }

    #[test]
    fn overlapping_edits_are_rejected() {
        let base = "let a: any = 1;";
        let e1 = edit(7, "any", "number");
        let e2 = edit(8, "ny", "x");
        assert_eq!(render(base, &[&e1, &e2]), Err(EditError::Overlap(8)));
    }

    #[test]
    fn no_edits_returns_base() {
        assert_eq!(render("x", &[]).unwrap(), "x");
    }
}
