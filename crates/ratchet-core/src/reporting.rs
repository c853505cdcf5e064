//! Campaign summary artifacts.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::campaign::state::write_atomic;
use crate::cas::Digest;
use crate::domain::error::{RatchetError, Result};
use crate::domain::run::{CampaignSummary, SiteOutcome};

/// Persist `<runs_dir>/<run_id>/summary.json` and `<runs_dir>/<run_id>/summary.digest`.
pub fn write_summary(summary: &CampaignSummary, runs_dir: &Path) -> Result<PathBuf> {
    let run_dir = runs_dir.join(summary.run_id.to_string());
    let artifact_path = run_dir.join("summary.json");
    let digest_path = run_dir.join("summary.digest");

    let json = serde_json::to_vec_pretty(summary)?;
    let digest = Digest::compute(&json).to_hex();

    write_atomic(&artifact_path, &json)?;
    write_atomic(&digest_path, digest.as_bytes())?;
    Ok(artifact_path)
}

/// Read and verify `<runs_dir>/<run_id>/summary.json`.
pub fn read_summary(run_id: &str, runs_dir: &Path) -> Result<CampaignSummary> {
    let run_dir = runs_dir.join(run_id);
    let json = std::fs::read(run_dir.join("summary.json"))?;
    let digest = std::fs::read_to_string(run_dir.join("summary.digest"))?;
    let actual = Digest::compute(&json).to_hex();
    if digest.trim() != actual {
        return Err(RatchetError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

/// Markdown list of every site that needs a human, grouped by file.
pub fn render_manual_review(summary: &CampaignSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Manual review: campaign {}", summary.run_id);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Status: {:?}. Baseline {}, final count {}. Applied {}, rejected {}, manual {}, skipped {}.",
        summary.status,
        summary.baseline,
        summary
            .final_count
            .map(|c| c.to_string())
            .unwrap_or_else(|| "n/a".to_string()),
        summary.applied_count(),
        summary.rejected_count(),
        summary.manual_count(),
        summary.skipped_count(),
    );
    if let Some(reason) = &summary.abort_reason {
        let _ = writeln!(out);
        let _ = writeln!(out, "Aborted: {reason}");
    }

    let mut current: Option<&Path> = None;
    let mut any = false;
    for site in summary.manual_sites() {
        if current != Some(site.path.as_path()) {
            let _ = writeln!(out);
            let _ = writeln!(out, "## {}", site.path.display());
            let _ = writeln!(out);
            current = Some(site.path.as_path());
        }
        let reason = match &site.outcome {
            SiteOutcome::Manual { reason } => reason.as_str(),
            _ => "",
        };
        let _ = writeln!(
            out,
            "- [ ] line {}, col {} ({}): {} [{} {:.2}; {}]",
            site.line,
            site.column,
            site.kind,
            reason,
            site.verdict,
            site.confidence,
            site.rationale,
        );
        any = true;
    }
    if !any {
        let _ = writeln!(out);
        let _ = writeln!(out, "No sites need manual review.");
    }
    out
}
