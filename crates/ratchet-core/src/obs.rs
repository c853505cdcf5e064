//! Structured lifecycle events for campaigns.
//!
//! Every event carries an `event` field so log pipelines can filter on it
//! without parsing messages.

use tracing::{info, warn, Span};

use crate::domain::batch::BatchResult;
use crate::domain::run::CampaignStatus;

/// Span tagging every event of one campaign with its run id.
///
/// ```ignore
/// controller_future.instrument(campaign_span(&run_id)).await
/// ```
pub fn campaign_span(run_id: &str) -> Span {
    tracing::info_span!("ratchet.campaign", run_id = %run_id)
}

pub fn emit_campaign_started(run_id: &str, baseline: usize, resumed: bool) {
    info!(event = "campaign.started", run_id = %run_id, baseline, resumed);
}

pub fn emit_sites_planned(total: usize, candidates: usize, manual: usize, skipped: usize) {
    info!(event = "campaign.planned", total, candidates, manual, skipped);
}

pub fn emit_batch_applied(result: &BatchResult) {
    info!(
        event = "batch.applied",
        batch = result.batch_number,
        applied = result.applied.len(),
        rejected = result.rejected.len(),
        rollbacks = result.rollbacks(),
    );
}

pub fn emit_rolled_back(checkpoint: &str, trial_size: usize, reason: &str) {
    warn!(event = "batch.rolled_back", checkpoint = %checkpoint, trial_size, reason = %reason);
}

pub fn emit_campaign_finished(
    run_id: &str,
    status: CampaignStatus,
    applied: usize,
    final_count: Option<usize>,
) {
    info!(
        event = "campaign.finished",
        run_id = %run_id,
        status = ?status,
        applied,
        final_count = ?final_count,
    );
}

pub fn emit_campaign_aborted(run_id: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "campaign.aborted", run_id = %run_id, reason = %reason);
}
