//! Turning planned sites into risk-ordered batches.

use crate::domain::batch::{Batch, PlannedSite};
use crate::domain::candidate::RiskLevel;
use crate::domain::error::Result;

use super::config::{CampaignConfig, CampaignMode};

/// Batches to apply, plus the candidates the mode left out.
#[derive(Debug, Default)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
    pub excluded: Vec<PlannedSite>,
}

/// Order candidates by (risk, path, position) and cut them into batches
/// numbered from `first_number`.
///
/// In normal mode the sites of one file stay in the same batch whenever they
/// fit, so a file is touched by as few batches as possible.
pub fn plan_batches(
    mut planned: Vec<PlannedSite>,
    config: &CampaignConfig,
    first_number: u32,
) -> Result<BatchPlan> {
    planned.sort_by(|a, b| {
        a.candidate
            .risk
            .cmp(&b.candidate.risk)
            .then_with(|| a.site.path.cmp(&b.site.path))
            .then_with(|| a.site.span.start.cmp(&b.site.span.start))
    });

    let mut excluded = Vec::new();
    if config.mode == CampaignMode::Emergency {
        let (low, rest): (Vec<_>, Vec<_>) = planned
            .into_iter()
            .partition(|p| p.candidate.risk == RiskLevel::Low);
        planned = low;
        excluded = rest;
    }

    let max = config.effective_batch_size();
    let chunks = match config.mode {
        CampaignMode::Conservative => planned.into_iter().map(|p| vec![p]).collect(),
        CampaignMode::Normal | CampaignMode::Emergency => group_by_file(planned, max),
    };

    let mut batches = Vec::with_capacity(chunks.len());
    for (i, items) in chunks.into_iter().enumerate() {
        batches.push(Batch::new(first_number + i as u32, items, max)?);
    }
    Ok(BatchPlan { batches, excluded })
}

/// Greedy packing of consecutive same-file, same-risk groups into chunks of
/// at most `max`. Groups larger than `max` are split.
fn group_by_file(sorted: Vec<PlannedSite>, max: usize) -> Vec<Vec<PlannedSite>> {
    let mut groups: Vec<Vec<PlannedSite>> = Vec::new();
    for item in sorted {
        let same_group = groups.last().is_some_and(|g| {
            g[0].site.path == item.site.path && g[0].candidate.risk == item.candidate.risk
        });
        if !same_group {
            groups.push(Vec::new());
        }
        if let Some(g) = groups.last_mut() {
            g.push(item);
        }
    }

    let mut chunks: Vec<Vec<PlannedSite>> = Vec::new();
    let mut current: Vec<PlannedSite> = Vec::new();
    for mut group in groups {
        if current.len() + group.len() > max && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        while group.len() > max {
            let rest = group.split_off(max);
            chunks.push(group);
            group = rest;
        }
        current.extend(group);
        if current.len() == max {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
