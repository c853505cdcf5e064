//! Campaign run state, the regression ratchet and the final summary.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::candidate::{RiskLevel, SynthesisStrategy};
use super::checkpoint::CommitRef;
use super::classification::Verdict;
use super::error::{RatchetError, Result};
use super::site::ConstructKind;
use crate::cas::Digest;

/// Persisted lifecycle status of a campaign.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Running,
    /// Stopped at a batch boundary on request; resumable.
    Paused,
    Completed,
    Aborted,
}

impl CampaignStatus {
    /// Running and paused campaigns block a new one from starting.
    pub fn is_unfinished(&self) -> bool {
        matches!(self, CampaignStatus::Running | CampaignStatus::Paused)
    }
}

/// Controller state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignPhase {
    Idle,
    Collecting,
    Batching,
    Applying,
    Finalizing,
    Completed,
    Aborted,
    Paused,
}

impl CampaignPhase {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition(self, next: CampaignPhase) -> bool {
        use CampaignPhase::*;
        matches!(
            (self, next),
            (Idle, Collecting)
                | (Collecting, Batching)
                | (Collecting, Aborted)
                | (Batching, Applying)
                | (Batching, Finalizing)
                | (Applying, Applying)
                | (Applying, Finalizing)
                | (Applying, Aborted)
                | (Applying, Paused)
                | (Finalizing, Completed)
                | (Finalizing, Aborted)
        )
    }
}

/// Baseline guard: the escape count may go down, never above the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegressionRatchet {
    /// Count that must not be exceeded, fixed at campaign start.
    pub baseline: usize,
    /// Lowest count observed so far.
    pub lowest_observed: usize,
    /// Cumulative eliminations; never decreases.
    pub eliminated: usize,
}

impl RegressionRatchet {
    pub fn new(baseline: usize) -> Self {
        Self {
            baseline,
            lowest_observed: baseline,
            eliminated: 0,
        }
    }

    /// Record a post-batch count.
    pub fn observe(&mut self, count: usize) -> Result<()> {
        if count > self.baseline {
            return Err(RatchetError::RegressionDetected {
                baseline: self.baseline,
                observed: count,
            });
        }
        self.lowest_observed = self.lowest_observed.min(count);
        Ok(())
    }

    pub fn record_eliminated(&mut self, n: usize) {
        self.eliminated += n;
    }
}

/// The JSON record written after every batch so interrupted runs can resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub baseline: usize,
    pub processed: usize,
    pub applied: usize,
    pub rejected: usize,
    pub manual: usize,
    pub skipped: usize,
    pub batches_completed: u32,
    pub consecutive_failures: u32,
    /// Sites already rejected by validation; not retried on resume.
    #[serde(default)]
    pub rejected_sites: BTreeSet<Digest>,
    pub last_count: Option<usize>,
    pub status: CampaignStatus,
    pub abort_reason: Option<String>,
}

impl CampaignRecord {
    pub fn new(baseline: usize) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            updated_at: now,
            baseline,
            processed: 0,
            applied: 0,
            rejected: 0,
            manual: 0,
            skipped: 0,
            batches_completed: 0,
            consecutive_failures: 0,
            rejected_sites: BTreeSet::new(),
            last_count: None,
            status: CampaignStatus::Running,
            abort_reason: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// What happened to one site during a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SiteOutcome {
    Applied {
        replacement: String,
        strategy: SynthesisStrategy,
        risk: RiskLevel,
        commit: CommitRef,
    },
    Rejected {
        reason: String,
    },
    /// Needs human judgment: unknown verdict or declined synthesis.
    Manual {
        reason: String,
    },
    /// Intentional, below threshold, or filtered out by the campaign mode.
    Skipped {
        reason: String,
    },
    /// Planned but never reached because the campaign stopped first.
    Deferred {
        reason: String,
    },
}

/// Per-site line of the campaign summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteReport {
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
    pub kind: ConstructKind,
    pub site_hash: Digest,
    pub verdict: Verdict,
    pub confidence: f64,
    pub matched_rules: Vec<String>,
    pub rationale: String,
    pub outcome: SiteOutcome,
}

/// Returned by the controller and consumed by report generators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub run_id: Uuid,
    pub status: CampaignStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub baseline: usize,
    pub final_count: Option<usize>,
    pub batches_completed: u32,
    pub ratchet: RegressionRatchet,
    pub abort_reason: Option<String>,
    pub sites: Vec<SiteReport>,
}

impl CampaignSummary {
    fn count(&self, pred: impl Fn(&SiteOutcome) -> bool) -> usize {
        self.sites.iter().filter(|s| pred(&s.outcome)).count()
    }

    pub fn applied_count(&self) -> usize {
        self.count(|o| matches!(o, SiteOutcome::Applied { .. }))
    }

    pub fn rejected_count(&self) -> usize {
        self.count(|o| matches!(o, SiteOutcome::Rejected { .. }))
    }

    pub fn manual_count(&self) -> usize {
        self.count(|o| matches!(o, SiteOutcome::Manual { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, SiteOutcome::Skipped { .. }))
    }

    /// Sites requiring human judgment. Always part of the final report.
    pub fn manual_sites(&self) -> impl Iterator<Item = &SiteReport> {
        self.sites
            .iter()
            .filter(|s| matches!(s.outcome, SiteOutcome::Manual { .. }))
    }
}
