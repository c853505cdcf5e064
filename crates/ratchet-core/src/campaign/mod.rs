//! Campaign controller.
//!
//! Drives one campaign through `Collecting -> Batching -> Applying ->
//! Finalizing`, persisting the run record after every batch so an interrupted
//! campaign can be resumed. Aborts on regression, on checkpoint integrity
//! failures and after too many failed batches in a row.

pub mod batching;
pub mod cancel;
pub mod config;
pub mod state;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn, Instrument};

use crate::cas::Digest;
use crate::classify::{ClassificationEngine, RuleSet};
use crate::collector::{Analyzer, SignalCollector};
use crate::domain::batch::{BatchResult, PlannedSite};
use crate::domain::classification::{Classification, Verdict};
use crate::domain::error::{RatchetError, Result};
use crate::domain::run::{
    CampaignPhase, CampaignRecord, CampaignStatus, CampaignSummary, RegressionRatchet,
    SiteOutcome, SiteReport,
};
use crate::domain::site::EscapeSite;
use crate::metrics::METRICS;
use crate::obs;
use crate::replace::{Proposal, ReplacementEngine};
use crate::reporting;
use crate::safety::{SafetyProtocol, TypeChecker};
use crate::vcs::CheckpointStore;
use crate::workspace::Workspace;

pub use batching::{plan_batches, BatchPlan};
pub use cancel::CancelLatch;
pub use config::{CampaignConfig, CampaignMode};
pub use state::RunStateStore;

/// External services a campaign runs against.
#[derive(Clone)]
pub struct Capabilities {
    pub analyzer: Arc<dyn Analyzer>,
    pub workspace: Arc<dyn Workspace>,
    pub store: Arc<dyn CheckpointStore>,
    pub checker: Arc<dyn TypeChecker>,
}

pub struct CampaignController {
    config: CampaignConfig,
    collector: SignalCollector,
    classifier: ClassificationEngine,
    replacer: ReplacementEngine,
    safety: SafetyProtocol,
    state: RunStateStore,
    cancel: CancelLatch,
    phase: CampaignPhase,
}

/// Per-site outcomes in collection order, addressable by site hash.
struct Outcomes {
    reports: Vec<SiteReport>,
    index: HashMap<Digest, usize>,
}

impl Outcomes {
    fn new(sites: &[EscapeSite], classifications: &[Classification]) -> Self {
        let mut reports = Vec::with_capacity(sites.len());
        let mut index = HashMap::with_capacity(sites.len());
        for (site, c) in sites.iter().zip(classifications) {
            index.insert(site.content_hash, reports.len());
            reports.push(SiteReport {
                path: site.path.clone(),
                line: site.span.line,
                column: site.span.column,
                kind: site.kind,
                site_hash: site.content_hash,
                verdict: c.verdict,
                confidence: c.confidence,
                matched_rules: c.matched_rules.clone(),
                rationale: c.rationale.clone(),
                outcome: SiteOutcome::Deferred {
                    reason: "not yet processed".to_string(),
                },
            });
        }
        Self { reports, index }
    }

    fn set(&mut self, hash: &Digest, outcome: SiteOutcome) {
        if let Some(&i) = self.index.get(hash) {
            self.reports[i].outcome = outcome;
        }
    }

    fn count(&self, pred: impl Fn(&SiteOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Why the applying loop stopped early.
enum Stop {
    Paused,
    Aborted(String),
}

impl CampaignController {
    pub fn new(config: CampaignConfig, caps: Capabilities) -> Result<Self> {
        config.validate()?;
        let rules = RuleSet::with_overrides(config.rules.clone())?;
        let collector = SignalCollector::new(
            caps.analyzer,
            caps.workspace.clone(),
            config.collector_config(),
        );
        let safety = SafetyProtocol::new(
            caps.workspace,
            caps.store,
            caps.checker,
            config.validation_timeout(),
        )
        .with_journal(RunStateStore::new(config.state_dir.clone()));
        Ok(Self {
            classifier: ClassificationEngine::new(rules, config.classifier_settings()),
            replacer: ReplacementEngine::new(config.confidence_threshold),
            state: RunStateStore::new(config.state_dir.clone()),
            collector,
            safety,
            cancel: CancelLatch::new(),
            phase: CampaignPhase::Idle,
            config,
        })
    }

    /// Share a cancellation latch with the caller (e.g. a Ctrl-C handler).
    pub fn with_cancel(mut self, latch: CancelLatch) -> Self {
        self.cancel = latch;
        self
    }

    pub fn phase(&self) -> CampaignPhase {
        self.phase
    }

    pub fn state(&self) -> &RunStateStore {
        &self.state
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    /// Start a new campaign. Fails with `CampaignInProgress` while an
    /// unfinished record exists.
    pub async fn run_campaign(&mut self) -> Result<CampaignSummary> {
        if let Some(existing) = self.state.load()? {
            if existing.status.is_unfinished() {
                return Err(RatchetError::CampaignInProgress {
                    run_id: existing.run_id,
                });
            }
        }
        self.execute(None).await
    }

    /// Continue the unfinished campaign recorded in the state dir.
    pub async fn resume(&mut self) -> Result<CampaignSummary> {
        let record = self.state.resume()?;
        self.execute(Some(record)).await
    }

    fn transition(&mut self, next: CampaignPhase) {
        debug_assert!(
            self.phase.can_transition(next),
            "illegal transition {:?} -> {:?}",
            self.phase,
            next
        );
        debug!(from = ?self.phase, to = ?next, "campaign phase");
        self.phase = next;
    }

    async fn execute(&mut self, resumed: Option<CampaignRecord>) -> Result<CampaignSummary> {
        self.phase = CampaignPhase::Idle;
        if let Some(token) = self.safety.recover_interrupted()? {
            info!(checkpoint = %token.id, "interrupted trial rolled back before collection");
        }
        self.transition(CampaignPhase::Collecting);

        let sites = match self.collector.collect().await {
            Ok(sites) => sites,
            Err(e) => {
                self.transition(CampaignPhase::Aborted);
                if let Some(mut record) = resumed {
                    record.status = CampaignStatus::Paused;
                    record.touch();
                    self.state.save(&record)?;
                }
                return Err(e.into());
            }
        };
        let initial_count = sites.len();

        let is_resume = resumed.is_some();
        let record = match resumed {
            Some(record) => record,
            None => {
                let baseline = self.config.regression_baseline.unwrap_or(initial_count);
                self.state.begin(baseline)?
            }
        };
        let run_id = record.run_id.to_string();
        obs::emit_campaign_started(&run_id, record.baseline, is_resume);
        self.drive(record, sites)
            .instrument(obs::campaign_span(&run_id))
            .await
    }

    async fn drive(
        &mut self,
        mut record: CampaignRecord,
        sites: Vec<EscapeSite>,
    ) -> Result<CampaignSummary> {
        let initial_count = sites.len();
        let mut ratchet = RegressionRatchet::new(record.baseline);
        record.last_count = Some(initial_count);
        if let Err(e) = ratchet.observe(initial_count) {
            self.transition(CampaignPhase::Aborted);
            let outcomes = Outcomes::new(&[], &[]);
            return self.finish(record, ratchet, outcomes, Some(e.to_string()));
        }

        let classifications = self.classifier.classify_all(&sites);
        let proposals = self.replacer.propose_all(&sites, &classifications);
        let mut outcomes = Outcomes::new(&sites, &classifications);

        let mut planned = Vec::new();
        let triples = sites.into_iter().zip(classifications).zip(proposals);
        for ((site, classification), proposal) in triples {
            let hash = site.content_hash;
            match proposal {
                Proposal::Candidate(candidate) if record.rejected_sites.contains(&hash) => {
                    debug!(
                        site = %site.location(),
                        candidate = %candidate.replacement,
                        "previously rejected; skipped"
                    );
                    outcomes.set(
                        &hash,
                        SiteOutcome::Skipped {
                            reason: "rejected by validation in an earlier batch".to_string(),
                        },
                    );
                }
                Proposal::Candidate(candidate) => planned.push(PlannedSite {
                    site,
                    classification,
                    candidate,
                }),
                Proposal::Manual { reason } => {
                    outcomes.set(&hash, SiteOutcome::Manual { reason })
                }
                Proposal::NotEligible { .. } if classification.verdict == Verdict::Unknown => {
                    let reason = format!("ambiguous classification: {}", classification.rationale);
                    outcomes.set(&hash, SiteOutcome::Manual { reason });
                }
                Proposal::NotEligible { reason } => {
                    outcomes.set(&hash, SiteOutcome::Skipped { reason })
                }
            }
        }
        record.manual = outcomes.count(|o| matches!(o, SiteOutcome::Manual { .. }));
        record.skipped = outcomes.count(|o| matches!(o, SiteOutcome::Skipped { .. }));
        obs::emit_sites_planned(initial_count, planned.len(), record.manual, record.skipped);

        self.transition(CampaignPhase::Batching);
        let plan = plan_batches(planned, &self.config, record.batches_completed + 1)?;
        for item in &plan.excluded {
            let reason = format!(
                "{} risk excluded in {} mode",
                item.candidate.risk, self.config.mode
            );
            outcomes.set(&item.site.content_hash, SiteOutcome::Skipped { reason });
        }
        record.skipped += plan.excluded.len();
        info!(batches = plan.batches.len(), mode = %self.config.mode, "batches planned");

        if plan.batches.is_empty() {
            self.transition(CampaignPhase::Finalizing);
            return self.finish(record, ratchet, outcomes, None);
        }

        self.transition(CampaignPhase::Applying);
        let mut stop = None;
        let mut next = 0;
        while next < plan.batches.len() {
            if self.cancel.is_requested() {
                info!(
                    batches_completed = record.batches_completed,
                    "cancellation honored at batch boundary"
                );
                stop = Some(Stop::Paused);
                break;
            }
            let batch = &plan.batches[next];
            next += 1;

            let result = match self.safety.apply_batch(batch).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(batch = batch.number, error = %e, "batch aborted the campaign");
                    for item in batch.items() {
                        outcomes.set(&item.site.content_hash, SiteOutcome::Deferred {
                            reason: format!("batch {} did not complete", batch.number),
                        });
                    }
                    stop = Some(Stop::Aborted(e.to_string()));
                    break;
                }
            };

            self.record_batch(&mut record, &mut ratchet, &mut outcomes, batch.items(), &result);
            METRICS.inc_batches();
            obs::emit_batch_applied(&result);

            let recount = self.collector.count().await;
            record.batches_completed = batch.number;
            record.touch();
            let verdict = match recount {
                Ok(count) => {
                    record.last_count = Some(count);
                    ratchet.observe(count).err().map(|e| e.to_string())
                }
                Err(e) => Some(RatchetError::from(e).to_string()),
            };
            self.state.save(&record)?;

            if let Some(reason) = verdict {
                stop = Some(Stop::Aborted(reason));
                break;
            }
            if record.consecutive_failures >= self.config.max_consecutive_failures {
                stop = Some(Stop::Aborted(format!(
                    "{} consecutive batches failed validation",
                    record.consecutive_failures
                )));
                break;
            }
        }

        let deferred_reason = match &stop {
            Some(Stop::Paused) => "campaign paused before this batch",
            _ => "campaign stopped before this batch",
        };
        for batch in &plan.batches[next..] {
            for item in batch.items() {
                outcomes.set(&item.site.content_hash, SiteOutcome::Deferred {
                    reason: deferred_reason.to_string(),
                });
            }
        }

        match stop {
            None => {
                self.transition(CampaignPhase::Finalizing);
                self.finish(record, ratchet, outcomes, None)
            }
            Some(Stop::Paused) => {
                self.transition(CampaignPhase::Paused);
                record.status = CampaignStatus::Paused;
                self.finish(record, ratchet, outcomes, None)
            }
            Some(Stop::Aborted(reason)) => {
                self.transition(CampaignPhase::Aborted);
                self.finish(record, ratchet, outcomes, Some(reason))
            }
        }
    }

    fn record_batch(
        &self,
        record: &mut CampaignRecord,
        ratchet: &mut RegressionRatchet,
        outcomes: &mut Outcomes,
        items: &[PlannedSite],
        result: &BatchResult,
    ) {
        let by_hash: HashMap<Digest, &PlannedSite> =
            items.iter().map(|p| (p.site.content_hash, p)).collect();

        for applied in &result.applied {
            if let Some(item) = by_hash.get(&applied.site_hash) {
                outcomes.set(&applied.site_hash, SiteOutcome::Applied {
                    replacement: applied.replacement.clone(),
                    strategy: item.candidate.strategy,
                    risk: item.candidate.risk,
                    commit: applied.commit.clone(),
                });
            }
        }
        for rejected in &result.rejected {
            outcomes.set(&rejected.site_hash, SiteOutcome::Rejected {
                reason: rejected.reason.clone(),
            });
            record.rejected_sites.insert(rejected.site_hash);
        }

        record.processed += items.len();
        record.applied += result.applied.len();
        record.rejected += result.rejected.len();
        ratchet.record_eliminated(result.applied.len());
        if result.is_failure() {
            record.consecutive_failures += 1;
            warn!(
                batch = result.batch_number,
                consecutive = record.consecutive_failures,
                "batch failed"
            );
        } else {
            record.consecutive_failures = 0;
        }
    }

    /// Persist the terminal record and the summary artifacts.
    fn finish(
        &mut self,
        mut record: CampaignRecord,
        ratchet: RegressionRatchet,
        outcomes: Outcomes,
        abort_reason: Option<String>,
    ) -> Result<CampaignSummary> {
        if let Some(reason) = &abort_reason {
            record.status = CampaignStatus::Aborted;
            record.abort_reason = Some(reason.clone());
            obs::emit_campaign_aborted(&record.run_id.to_string(), reason);
        } else if record.status == CampaignStatus::Running {
            record.status = CampaignStatus::Completed;
            self.transition(CampaignPhase::Completed);
        }
        record.touch();
        self.state.save(&record)?;

        let summary = CampaignSummary {
            run_id: record.run_id,
            status: record.status,
            started_at: record.started_at,
            finished_at: Utc::now(),
            baseline: record.baseline,
            final_count: record.last_count,
            batches_completed: record.batches_completed,
            ratchet,
            abort_reason: record.abort_reason.clone(),
            sites: outcomes.reports,
        };

        let runs_dir = self.state.dir().join("runs");
        reporting::write_summary(&summary, &runs_dir)?;
        let review = reporting::render_manual_review(&summary);
        state::write_atomic(
            &self.state.run_dir(record.run_id).join("manual-review.md"),
            review.as_bytes(),
        )?;

        METRICS.flush();
        obs::emit_campaign_finished(
            &record.run_id.to_string(),
            summary.status,
            summary.applied_count(),
            summary.final_count,
        );
        Ok(summary)
    }
}
