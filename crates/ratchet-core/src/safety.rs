//! Safety protocol: snapshot, apply, validate, then commit or roll back.
//!
//! A batch is first tried as a whole. When validation fails the files are
//! restored from the checkpoint and the batch is split in half, recursively,
//! until every failing edit is isolated on its own. On return the tree either
//! type-checks or is byte-identical to its state before the call.
//!
//! With a journal attached, each trial's checkpoint is persisted before its
//! edits are written, so a process killed mid-validation can be rolled back
//! by the next run.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::batch::{AppliedSite, Batch, BatchResult, PlannedSite, RejectedSite};
use crate::domain::candidate::TextEdit;
use crate::campaign::state::RunStateStore;
use crate::domain::checkpoint::{CheckpointToken, SafetyCheckpoint, ValidationOutcome};
use crate::domain::error::Result;
use crate::metrics::METRICS;
use crate::obs;
use crate::replace::edit::render;
use crate::vcs::CheckpointStore;
use crate::workspace::Workspace;

/// Verdict of the type checker over the current tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub passed: bool,
    /// Checker output, trimmed; empty when it passed quietly.
    pub diagnostics: String,
}

impl Validation {
    pub fn pass() -> Self {
        Self {
            passed: true,
            diagnostics: String::new(),
        }
    }

    pub fn fail(diagnostics: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostics: diagnostics.into(),
        }
    }
}

/// The checker could not produce a verdict at all.
#[derive(Debug, thiserror::Error)]
#[error("type checker could not run: {0}")]
pub struct CheckerError(pub String);

/// External compiler / type checker run after each trial.
#[async_trait]
pub trait TypeChecker: Send + Sync {
    async fn check(&self) -> std::result::Result<Validation, CheckerError>;
}

pub struct SafetyProtocol {
    workspace: Arc<dyn Workspace>,
    store: Arc<dyn CheckpointStore>,
    checker: Arc<dyn TypeChecker>,
    timeout: Duration,
    journal: Option<RunStateStore>,
}

/// Outcome of one trial before it is folded into the batch result.
enum Trial {
    Passed,
    Failed(String),
}

impl SafetyProtocol {
    pub fn new(
        workspace: Arc<dyn Workspace>,
        store: Arc<dyn CheckpointStore>,
        checker: Arc<dyn TypeChecker>,
        timeout: Duration,
    ) -> Self {
        Self {
            workspace,
            store,
            checker,
            timeout,
            journal: None,
        }
    }

    /// Persist in-flight checkpoints through `journal`.
    pub fn with_journal(mut self, journal: RunStateStore) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Roll back a trial interrupted before it was committed or restored.
    /// Returns the checkpoint that was restored, if any.
    pub fn recover_interrupted(&self) -> Result<Option<CheckpointToken>> {
        let Some(journal) = &self.journal else {
            return Ok(None);
        };
        let Some(token) = journal.load_inflight()? else {
            return Ok(None);
        };
        warn!(
            checkpoint = %token.id,
            files = token.files.len(),
            "restoring checkpoint of an interrupted trial"
        );
        self.store.restore(&token)?;
        METRICS.inc_rollbacks();
        journal.clear_inflight()?;
        Ok(Some(token))
    }

    fn close_journal(&self) -> Result<()> {
        match &self.journal {
            Some(journal) => journal.clear_inflight(),
            None => Ok(()),
        }
    }

    /// Apply `batch`, keeping every edit that validates and rejecting the rest.
    ///
    /// Errors are fatal: a snapshot, restore or commit primitive failed and the
    /// tree state can no longer be vouched for.
    pub async fn apply_batch(&self, batch: &Batch) -> Result<BatchResult> {
        let mut result = BatchResult {
            batch_number: batch.number,
            ..Default::default()
        };

        let mut base: BTreeMap<PathBuf, String> = BTreeMap::new();
        for path in batch.files() {
            let content = self.workspace.read(&path)?;
            base.insert(path, content);
        }

        let mut pending: Vec<&PlannedSite> = Vec::with_capacity(batch.len());
        for item in batch.items() {
            let edit = &item.candidate.edit;
            let fresh = base.get(&edit.path).is_some_and(|c| edit.matches(c));
            if fresh {
                pending.push(item);
            } else {
                debug!(site = %item.site.location(), "stale edit rejected before validation");
                result.rejected.push(rejected(item, "stale edit: source no longer matches"));
            }
        }

        let mut committed: Vec<&PlannedSite> = Vec::new();
        let mut queue: VecDeque<Vec<&PlannedSite>> = VecDeque::new();
        if !pending.is_empty() {
            queue.push_back(pending);
        }

        while let Some(set) = queue.pop_front() {
            match self.trial(batch.number, &base, &committed, &set, &mut result).await? {
                Trial::Passed => committed.extend(set),
                Trial::Failed(reason) if set.len() == 1 => {
                    warn!(site = %set[0].site.location(), reason = %reason, "edit rejected");
                    result.rejected.push(rejected(set[0], &reason));
                }
                Trial::Failed(_) => {
                    let mid = set.len() / 2;
                    let (left, right) = set.split_at(mid);
                    queue.push_front(right.to_vec());
                    queue.push_front(left.to_vec());
                }
            }
        }

        METRICS.add_edits_applied(result.applied.len() as u64);
        METRICS.add_edits_rejected(result.rejected.len() as u64);
        info!(
            batch = batch.number,
            applied = result.applied.len(),
            rejected = result.rejected.len(),
            trials = result.checkpoints.len(),
            "batch applied"
        );
        Ok(result)
    }

    async fn trial(
        &self,
        batch_number: u32,
        base: &BTreeMap<PathBuf, String>,
        committed: &[&PlannedSite],
        set: &[&PlannedSite],
        result: &mut BatchResult,
    ) -> Result<Trial> {
        let files: Vec<PathBuf> = set
            .iter()
            .map(|p| p.candidate.edit.path.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut rendered = Vec::with_capacity(files.len());
        for path in &files {
            let edits: Vec<&TextEdit> = committed
                .iter()
                .chain(set.iter())
                .map(|p| &p.candidate.edit)
                .filter(|e| &e.path == path)
                .collect();
            let original = base.get(path).map(String::as_str).unwrap_or_default();
            match render(original, &edits) {
                Ok(content) => rendered.push((path, content)),
                Err(e) => return Ok(Trial::Failed(e.to_string())),
            }
        }

        let token = self.store.snapshot(&files)?;
        if let Some(journal) = &self.journal {
            journal.record_inflight(&token)?;
        }
        let mut failure = None;
        for (path, content) in &rendered {
            if let Err(e) = self.workspace.write(path, content) {
                failure = Some(format!("write {}: {e}", path.display()));
                break;
            }
        }

        if failure.is_none() {
            failure = match tokio::time::timeout(self.timeout, self.checker.check()).await {
                Ok(Ok(v)) if v.passed => None,
                Ok(Ok(v)) => Some(first_line(&v.diagnostics, "type check failed")),
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("type check timed out after {}s", self.timeout.as_secs())),
            };
        }

        match failure {
            None => {
                let message = format!(
                    "ratchet: batch {batch_number}: replace {} escape annotation(s)",
                    set.len()
                );
                let commit = self.store.commit(&files, &message)?;
                self.close_journal()?;
                for item in set {
                    result.applied.push(AppliedSite {
                        site_hash: item.candidate.site_hash,
                        path: item.candidate.edit.path.clone(),
                        replacement: item.candidate.replacement.clone(),
                        commit: commit.clone(),
                    });
                }
                debug!(checkpoint = %token.id, sites = set.len(), commit = %commit, "trial passed");
                result.checkpoints.push(SafetyCheckpoint {
                    token,
                    trial_size: set.len(),
                    outcome: ValidationOutcome::Passed { commit },
                    restored_from: None,
                });
                Ok(Trial::Passed)
            }
            Some(reason) => {
                self.store.restore(&token)?;
                self.close_journal()?;
                METRICS.inc_rollbacks();
                obs::emit_rolled_back(&token.id.to_string(), set.len(), &reason);
                let restored_from = Some(token.id);
                result.checkpoints.push(SafetyCheckpoint {
                    token,
                    trial_size: set.len(),
                    outcome: ValidationOutcome::Failed {
                        reason: reason.clone(),
                    },
                    restored_from,
                });
                Ok(Trial::Failed(reason))
            }
        }
    }
}

fn rejected(item: &PlannedSite, reason: &str) -> RejectedSite {
    RejectedSite {
        site_hash: item.candidate.site_hash,
        path: item.candidate.edit.path.clone(),
        reason: reason.to_string(),
    }
}

/// First non-empty line of checker output, or `fallback`.
fn first_line(text: &str, fallback: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or(fallback)
        .to_string()
}
