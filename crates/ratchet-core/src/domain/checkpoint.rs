//! Safety checkpoints.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cas::Digest;

/// Content of one file at snapshot time. `digest` is `None` when the file
/// did not exist, in which case restoring removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: PathBuf,
    pub digest: Option<Digest>,
}

/// Immutable handle to a pre-batch snapshot of the affected files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointToken {
    pub id: Uuid,
    pub files: Vec<FileSnapshot>,
    pub created_at: DateTime<Utc>,
}

impl CheckpointToken {
    pub fn new(files: Vec<FileSnapshot>) -> Self {
        Self {
            id: Uuid::new_v4(),
            files,
            created_at: Utc::now(),
        }
    }
}

/// Reference returned by the version-control boundary for a confirmed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef(pub String);

impl std::fmt::Display for CommitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the validation gate said about the edited content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Passed { commit: CommitRef },
    Failed { reason: String },
}

/// A checkpoint together with what happened to it. Created before edits are
/// written and consumed, never mutated, by rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyCheckpoint {
    pub token: CheckpointToken,
    /// Number of sites the trial covered.
    pub trial_size: usize,
    pub outcome: ValidationOutcome,
    /// Set when the files were restored from `token`.
    pub restored_from: Option<Uuid>,
}

impl SafetyCheckpoint {
    pub fn rolled_back(&self) -> bool {
        self.restored_from.is_some()
    }
}
