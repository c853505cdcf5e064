//! Error taxonomy for escape-annotation campaigns.
//!
//! Only the fatal categories live here. Ambiguous classifications and declined
//! syntheses are ordinary values (`Verdict::Unknown`, `Proposal::Manual`), and
//! validation failures are recovered inside the safety protocol.

use std::path::PathBuf;

use uuid::Uuid;

use crate::cas::CasError;

/// The analyzer could not be run or its output could not be understood.
///
/// Always fatal, and always raised before any source file is touched.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("analyzer could not be started: {0}")]
    Spawn(String),

    #[error("analyzer exited with code {exit_code} and no diagnostic output: {stderr}")]
    AnalyzerFailed { exit_code: i32, stderr: String },

    #[error("analyzer output could not be parsed: {0}")]
    Unparseable(String),

    #[error("failed to read {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A snapshot or restore primitive failed; automatic rollback cannot be trusted.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("snapshot of {path} failed: {reason}")]
    Snapshot { path: PathBuf, reason: String },

    #[error("restore of checkpoint {checkpoint} failed: {reason}")]
    Restore { checkpoint: Uuid, reason: String },

    #[error("restored content of {path} does not match checkpoint: expected {expected}, got {actual}")]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("checkpoint blob store error: {0}")]
    Cas(#[from] CasError),
}

/// Campaign-level errors.
#[derive(Debug, thiserror::Error)]
pub enum RatchetError {
    #[error("collection error: {0}")]
    Collection(#[from] CollectionError),

    #[error("regression detected: {observed} escape sites exceed baseline of {baseline}")]
    RegressionDetected { baseline: usize, observed: usize },

    #[error("checkpoint integrity error: {0}")]
    CheckpointIntegrity(#[from] CheckpointError),

    #[error("campaign {run_id} is still unfinished; resume or abandon it first")]
    CampaignInProgress { run_id: Uuid },

    #[error("no campaign record found at {0}")]
    NoCampaign(PathBuf),

    #[error("campaign {run_id} has already finished")]
    CampaignFinished { run_id: Uuid },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid rule {id}: {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RatchetError {
    /// Whether this error ends the campaign with status `Aborted`.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            RatchetError::RegressionDetected { .. } | RatchetError::CheckpointIntegrity(_)
        )
    }
}

/// Result type for ratchet operations.
pub type Result<T> = std::result::Result<T, RatchetError>;
