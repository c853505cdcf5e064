//! Ratchet Core Library
//!
//! Classifies escape annotations (`any` and friends), proposes concrete
//! replacement types and applies them in validated, rollback-safe batches
//! without ever letting the escape count rise above its baseline.

pub mod campaign;
pub mod cas;
pub mod classify;
pub mod collector;
pub mod domain;
pub mod fakes;
pub mod git;
pub mod metrics;
pub mod obs;
pub mod replace;
pub mod reporting;
pub mod safety;
pub mod telemetry;
pub mod vcs;
pub mod workspace;

pub use domain::{
    AppliedSite, Batch, BatchResult, CampaignPhase, CampaignRecord, CampaignStatus,
    CampaignSummary, CheckpointError, CheckpointToken, Classification, CollectionError,
    CommitRef, ConstructKind, EscapeSite, PlannedSite, RatchetError, RegressionRatchet,
    RejectedSite, ReplacementCandidate, Result, RiskLevel, SafetyCheckpoint, SiteOutcome,
    SiteReport, SourceSpan, SynthesisStrategy, TextEdit, ValidationOutcome, Verdict,
};

pub use campaign::{
    plan_batches, CampaignConfig, CampaignController, CampaignMode, CancelLatch, Capabilities,
    RunStateStore,
};
pub use cas::fs::FsBlobStore;
pub use cas::{BlobStore, CasError, Digest};
pub use classify::{ClassificationEngine, ClassifierSettings, Predicate, Rule, RuleSet};
pub use collector::{Analyzer, AnalyzerOutput, CollectorConfig, SignalCollector};
pub use git::{capture_head_sha, is_git_repo, GitCommitter};
pub use replace::{Proposal, ReplacementEngine};
pub use reporting::{read_summary, render_manual_review, write_summary};
pub use safety::{CheckerError, SafetyProtocol, TypeChecker, Validation};
pub use telemetry::init_tracing;
pub use vcs::{CasCheckpointStore, CheckpointStore};
pub use workspace::{FsWorkspace, Workspace};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
