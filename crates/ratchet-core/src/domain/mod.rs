//! Domain model for escape-annotation campaigns.
//!
//! - `EscapeSite`: one reported escape annotation
//! - `Classification`: intentional / unintentional / unknown verdict
//! - `ReplacementCandidate`: proposed type plus its text edit
//! - `Batch`: bounded set of sites applied as one transaction
//! - `SafetyCheckpoint`: pre-batch snapshot and its validation outcome
//! - `CampaignRecord` / `CampaignSummary`: persisted and reported run state

pub mod batch;
pub mod candidate;
pub mod checkpoint;
pub mod classification;
pub mod error;
pub mod run;
pub mod site;

pub use batch::{AppliedSite, Batch, BatchResult, PlannedSite, RejectedSite};
pub use candidate::{Precondition, ReplacementCandidate, RiskLevel, SynthesisStrategy, TextEdit};
pub use checkpoint::{CheckpointToken, CommitRef, FileSnapshot, SafetyCheckpoint, ValidationOutcome};
pub use classification::{Classification, Verdict};
pub use error::{CheckpointError, CollectionError, RatchetError, Result};
pub use run::{
    CampaignPhase, CampaignRecord, CampaignStatus, CampaignSummary, RegressionRatchet,
    SiteOutcome, SiteReport,
};
pub use site::{ConstructKind, EscapeSite, SourceSpan};
