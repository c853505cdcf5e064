//! Batches and their application results.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::candidate::ReplacementCandidate;
use super::checkpoint::{CommitRef, SafetyCheckpoint};
use super::classification::Classification;
use super::error::{RatchetError, Result};
use super::site::EscapeSite;
use crate::cas::Digest;

/// A site that made it through classification and synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedSite {
    pub site: EscapeSite,
    pub classification: Classification,
    pub candidate: ReplacementCandidate,
}

/// Ordered, size-bounded set of sites applied as one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// 1-based position within the campaign.
    pub number: u32,
    items: Vec<PlannedSite>,
}

impl Batch {
    /// Build a batch, refusing empty batches and batches larger than `max_size`.
    pub fn new(number: u32, items: Vec<PlannedSite>, max_size: usize) -> Result<Self> {
        if items.is_empty() {
            return Err(RatchetError::InvalidBatch(format!("batch {number} is empty")));
        }
        if items.len() > max_size {
            return Err(RatchetError::InvalidBatch(format!(
                "batch {number} has {} sites, maximum is {max_size}",
                items.len()
            )));
        }
        Ok(Self { number, items })
    }

    pub fn items(&self) -> &[PlannedSite] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Distinct files touched by this batch, sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        self.items
            .iter()
            .map(|p| p.site.path.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// A site whose edit survived validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedSite {
    pub site_hash: Digest,
    pub path: PathBuf,
    pub replacement: String,
    pub commit: CommitRef,
}

/// A site whose edit was isolated as the cause of a validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedSite {
    pub site_hash: Digest,
    pub path: PathBuf,
    pub reason: String,
}

/// Result of one `apply_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_number: u32,
    pub applied: Vec<AppliedSite>,
    pub rejected: Vec<RejectedSite>,
    /// Every checkpoint taken while applying, in order.
    pub checkpoints: Vec<SafetyCheckpoint>,
}

impl BatchResult {
    /// Nothing applied and at least one rejection.
    pub fn is_failure(&self) -> bool {
        self.applied.is_empty() && !self.rejected.is_empty()
    }

    /// Number of validation runs that ended in a rollback.
    pub fn rollbacks(&self) -> usize {
        self.checkpoints.iter().filter(|c| c.rolled_back()).count()
    }
}
