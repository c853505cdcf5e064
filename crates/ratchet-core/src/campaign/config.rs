//! Campaign configuration, loaded from `ratchet.toml`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::{ClassifierSettings, Rule};
use crate::collector::CollectorConfig;
use crate::domain::error::{RatchetError, Result};

/// How aggressively batches are formed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignMode {
    /// Risk-ordered batches of `batch_size`, keeping a file's sites together.
    #[default]
    Normal,
    /// One site per batch.
    Conservative,
    /// Only low-risk candidates, in larger batches.
    Emergency,
}

impl fmt::Display for CampaignMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CampaignMode::Normal => "normal",
            CampaignMode::Conservative => "conservative",
            CampaignMode::Emergency => "emergency",
        };
        f.write_str(s)
    }
}

impl FromStr for CampaignMode {
    type Err = RatchetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(CampaignMode::Normal),
            "conservative" => Ok(CampaignMode::Conservative),
            "emergency" => Ok(CampaignMode::Emergency),
            other => Err(RatchetError::Config(format!("unknown mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    pub batch_size: usize,
    pub confidence_threshold: f64,
    pub mode: CampaignMode,
    pub max_consecutive_failures: u32,
    /// Fixed baseline; defaults to the count found at campaign start.
    pub regression_baseline: Option<usize>,
    pub validation_timeout_secs: u64,
    pub emergency_multiplier: usize,
    pub min_confidence: f64,
    pub decisive_weight: f64,
    pub context_lines: usize,
    pub escape_rules: Vec<String>,
    pub marker: String,
    /// Run record, summaries and checkpoint blobs live here.
    pub state_dir: PathBuf,
    /// Commit every validated step to git.
    pub git_commit: bool,
    /// Extra classification rules, merged over the built-in table by id.
    pub rules: Vec<Rule>,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let collector = CollectorConfig::default();
        let classifier = ClassifierSettings::default();
        Self {
            batch_size: 15,
            confidence_threshold: 0.7,
            mode: CampaignMode::Normal,
            max_consecutive_failures: 3,
            regression_baseline: None,
            validation_timeout_secs: 600,
            emergency_multiplier: 4,
            min_confidence: classifier.min_confidence,
            decisive_weight: classifier.decisive_weight,
            context_lines: collector.context_lines,
            escape_rules: collector.escape_rules,
            marker: collector.marker,
            state_dir: PathBuf::from(".ratchet"),
            git_commit: false,
            rules: Vec::new(),
        }
    }
}

impl CampaignConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(RatchetError::Config(msg));
        if self.batch_size == 0 {
            return fail("batch_size must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return fail(format!(
                "confidence_threshold must be within 0.0..=1.0, got {}",
                self.confidence_threshold
            ));
        }
        if self.max_consecutive_failures == 0 {
            return fail("max_consecutive_failures must be at least 1".to_string());
        }
        if self.emergency_multiplier == 0 {
            return fail("emergency_multiplier must be at least 1".to_string());
        }
        if self.validation_timeout_secs == 0 {
            return fail("validation_timeout_secs must be at least 1".to_string());
        }
        if self.marker.trim().is_empty() {
            return fail("marker must not be empty".to_string());
        }
        self.classifier_settings().validate()
    }

    pub fn classifier_settings(&self) -> ClassifierSettings {
        ClassifierSettings {
            decisive_weight: self.decisive_weight,
            min_confidence: self.min_confidence,
        }
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            escape_rules: self.escape_rules.clone(),
            marker: self.marker.clone(),
            context_lines: self.context_lines,
        }
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    /// Largest batch the current mode may form.
    pub fn effective_batch_size(&self) -> usize {
        match self.mode {
            CampaignMode::Normal => self.batch_size,
            CampaignMode::Conservative => 1,
            CampaignMode::Emergency => self.batch_size.saturating_mul(self.emergency_multiplier),
        }
    }
}
