//! Persisted campaign record (`<state_dir>/campaign.json`) and the journal of
//! the checkpoint whose trial is in flight (`<state_dir>/inflight.json`).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::checkpoint::CheckpointToken;
use crate::domain::error::{RatchetError, Result};
use crate::domain::run::{CampaignRecord, CampaignStatus};

const RECORD_FILE: &str = "campaign.json";
const INFLIGHT_FILE: &str = "inflight.json";

/// Write `bytes` to `path` via a temp file in the same directory.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| RatchetError::Io(e.error))?;
    Ok(())
}

/// Owns the run record on disk. At most one unfinished campaign per state dir.
#[derive(Debug, Clone)]
pub struct RunStateStore {
    dir: PathBuf,
}

impl RunStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self) -> PathBuf {
        self.dir.join(RECORD_FILE)
    }

    /// Directory holding the artifacts of one run.
    pub fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.dir.join("runs").join(run_id.to_string())
    }

    pub fn load(&self) -> Result<Option<CampaignRecord>> {
        let path = self.record_path();
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    pub fn save(&self, record: &CampaignRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.record_path(), &json)?;
        debug!(run_id = %record.run_id, status = ?record.status, "run record saved");
        Ok(())
    }

    /// Start a new record, refusing while another campaign is unfinished.
    pub fn begin(&self, baseline: usize) -> Result<CampaignRecord> {
        if let Some(existing) = self.load()? {
            if existing.status.is_unfinished() {
                return Err(RatchetError::CampaignInProgress {
                    run_id: existing.run_id,
                });
            }
        }
        let record = CampaignRecord::new(baseline);
        self.save(&record)?;
        Ok(record)
    }

    /// Reopen the unfinished record for another pass.
    pub fn resume(&self) -> Result<CampaignRecord> {
        let mut record = self
            .load()?
            .ok_or_else(|| RatchetError::NoCampaign(self.record_path()))?;
        if !record.status.is_unfinished() {
            return Err(RatchetError::CampaignFinished {
                run_id: record.run_id,
            });
        }
        record.status = CampaignStatus::Running;
        record.touch();
        self.save(&record)?;
        Ok(record)
    }

    /// Mark the unfinished record aborted so a new campaign can start.
    pub fn abandon(&self, reason: &str) -> Result<CampaignRecord> {
        let mut record = self
            .load()?
            .ok_or_else(|| RatchetError::NoCampaign(self.record_path()))?;
        if !record.status.is_unfinished() {
            return Err(RatchetError::CampaignFinished {
                run_id: record.run_id,
            });
        }
        record.status = CampaignStatus::Aborted;
        record.abort_reason = Some(format!("abandoned: {reason}"));
        record.touch();
        self.save(&record)?;
        info!(run_id = %record.run_id, "campaign abandoned");
        Ok(record)
    }

    pub fn inflight_path(&self) -> PathBuf {
        self.dir.join(INFLIGHT_FILE)
    }

    /// Journal the checkpoint of a trial before its edits are written.
    pub fn record_inflight(&self, token: &CheckpointToken) -> Result<()> {
        let json = serde_json::to_vec_pretty(token)?;
        write_atomic(&self.inflight_path(), &json)?;
        debug!(checkpoint = %token.id, "in-flight checkpoint journaled");
        Ok(())
    }

    /// Drop the journal once the trial was committed or rolled back.
    pub fn clear_inflight(&self) -> Result<()> {
        match fs::remove_file(self.inflight_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Checkpoint of a trial that never finished, left behind by a killed process.
    pub fn load_inflight(&self) -> Result<Option<CheckpointToken>> {
        let path = self.inflight_path();
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }
}
