//! Stage execution.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::stage::StageConfig;

/// Result of a stage execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }
}

/// Why a stage produced no result at all.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("stage {0} has empty command")]
    EmptyCommand(String),

    #[error("stage {stage} could not be started: {source}")]
    Spawn {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stage {stage} timed out after {secs} seconds")]
    TimedOut { stage: String, secs: u64 },

    #[error("stage {stage} failed while running: {source}")]
    Wait {
        stage: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs stages as child processes.
pub struct StageRunner;

impl StageRunner {
    /// Execute a single stage in `cwd` and return the result.
    ///
    /// The child is killed when the stage times out or the returned future is
    /// dropped.
    pub async fn execute_stage(config: &StageConfig, cwd: &Path) -> Result<StageResult, StageError> {
        let start = Instant::now();

        let Some((exe, args)) = config.command.split_first() else {
            return Err(StageError::EmptyCommand(config.name.clone()));
        };

        debug!(stage = %config.name, command = ?config.command, cwd = %cwd.display(), "stage started");
        let child = Command::new(exe)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StageError::Spawn {
                stage: config.name.clone(),
                source,
            })?;

        let wait = child.wait_with_output();
        let output = if config.timeout_secs > 0 {
            match tokio::time::timeout(Duration::from_secs(config.timeout_secs), wait).await {
                Ok(output) => output,
                Err(_) => {
                    warn!(stage = %config.name, secs = config.timeout_secs, "stage timed out");
                    return Err(StageError::TimedOut {
                        stage: config.name.clone(),
                        secs: config.timeout_secs,
                    });
                }
            }
        } else {
            wait.await
        }
        .map_err(|source| StageError::Wait {
            stage: config.name.clone(),
            source,
        })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let success = output.status.success();
        debug!(stage = %config.name, exit_code, duration_ms, "stage finished");

        Ok(StageResult {
            stage_name: config.name.clone(),
            exit_code,
            stdout,
            stderr,
            duration_ms,
            success,
        })
    }
}
