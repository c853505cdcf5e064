//! Lint analyzer run as an external command.

use std::path::PathBuf;

use async_trait::async_trait;
use ratchet_core::{Analyzer, AnalyzerOutput, CollectionError};
use tracing::debug;

use crate::runner::StageRunner;
use crate::stage::StageConfig;

/// Runs one analyzer stage (e.g. `eslint --format json`) and hands its raw
/// output to the signal collector.
pub struct CommandAnalyzer {
    stage: StageConfig,
    cwd: PathBuf,
}

impl CommandAnalyzer {
    pub fn new(stage: StageConfig, cwd: impl Into<PathBuf>) -> Self {
        Self {
            stage,
            cwd: cwd.into(),
        }
    }

    pub fn stage(&self) -> &StageConfig {
        &self.stage
    }
}

#[async_trait]
impl Analyzer for CommandAnalyzer {
    async fn run(&self) -> Result<AnalyzerOutput, CollectionError> {
        let result = StageRunner::execute_stage(&self.stage, &self.cwd)
            .await
            .map_err(|e| CollectionError::Spawn(e.to_string()))?;
        debug!(
            stage = %result.stage_name,
            exit_code = result.exit_code,
            stdout_bytes = result.stdout.len(),
            "analyzer finished"
        );
        Ok(AnalyzerOutput {
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_output_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = CommandAnalyzer::new(
            StageConfig::shell("lint", "echo '[]'; echo warn >&2; exit 1", 60),
            dir.path(),
        );
        let out = analyzer.run().await.unwrap();
        assert_eq!(out.exit_code, 1);
        assert_eq!(out.stdout.trim(), "[]");
        assert_eq!(out.stderr.trim(), "warn");
    }

    #[tokio::test]
    async fn test_timeout_is_collection_error() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = CommandAnalyzer::new(StageConfig::shell("lint", "sleep 5", 1), dir.path());
        match analyzer.run().await {
            Err(CollectionError::Spawn(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected spawn error, got {other:?}"),
        }
    }
}
