//! Type-check gate: the validation step of every safety-protocol trial.

use std::path::PathBuf;

use async_trait::async_trait;
use ratchet_core::{CheckerError, TypeChecker, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::runner::{StageError, StageResult, StageRunner};
use crate::stage::StageConfig;

/// Gate evaluation verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

impl GateVerdict {
    /// Evaluate stage results: every stage must have exited 0.
    pub fn evaluate(results: &[StageResult]) -> Self {
        let violations: Vec<String> = results
            .iter()
            .filter(|r| !r.passed())
            .map(|r| format!("stage '{}' exited with code {}", r.stage_name, r.exit_code))
            .collect();

        let passed = violations.is_empty();
        let message = if passed {
            "All stages passed".to_string()
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        Self {
            passed,
            violations,
            message,
        }
    }
}

/// Runs the configured checker stages in order and stops at the first failure.
pub struct CommandGate {
    stages: Vec<StageConfig>,
    cwd: PathBuf,
}

impl CommandGate {
    pub fn new(stages: Vec<StageConfig>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            stages,
            cwd: cwd.into(),
        }
    }

    /// Run every enabled stage until one fails.
    pub async fn run(&self) -> Result<Vec<StageResult>, StageError> {
        let mut results = Vec::new();
        for stage in self.stages.iter().filter(|s| s.enabled) {
            let result = StageRunner::execute_stage(stage, &self.cwd).await?;
            let failed = !result.passed();
            results.push(result);
            if failed {
                break;
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl TypeChecker for CommandGate {
    async fn check(&self) -> Result<Validation, CheckerError> {
        let results = match self.run().await {
            Ok(results) => results,
            Err(e @ StageError::TimedOut { .. }) => return Ok(Validation::fail(e.to_string())),
            Err(e) => return Err(CheckerError(e.to_string())),
        };

        let verdict = GateVerdict::evaluate(&results);
        if verdict.passed {
            debug!(stages = results.len(), "gate passed");
            return Ok(Validation::pass());
        }

        info!(violations = ?verdict.violations, "gate failed");
        let mut diagnostics = String::new();
        if let Some(failed) = results.iter().find(|r| !r.passed()) {
            for text in [failed.stdout.trim(), failed.stderr.trim()] {
                if !text.is_empty() {
                    diagnostics.push_str(text);
                    diagnostics.push('\n');
                }
            }
        }
        diagnostics.push_str(&verdict.violations.join("\n"));
        Ok(Validation::fail(diagnostics))
    }
}
