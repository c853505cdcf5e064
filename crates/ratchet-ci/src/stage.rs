//! Command stage definitions and configuration.

use serde::{Deserialize, Serialize};

/// Builtin stages for a TypeScript project.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStage {
    /// npx eslint --format json .
    EslintJson,

    /// npx eslint --format unix .
    EslintUnix,

    /// npx tsc --noEmit --pretty false
    Tsc,
}

impl BuiltinStage {
    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStage::EslintJson => "eslint_json",
            BuiltinStage::EslintUnix => "eslint_unix",
            BuiltinStage::Tsc => "tsc",
        }
    }

    /// Get the stage's command.
    pub fn command(&self) -> Vec<String> {
        let argv: &[&str] = match self {
            BuiltinStage::EslintJson => &["npx", "eslint", "--format", "json", "."],
            BuiltinStage::EslintUnix => &["npx", "eslint", "--format", "unix", "."],
            BuiltinStage::Tsc => &["npx", "tsc", "--noEmit", "--pretty", "false"],
        };
        argv.iter().map(|s| s.to_string()).collect()
    }
}

fn default_enabled() -> bool {
    true
}

/// Configuration for one command stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Timeout in seconds; 0 disables the stage's own timeout.
    pub timeout_secs: u64,

    /// Whether this stage is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl StageConfig {
    /// Create a new stage configuration from a builtin stage.
    pub fn from_builtin(stage: BuiltinStage, timeout_secs: u64) -> Self {
        Self {
            name: stage.name().to_string(),
            command: stage.command(),
            timeout_secs,
            enabled: true,
        }
    }

    /// Create a custom stage configuration.
    pub fn custom(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            timeout_secs,
            enabled: true,
        }
    }

    /// Shell one-liner run through `sh -c`.
    pub fn shell(name: impl Into<String>, script: &str, timeout_secs: u64) -> Self {
        Self::custom(
            name,
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout_secs,
        )
    }

    /// Disable this stage.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_stage_names() {
        assert_eq!(BuiltinStage::EslintJson.name(), "eslint_json");
        assert_eq!(BuiltinStage::EslintUnix.name(), "eslint_unix");
        assert_eq!(BuiltinStage::Tsc.name(), "tsc");
    }

    #[test]
    fn test_builtin_stage_commands() {
        let eslint = BuiltinStage::EslintJson.command();
        assert_eq!(eslint[0], "npx");
        assert!(eslint.contains(&"json".to_string()));

        let tsc = BuiltinStage::Tsc.command();
        assert!(tsc.contains(&"--noEmit".to_string()));
    }

    #[test]
    fn test_stage_config_shell() {
        let config = StageConfig::shell("grep", "grep -rn any src", 60);
        assert_eq!(config.command, vec!["sh", "-c", "grep -rn any src"]);
        assert_eq!(config.timeout_secs, 60);
        assert!(config.enabled);
    }

    #[test]
    fn test_stage_config_enabled_by_default() {
        let config: StageConfig = serde_json::from_str(
            r#"{"name": "tsc", "command": ["npx", "tsc", "--noEmit"], "timeout_secs": 900}"#,
        )
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.command.len(), 3);
    }

    #[test]
    fn test_stage_config_disabled() {
        let config = StageConfig::from_builtin(BuiltinStage::Tsc, 300).disabled();
        assert!(!config.enabled);
        assert_eq!(config.name, "tsc");
    }
}
