//! Git integration: repository probing and committing confirmed batches.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::domain::error::CheckpointError;

/// Capture the HEAD commit SHA from a git repository.
pub fn capture_head_sha(repo_dir: &Path) -> Result<String, CheckpointError> {
    let sha = run_git(repo_dir, &["rev-parse", "HEAD"])?;
    if sha.is_empty() {
        return Err(CheckpointError::Commit(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }
    Ok(sha)
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn run_git(repo_dir: &Path, args: &[&str]) -> Result<String, CheckpointError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| CheckpointError::Commit(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CheckpointError::Commit(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Commits exactly the files a batch touched, leaving the rest of the index alone.
#[derive(Debug, Clone)]
pub struct GitCommitter {
    repo_dir: PathBuf,
}

impl GitCommitter {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    /// Stage and commit `files`, returning the new HEAD SHA.
    pub fn commit_paths(&self, files: &[PathBuf], message: &str) -> Result<String, CheckpointError> {
        if files.is_empty() {
            return capture_head_sha(&self.repo_dir);
        }
        let paths: Vec<String> = files.iter().map(|p| p.to_string_lossy().into_owned()).collect();

        let mut add = vec!["add", "--"];
        add.extend(paths.iter().map(String::as_str));
        run_git(&self.repo_dir, &add)?;

        let mut commit = vec!["commit", "--no-verify", "-m", message, "--"];
        commit.extend(paths.iter().map(String::as_str));
        run_git(&self.repo_dir, &commit)?;

        capture_head_sha(&self.repo_dir)
    }
}
