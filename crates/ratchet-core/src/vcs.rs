//! Version-control boundary: per-file snapshots, restore and commit.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::cas::{BlobStore, Digest};
use crate::domain::checkpoint::{CheckpointToken, CommitRef, FileSnapshot};
use crate::domain::error::CheckpointError;
use crate::git::GitCommitter;
use crate::workspace::Workspace;

/// Snapshot/restore/commit primitives the safety protocol relies on.
///
/// Snapshots are per file so that a checkpoint costs as much as the files a
/// batch touches, not the whole repository.
pub trait CheckpointStore: Send + Sync {
    fn snapshot(&self, files: &[PathBuf]) -> Result<CheckpointToken, CheckpointError>;

    /// Put every file back exactly as it was in `token`.
    fn restore(&self, token: &CheckpointToken) -> Result<(), CheckpointError>;

    /// Confirm the current content of `files` as a permanent step.
    fn commit(&self, files: &[PathBuf], message: &str) -> Result<CommitRef, CheckpointError>;
}

/// Checkpoints stored as content-addressed blobs, optionally committed to git.
pub struct CasCheckpointStore {
    workspace: Arc<dyn Workspace>,
    blobs: Arc<dyn BlobStore>,
    git: Option<GitCommitter>,
}

impl CasCheckpointStore {
    pub fn new(workspace: Arc<dyn Workspace>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            workspace,
            blobs,
            git: None,
        }
    }

    /// Record confirmed batches as git commits.
    pub fn with_git(mut self, committer: GitCommitter) -> Self {
        self.git = Some(committer);
        self
    }
}

impl CheckpointStore for CasCheckpointStore {
    fn snapshot(&self, files: &[PathBuf]) -> Result<CheckpointToken, CheckpointError> {
        let mut snapshots = Vec::with_capacity(files.len());
        for path in files {
            let digest = if self.workspace.exists(path) {
                let content = self
                    .workspace
                    .read(path)
                    .map_err(|e| CheckpointError::Snapshot {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                Some(self.blobs.put(content.as_bytes())?)
            } else {
                None
            };
            snapshots.push(FileSnapshot {
                path: path.clone(),
                digest,
            });
        }
        let token = CheckpointToken::new(snapshots);
        debug!(checkpoint = %token.id, files = files.len(), "checkpoint taken");
        Ok(token)
    }

    fn restore(&self, token: &CheckpointToken) -> Result<(), CheckpointError> {
        let restore_err = |reason: String| CheckpointError::Restore {
            checkpoint: token.id,
            reason,
        };

        for file in &token.files {
            match &file.digest {
                Some(digest) => {
                    let bytes = self.blobs.get(digest)?;
                    let content = String::from_utf8(bytes)
                        .map_err(|e| restore_err(format!("{}: {e}", file.path.display())))?;
                    self.workspace
                        .write(&file.path, &content)
                        .map_err(|e| restore_err(format!("{}: {e}", file.path.display())))?;

                    let back = self
                        .workspace
                        .read(&file.path)
                        .map_err(|e| restore_err(format!("{}: {e}", file.path.display())))?;
                    let actual = Digest::compute(back.as_bytes());
                    if actual != *digest {
                        return Err(CheckpointError::DigestMismatch {
                            path: file.path.clone(),
                            expected: digest.to_hex(),
                            actual: actual.to_hex(),
                        });
                    }
                }
                None => self
                    .workspace
                    .remove(&file.path)
                    .map_err(|e| restore_err(format!("{}: {e}", file.path.display())))?,
            }
        }
        debug!(checkpoint = %token.id, "checkpoint restored");
        Ok(())
    }

    fn commit(&self, files: &[PathBuf], message: &str) -> Result<CommitRef, CheckpointError> {
        if let Some(git) = &self.git {
            return git.commit_paths(files, message).map(CommitRef);
        }

        // Without git the confirmed step is identified by the content it confirmed.
        let mut fields: Vec<Vec<u8>> = Vec::with_capacity(files.len() * 2);
        for path in files {
            let content = self
                .workspace
                .read(path)
                .map_err(|e| CheckpointError::Commit(format!("{}: {e}", path.display())))?;
            self.blobs.put(content.as_bytes())?;
            fields.push(path.to_string_lossy().into_owned().into_bytes());
            fields.push(Digest::compute(content.as_bytes()).to_hex().into_bytes());
        }
        let id = Digest::of_fields(fields.iter().map(Vec::as_slice));
        Ok(CommitRef(format!("local:{}", id.short())))
    }
}
