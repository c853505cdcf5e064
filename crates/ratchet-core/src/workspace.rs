//! Source tree access.
//!
//! All file reads and writes made by the collector and the safety protocol go
//! through [`Workspace`], so the whole pipeline runs against an in-memory tree
//! in tests.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Read/write access to the files of the codebase under campaign.
///
/// Paths are relative to [`Workspace::root`].
pub trait Workspace: Send + Sync {
    fn root(&self) -> &Path;

    fn read(&self, path: &Path) -> std::io::Result<String>;

    /// Replace the full content of `path`.
    fn write(&self, path: &Path, content: &str) -> std::io::Result<()>;

    fn remove(&self, path: &Path) -> std::io::Result<()>;

    fn exists(&self, path: &Path) -> bool;
}

/// Strip `root` from an absolute diagnostic path; relative paths pass through.
pub fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Workspace backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct FsWorkspace {
    root: PathBuf,
}

impl FsWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl Workspace for FsWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, path: &Path) -> std::io::Result<String> {
        fs::read_to_string(self.resolve(path))
    }

    fn write(&self, path: &Path, content: &str) -> std::io::Result<()> {
        let full = self.resolve(path);
        let dir = full.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        // Write then rename: the type-checker must never observe a half-written file.
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&full).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> std::io::Result<()> {
        match fs::remove_file(self.resolve(path)) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }
}
