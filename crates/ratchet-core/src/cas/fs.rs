use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{BlobStore, CasError, Digest, Result};

/// Filesystem blob store with 2-char sharding.
///
/// Layout: `<root>/objects/<first 2 hex chars>/<remaining hex chars>`
pub struct FsBlobStore {
    objects_dir: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let objects_dir = root.as_ref().join("objects");
        fs::create_dir_all(&objects_dir)?;
        Ok(Self { objects_dir })
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, data: &[u8]) -> Result<Digest> {
        let digest = Digest::compute(data);
        let path = self.blob_path(&digest);
        if path.exists() {
            return Ok(digest);
        }

        let shard_dir = self.objects_dir.join(&digest.to_hex()[..2]);
        fs::create_dir_all(&shard_dir)?;

        // Write then rename so a crash never leaves a truncated blob behind.
        let mut tmp = NamedTempFile::new_in(&shard_dir)?;
        tmp.write_all(data)?;
        tmp.persist(&path).map_err(|e| e.error)?;

        Ok(digest)
    }

    fn get(&self, digest: &Digest) -> Result<Vec<u8>> {
        let data = fs::read(self.blob_path(digest)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CasError::NotFound(*digest)
            } else {
                CasError::Io(e)
            }
        })?;
        // A corrupted blob is as bad as a missing one for rollback purposes.
        if Digest::compute(&data) != *digest {
            return Err(CasError::NotFound(*digest));
        }
        Ok(data)
    }

    fn exists(&self, digest: &Digest) -> Result<bool> {
        Ok(self.blob_path(digest).exists())
    }
}
