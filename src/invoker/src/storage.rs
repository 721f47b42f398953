//! Content-addressed file storage
use anyhow::{bail, Context};
use invoker_api::Digest;
use sha2::{Digest as _, Sha256};
use std::{fs, io::Write, path::PathBuf};
use tracing::debug;

pub trait Storage: Send + Sync {
    fn get(&self, digest: &str) -> anyhow::Result<Vec<u8>>;

    /// Stores `data`, returning its digest. `description` is only logged.
    fn put(&self, data: &[u8], description: &str) -> anyhow::Result<Digest>;
}

/// Storage keeping every file as `<dir>/<sha256 hex>`
#[derive(Debug, Clone)]
pub struct FsStorage {
    dir: PathBuf,
}

impl FsStorage {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<FsStorage> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create storage dir {}", dir.display()))?;
        Ok(FsStorage { dir })
    }

    fn path_of(&self, digest: &str) -> anyhow::Result<PathBuf> {
        let well_formed = digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit());
        if !well_formed {
            bail!("malformed digest {:?}", digest);
        }
        Ok(self.dir.join(digest.to_ascii_lowercase()))
    }
}

pub fn digest_of(data: &[u8]) -> Digest {
    hex::encode(Sha256::digest(data))
}

impl Storage for FsStorage {
    fn get(&self, digest: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.path_of(digest)?;
        fs::read(&path).with_context(|| format!("file {} not found in storage", digest))
    }

    fn put(&self, data: &[u8], description: &str) -> anyhow::Result<Digest> {
        let digest = digest_of(data);
        let path = self.path_of(&digest)?;
        if path.exists() {
            return Ok(digest);
        }
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .context("failed to create temporary file in storage")?;
        tmp.write_all(data).context("failed to write temporary file")?;
        tmp.persist(&path)
            .with_context(|| format!("failed to persist {}", path.display()))?;
        debug!(digest = %digest, "stored {}", description);
        Ok(digest)
    }
}
