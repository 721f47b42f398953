//! Per-job named pipes and scratch directories.
//!
//! Everything created here lives under the configured temp root and is
//! removed only by an explicit `release(true)`. Dropping a handle leaves the
//! directory on disk, which is how failed evaluations keep their traces.
use anyhow::Context;
use minion::Mount;
use nix::{sys::stat::Mode, unistd::mkfifo};
use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

const FIFO_MOUNT_POINT: &str = "fifo";
const USER_TO_MANAGER: &str = "u_to_m";
const MANAGER_TO_USER: &str = "m_to_u";

fn make_dir(root: &Path, prefix: &str, mode: u32) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(root)
        .with_context(|| format!("failed to create temp root {}", root.display()))?;
    let dir = tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(root)
        .with_context(|| format!("failed to create {} directory", prefix))?
        .into_path();
    fs::set_permissions(&dir, fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to chmod {}", dir.display()))?;
    Ok(dir)
}

fn remove_dir(dir: &Path, delete: bool) -> anyhow::Result<()> {
    if !delete {
        debug!("retaining {}", dir.display());
        return Ok(());
    }
    fs::remove_dir_all(dir).with_context(|| format!("failed to remove {}", dir.display()))
}

/// Two FIFOs connecting manager and user process
#[derive(Debug)]
pub struct ChannelPair {
    dir: PathBuf,
}

impl ChannelPair {
    /// Creates directory with both FIFOs, or nothing at all
    pub fn create(temp_root: &Path) -> anyhow::Result<ChannelPair> {
        ChannelPair::create_with(temp_root, &[USER_TO_MANAGER, MANAGER_TO_USER])
    }

    fn create_with(temp_root: &Path, fifos: &[&str]) -> anyhow::Result<ChannelPair> {
        let dir = make_dir(temp_root, "fifo-", 0o755)?;
        let pair = ChannelPair { dir };
        if let Err(err) = pair.make_fifos(fifos) {
            if let Err(cleanup_err) = fs::remove_dir_all(&pair.dir) {
                warn!(
                    "failed to remove half-created channel {}: {}",
                    pair.dir.display(),
                    cleanup_err
                );
            }
            return Err(err);
        }
        debug!("created channel pair in {}", pair.dir.display());
        Ok(pair)
    }

    fn make_fifos(&self, fifos: &[&str]) -> anyhow::Result<()> {
        for name in fifos {
            let path = self.dir.join(name);
            mkfifo(&path, Mode::from_bits_truncate(0o666))
                .with_context(|| format!("mkfifo {} failed", path.display()))?;
            // mkfifo is subject to umask
            fs::set_permissions(&path, fs::Permissions::from_mode(0o666))
                .with_context(|| format!("failed to chmod {}", path.display()))?;
        }
        Ok(())
    }

    pub fn user_to_manager(&self) -> PathBuf {
        self.dir.join(USER_TO_MANAGER)
    }

    pub fn manager_to_user(&self) -> PathBuf {
        self.dir.join(MANAGER_TO_USER)
    }

    pub fn mount(&self) -> Mount {
        Mount {
            src: self.dir.clone(),
            dest: PathBuf::from(FIFO_MOUNT_POINT),
        }
    }

    /// `user_to_manager` as seen from inside a sandbox
    pub fn sandbox_user_to_manager(&self) -> PathBuf {
        Path::new(FIFO_MOUNT_POINT).join(USER_TO_MANAGER)
    }

    /// `manager_to_user` as seen from inside a sandbox
    pub fn sandbox_manager_to_user(&self) -> PathBuf {
        Path::new(FIFO_MOUNT_POINT).join(MANAGER_TO_USER)
    }

    /// Must only be called after both peers were waited for
    pub fn release(self, delete: bool) -> anyhow::Result<()> {
        remove_dir(&self.dir, delete)
    }
}

/// Writable directory shared between host and sandboxes
#[derive(Debug)]
pub struct ScratchDir {
    dir: PathBuf,
    mount_point: &'static str,
}

impl ScratchDir {
    pub fn create(temp_root: &Path, mount_point: &'static str) -> anyhow::Result<ScratchDir> {
        let dir = make_dir(temp_root, &format!("{}-", mount_point), 0o777)?;
        debug!("created {} directory {}", mount_point, dir.display());
        Ok(ScratchDir { dir, mount_point })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn mount(&self) -> Mount {
        Mount {
            src: self.dir.clone(),
            dest: PathBuf::from(self.mount_point),
        }
    }

    /// Path of the directory itself, as seen from inside a sandbox
    pub fn sandbox_dir(&self) -> PathBuf {
        PathBuf::from(self.mount_point)
    }

    /// Path of `file` inside the directory, as seen from inside a sandbox
    pub fn sandbox_path(&self, file: &str) -> PathBuf {
        Path::new(self.mount_point).join(file)
    }

    pub fn release(self, delete: bool) -> anyhow::Result<()> {
        remove_dir(&self.dir, delete)
    }
}
