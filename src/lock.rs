//! File-based locking so only one instance changes the firewall at a time.
//!
//! Uses flock-style advisory locking.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

pub const LOCK_FILE: &str = "/run/nft-blackhole.lock";

/// Holds an exclusive lock on the lock file until dropped
#[derive(Debug)]
pub struct LockGuard {
    _file: File,
}

impl LockGuard {
    /// Acquire the system-wide lock, failing if another instance holds it
    pub fn acquire() -> Result<Self> {
        Self::acquire_at(LOCK_FILE)
    }

    /// Acquire an exclusive lock on `path` without blocking.
    ///
    /// The file is opened with create+read+write and never truncated, so
    /// creation and locking cannot race.
    pub fn acquire_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let lock_path = path.as_ref();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).ok();
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

        fs::set_permissions(lock_path, fs::Permissions::from_mode(0o600))
            .context("Failed to set lock file permissions")?;

        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another instance of nft-blackhole is already running.\n\
                 If you believe this is an error, remove the lock file: {}",
                lock_path.display()
            )
        })?;

        Ok(Self { _file: file })
    }
}
