//! The private staging directory.
//!
//! Holds downloaded artifacts, the transfer lock, the install lock, the
//! per-attempt watchdog copy with its log, and the outcome markers.

use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::constants::{PARTIAL_EXTENSION, TRANSFER_LOCK_FILE, WATCHDOG_PREFIX, stale_lock_ttl};
use crate::core::UpdateError;
use crate::upgrade::install_lock;
use crate::utils::fs::remove_file_if_exists;

/// What [`StagingArea::clean_up_stale`] removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_locks: usize,
    pub removed_partials: usize,
    pub removed_watchdogs: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.removed_locks + self.removed_partials + self.removed_watchdogs
    }
}

#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where an artifact named `filename` is staged.
    pub fn artifact_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    pub async fn ensure(&self) -> Result<(), UpdateError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| UpdateError::filesystem("create", &self.dir, e))
    }

    /// Take the transfer lock without waiting.
    ///
    /// Fails with [`UpdateError::TransferInProgress`] while another transfer
    /// holds it. A lock file left by a crashed process is not held by
    /// anyone, so it never blocks.
    pub async fn lock_transfer(&self) -> Result<TransferLock, UpdateError> {
        self.ensure().await?;
        let path = self.dir.join(TRANSFER_LOCK_FILE);

        let open_path = path.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new().create(true).write(true).truncate(false).open(&open_path)
        })
        .await
        .map_err(|e| UpdateError::filesystem("open", &path, std::io::Error::other(e)))?
        .map_err(|e| UpdateError::filesystem("open", &path, e))?;

        let (file, acquired) = tokio::task::spawn_blocking(move || {
            let acquired = file.try_lock_exclusive();
            (file, acquired)
        })
        .await
        .map_err(|e| UpdateError::filesystem("lock", &path, std::io::Error::other(e)))?;

        match acquired {
            Ok(true) => {
                debug!("Transfer lock acquired at {}", path.display());
                Ok(TransferLock { file, path })
            }
            Ok(false) => Err(UpdateError::TransferInProgress {
                lock: path.display().to_string(),
            }),
            Err(e) => Err(UpdateError::filesystem("lock", &path, e)),
        }
    }

    /// Remove leftovers from crashed or finished attempts.
    ///
    /// - the transfer lock, unless a live transfer holds it (or, when the lock
    ///   cannot be probed, unless it is younger than the stale TTL)
    /// - `*.partial` files, unless a transfer is running
    /// - stale install locks
    /// - `watchdog-*` copies and scripts, unless an install is running
    pub async fn clean_up_stale(&self) -> Result<CleanupReport, UpdateError> {
        let mut report = CleanupReport::default();
        if !self.dir.exists() {
            return Ok(report);
        }

        let lock_existed = self.dir.join(TRANSFER_LOCK_FILE).exists();
        let transfer_active = match self.lock_transfer().await {
            Ok(lock) => {
                lock.release();
                if lock_existed {
                    report.removed_locks += 1;
                }
                false
            }
            Err(UpdateError::TransferInProgress { .. }) => true,
            Err(e) => {
                warn!("Could not probe transfer lock: {e}");
                let path = self.dir.join(TRANSFER_LOCK_FILE);
                if is_older_than_ttl(&path).await {
                    if remove_file_if_exists(&path).await.unwrap_or(false) {
                        report.removed_locks += 1;
                    }
                    false
                } else {
                    true
                }
            }
        };

        let install_lock_existed = install_lock::lock_path(&self.dir).exists();
        let install_active = match install_lock::ensure_available(&self.dir).await {
            Ok(()) => {
                if install_lock_existed {
                    report.removed_locks += 1;
                }
                false
            }
            Err(UpdateError::InstallInProgress { pid }) => {
                debug!("Install in progress (pid {pid}); keeping watchdog files");
                true
            }
            Err(e) => return Err(e),
        };

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| UpdateError::filesystem("list", &self.dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| UpdateError::filesystem("list", &self.dir, e))?
        {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();

            let is_partial = path.extension().is_some_and(|ext| ext == PARTIAL_EXTENSION);
            let is_watchdog = name.starts_with(WATCHDOG_PREFIX);

            if is_partial && !transfer_active {
                if remove_leftover(&path).await {
                    report.removed_partials += 1;
                }
            } else if is_watchdog && !install_active && remove_leftover(&path).await {
                report.removed_watchdogs += 1;
            }
        }

        if report.total() > 0 {
            info!(
                locks = report.removed_locks,
                partials = report.removed_partials,
                watchdogs = report.removed_watchdogs,
                "Cleaned up stale staging files"
            );
        }
        Ok(report)
    }
}

async fn remove_leftover(path: &Path) -> bool {
    match remove_file_if_exists(path).await {
        Ok(removed) => removed,
        Err(e) => {
            warn!("Could not remove {}: {e}", path.display());
            false
        }
    }
}

async fn is_older_than_ttl(path: &Path) -> bool {
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };
    metadata
        .modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > stale_lock_ttl())
}

/// Exclusive transfer lock; unlocked and removed on drop.
pub struct TransferLock {
    file: File,
    path: PathBuf,
}

impl TransferLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlock and delete the lock file now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for TransferLock {
    fn drop(&mut self) {
        // Remove before unlocking so nobody can lock a file that is about to vanish.
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            debug!("Failed to remove transfer lock {}: {e}", self.path.display());
        }
        #[allow(unstable_name_collisions)]
        if let Err(e) = self.file.unlock() {
            debug!("Failed to unlock {}: {e}", self.path.display());
        }
    }
}
