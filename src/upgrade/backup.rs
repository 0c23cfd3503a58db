use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::constants::BACKUP_SUFFIX;
use crate::core::UpdateError;

/// Backup and restoration of the target executable during a swap.
///
/// The backup is a copy of the target with a `.backup` suffix in the same
/// directory, so restoring never crosses file systems. A stale backup from an
/// earlier failed attempt is overwritten.
///
/// # Examples
///
/// ```rust,no_run
/// use appswap::upgrade::backup::BackupManager;
/// use std::path::PathBuf;
///
/// # async fn example() -> Result<(), appswap::core::UpdateError> {
/// let backup = BackupManager::new(PathBuf::from("/opt/app/app"));
/// backup.create_backup().await?;
///
/// // ... replace the executable ...
///
/// let replacement_failed = false;
/// if replacement_failed {
///     backup.restore_backup().await?;
/// } else {
///     backup.cleanup_backup().await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct BackupManager {
    original_path: PathBuf,
    backup_path: PathBuf,
    restore_attempts: u32,
    retry_delay: Duration,
}

impl BackupManager {
    /// Create a manager for `executable_path`; the backup lives at
    /// `<executable_path>.backup`.
    pub fn new(executable_path: PathBuf) -> Self {
        let backup_path = Self::backup_path_for(&executable_path);
        Self {
            original_path: executable_path,
            backup_path,
            restore_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Override the restore retry budget.
    #[must_use]
    pub fn with_restore_policy(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.restore_attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Backup location for a given executable.
    pub fn backup_path_for(executable_path: &Path) -> PathBuf {
        let mut backup_path = executable_path.to_path_buf();
        backup_path.set_file_name(format!(
            "{}.{BACKUP_SUFFIX}",
            executable_path.file_name().unwrap_or_default().to_string_lossy()
        ));
        backup_path
    }

    /// Copy the target to the backup location, preserving Unix permissions.
    pub async fn create_backup(&self) -> Result<(), UpdateError> {
        if !self.original_path.exists() {
            return Err(UpdateError::missing("target executable", &self.original_path));
        }

        if self.backup_path.exists() {
            debug!("Removing stale backup at {}", self.backup_path.display());
            fs::remove_file(&self.backup_path)
                .await
                .map_err(|e| UpdateError::filesystem("remove stale backup", &self.backup_path, e))?;
        }

        info!("Creating backup at {}", self.backup_path.display());
        fs::copy(&self.original_path, &self.backup_path)
            .await
            .map_err(|e| UpdateError::filesystem("back up", &self.original_path, e))?;

        #[cfg(unix)]
        copy_permissions(&self.original_path, &self.backup_path).await?;

        Ok(())
    }

    /// Put the backup back in place of the target.
    ///
    /// Retried because the target may still be held open briefly by a process
    /// that was just killed.
    pub async fn restore_backup(&self) -> Result<(), UpdateError> {
        if !self.backup_path.exists() {
            return Err(UpdateError::missing("backup", &self.backup_path));
        }

        warn!("Restoring from backup at {}", self.backup_path.display());

        let mut attempt = 1;
        loop {
            match self.attempt_restore().await {
                Ok(()) => {
                    info!("Restored {} from backup", self.original_path.display());
                    return Ok(());
                }
                Err(e) if attempt < self.restore_attempts => {
                    warn!("Restore attempt {attempt} failed: {e}. Retrying...");
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt_restore(&self) -> Result<(), UpdateError> {
        if self.original_path.exists() {
            fs::remove_file(&self.original_path)
                .await
                .map_err(|e| UpdateError::filesystem("remove", &self.original_path, e))?;
        }

        fs::copy(&self.backup_path, &self.original_path)
            .await
            .map_err(|e| UpdateError::filesystem("restore", &self.original_path, e))?;

        #[cfg(unix)]
        copy_permissions(&self.backup_path, &self.original_path).await?;

        Ok(())
    }

    /// Delete the backup; a missing backup is fine.
    pub async fn cleanup_backup(&self) -> Result<(), UpdateError> {
        if self.backup_path.exists() {
            debug!("Cleaning up backup at {}", self.backup_path.display());
            fs::remove_file(&self.backup_path)
                .await
                .map_err(|e| UpdateError::filesystem("remove backup", &self.backup_path, e))?;
        }
        Ok(())
    }

    pub fn backup_exists(&self) -> bool {
        self.backup_path.exists()
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }
}

/// Give `to` the permission bits of `from`.
#[cfg(unix)]
pub(crate) async fn copy_permissions(from: &Path, to: &Path) -> Result<(), UpdateError> {
    let permissions = fs::metadata(from)
        .await
        .map_err(|e| UpdateError::filesystem("read metadata of", from, e))?
        .permissions();
    fs::set_permissions(to, permissions)
        .await
        .map_err(|e| UpdateError::filesystem("set permissions on", to, e))
}
