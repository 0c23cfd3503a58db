//! Install lock: at most one install job in flight.
//!
//! The lock is a small JSON record (`pid`, `job_id`, `started_at`) in the
//! staging directory. The orchestrator writes it under its own pid before it
//! spawns the watchdog; the watchdog adopts it by job id on startup and
//! deletes it when it exits. A record is stale when its process is gone, when the pid
//! now belongs to a process started later, or when it is older than the TTL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::constants::{INSTALL_LOCK_FILE, stale_lock_ttl};
use crate::core::UpdateError;
use crate::utils::fs::{atomic_write, remove_file_if_exists};

/// Clock skew allowed between the recorded start and the process start time.
const PID_REUSE_SLACK_SECS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallLockRecord {
    pub pid: u32,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
}

impl InstallLockRecord {
    pub fn new(pid: u32, job_id: impl Into<String>) -> Self {
        Self {
            pid,
            job_id: job_id.into(),
            started_at: Utc::now(),
        }
    }

    /// Whether the recorded process still looks like the lock owner.
    pub fn is_live(&self) -> bool {
        let age = Utc::now().signed_duration_since(self.started_at);
        if age.to_std().is_ok_and(|age| age > stale_lock_ttl()) {
            return false;
        }

        let pid = Pid::from_u32(self.pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing(),
        );

        match system.process(pid) {
            None => false,
            Some(process) => {
                let started = i64::try_from(process.start_time()).unwrap_or(i64::MAX);
                started <= self.started_at.timestamp() + PID_REUSE_SLACK_SECS
            }
        }
    }
}

pub fn lock_path(staging_dir: &Path) -> PathBuf {
    staging_dir.join(INSTALL_LOCK_FILE)
}

/// Read the current record, if any. An unreadable record counts as absent.
pub async fn read(staging_dir: &Path) -> Option<InstallLockRecord> {
    let path = lock_path(staging_dir);
    let content = tokio::fs::read_to_string(&path).await.ok()?;
    match serde_json::from_str(&content) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Ignoring unreadable install lock {}: {e}", path.display());
            None
        }
    }
}

/// Fail with [`UpdateError::InstallInProgress`] if a live install holds the
/// lock; remove the lock if it is stale.
pub async fn ensure_available(staging_dir: &Path) -> Result<(), UpdateError> {
    let path = lock_path(staging_dir);
    if !path.exists() {
        return Ok(());
    }

    match read(staging_dir).await {
        Some(record) if record.is_live() => {
            return Err(UpdateError::InstallInProgress { pid: record.pid });
        }
        Some(record) => info!("Removing stale install lock left by pid {}", record.pid),
        None => info!("Removing unreadable install lock"),
    }

    remove_file_if_exists(&path)
        .await
        .map_err(|e| UpdateError::filesystem("remove", &path, e))?;
    Ok(())
}

/// Record `record` as the lock owner.
pub async fn write(staging_dir: &Path, record: &InstallLockRecord) -> Result<(), UpdateError> {
    let path = lock_path(staging_dir);
    let content = serde_json::to_vec_pretty(record)
        .map_err(|e| UpdateError::filesystem("serialize", &path, std::io::Error::other(e)))?;

    let target = path.clone();
    tokio::task::spawn_blocking(move || atomic_write(&target, &content))
        .await
        .map_err(|e| UpdateError::filesystem("write", &path, std::io::Error::other(e)))?
        .map_err(|e| UpdateError::filesystem("write", &path, std::io::Error::other(format!("{e:#}"))))?;
    Ok(())
}

/// Lock held by a running watchdog; the file is removed on drop.
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
}

impl InstallLock {
    /// Take the lock for `job_id` in the current process.
    ///
    /// A record for the same job (written by the orchestrator at handoff) or
    /// a stale record is replaced. A live record for another job is refused.
    pub async fn acquire(staging_dir: &Path, job_id: &str) -> Result<Self, UpdateError> {
        let own_pid = std::process::id();

        if let Some(existing) = read(staging_dir).await
            && existing.job_id != job_id
            && existing.pid != own_pid
            && existing.is_live()
        {
            return Err(UpdateError::InstallInProgress { pid: existing.pid });
        }

        write(staging_dir, &InstallLockRecord::new(own_pid, job_id)).await?;
        debug!("Install lock acquired for job {job_id}");
        Ok(Self {
            path: lock_path(staging_dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            debug!("Failed to remove install lock {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let temp = TempDir::new().unwrap();
        let lock = InstallLock::acquire(temp.path(), "job-1").await.unwrap();
        assert!(lock.path().exists());

        let record = read(temp.path()).await.unwrap();
        assert_eq!(record.pid, std::process::id());
        assert!(record.is_live());

        drop(lock);
        assert!(!lock_path(temp.path()).exists());
    }

    #[tokio::test]
    async fn test_live_lock_blocks_new_install() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), &InstallLockRecord::new(std::process::id(), "job-1"))
            .await
            .unwrap();

        let err = ensure_available(temp.path()).await.unwrap_err();
        assert!(matches!(err, UpdateError::InstallInProgress { .. }));
    }

    #[tokio::test]
    async fn test_expired_lock_is_removed() {
        let temp = TempDir::new().unwrap();
        let mut record = InstallLockRecord::new(std::process::id(), "job-1");
        record.started_at = Utc::now() - chrono::Duration::hours(2);
        write(temp.path(), &record).await.unwrap();

        assert!(!record.is_live());
        ensure_available(temp.path()).await.unwrap();
        assert!(!lock_path(temp.path()).exists());
    }

    #[tokio::test]
    async fn test_garbage_lock_is_removed() {
        let temp = TempDir::new().unwrap();
        std::fs::write(lock_path(temp.path()), "not json").unwrap();

        ensure_available(temp.path()).await.unwrap();
        assert!(!lock_path(temp.path()).exists());
    }

    #[tokio::test]
    async fn test_watchdog_adopts_handoff_record() {
        let temp = TempDir::new().unwrap();
        // The orchestrator wrote the lock under its own pid and the same job id.
        write(temp.path(), &InstallLockRecord::new(1, "job-7")).await.unwrap();

        let _lock = InstallLock::acquire(temp.path(), "job-7").await.unwrap();
        assert_eq!(read(temp.path()).await.unwrap().pid, std::process::id());
    }
}
