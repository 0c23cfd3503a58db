//! The watchdog/installer state machine.
//!
//! Runs in its own detached process after the host hands off. It receives
//! exactly three paths (target executable, staged artifact, its own path) and
//! coordinates with the host only through files in the directory holding its
//! own path: the install lock, its log, and one outcome marker.
//!
//! ```text
//! Verify -> Terminate -> Backup -> Replace -> VerifyReplacement -> Cleanup
//!    \          \           \         \              \
//!     +----------+-----------+---------+--------------+--> Rollback
//! ```
//!
//! Failures before `Replace` leave the target untouched. Once the target has
//! been deleted, a failure restores it from the backup. A target that is
//! already missing when the run starts is restored from a backup left by an
//! earlier attempt. Only a backup written by this run is ever deleted. Either
//! way the watchdog tries to leave a running host behind and writes exactly
//! one error marker.

pub mod script;

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, error, info, warn};

use crate::config::WatchdogSettings;
use crate::constants::WATCHDOG_PREFIX;
use crate::core::UpdateError;
use crate::upgrade::backup::BackupManager;
use crate::upgrade::install_lock::InstallLock;
use crate::upgrade::markers::{InstallOutcome, OutcomeMarkers};
use crate::upgrade::process::HostControl;
use crate::upgrade::verification::ChecksumVerifier;
use crate::utils::fs::remove_file_if_exists;
use crate::utils::platform::process_name_for;

/// The three positional arguments every watchdog variant accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPaths {
    /// Executable to replace
    pub target: PathBuf,
    /// Verified artifact in the staging directory
    pub staged: PathBuf,
    /// The watchdog's own path; its directory is the marker directory
    pub watchdog: PathBuf,
}

impl InstallPaths {
    /// Parse the positional arguments (program name already stripped).
    pub fn from_args<I>(args: I) -> Result<Self, UpdateError>
    where
        I: IntoIterator<Item = OsString>,
    {
        let args: Vec<OsString> = args.into_iter().collect();
        match <[OsString; 3]>::try_from(args) {
            Ok([target, staged, watchdog]) => Ok(Self {
                target: PathBuf::from(target),
                staged: PathBuf::from(staged),
                watchdog: PathBuf::from(watchdog),
            }),
            Err(args) => Err(UpdateError::Config {
                message: format!(
                    "expected 3 arguments (target, staged artifact, watchdog path), got {}",
                    args.len()
                ),
            }),
        }
    }

    pub fn to_args(&self) -> Vec<OsString> {
        vec![
            self.target.clone().into_os_string(),
            self.staged.clone().into_os_string(),
            self.watchdog.clone().into_os_string(),
        ]
    }

    /// Directory where markers, lock and log live.
    pub fn marker_dir(&self) -> PathBuf {
        match self.watchdog.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Per-attempt identifier, taken from the watchdog file name.
    pub fn job_id(&self) -> String {
        let stem = self.watchdog_stem();
        stem.strip_prefix(WATCHDOG_PREFIX).map(str::to_string).unwrap_or(stem)
    }

    /// `<watchdog-stem>.log` next to the watchdog.
    pub fn log_path(&self) -> PathBuf {
        self.marker_dir().join(format!("{}.log", self.watchdog_stem()))
    }

    /// Whether the watchdog runs from a per-attempt copy it may delete.
    pub fn is_per_attempt_copy(&self) -> bool {
        self.watchdog_stem().starts_with(WATCHDOG_PREFIX)
    }

    fn watchdog_stem(&self) -> String {
        self.watchdog
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "watchdog".to_string())
    }
}

/// State machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Verify,
    Terminate,
    Backup,
    Replace,
    VerifyReplacement,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Verify => "verifying inputs",
            Self::Terminate => "terminating the application",
            Self::Backup => "backing up the application",
            Self::Replace => "replacing the application",
            Self::VerifyReplacement => "verifying the replacement",
        };
        f.write_str(label)
    }
}

/// Summary of a watchdog run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogReport {
    pub outcome: InstallOutcome,
    /// Phase that failed, if any
    pub failed_phase: Option<Phase>,
    /// Whether the original target was restored from backup
    pub rolled_back: bool,
    /// Whether a host restart was launched
    pub restarted: bool,
}

impl WatchdogReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, InstallOutcome::Succeeded { .. })
    }

    pub fn exit_code(&self) -> i32 {
        if self.succeeded() { 0 } else { 1 }
    }
}

struct PhaseFailure {
    phase: Phase,
    error: UpdateError,
}

trait InPhase<T> {
    fn in_phase(self, phase: Phase) -> Result<T, PhaseFailure>;
}

impl<T> InPhase<T> for Result<T, UpdateError> {
    fn in_phase(self, phase: Phase) -> Result<T, PhaseFailure> {
        self.map_err(|error| PhaseFailure { phase, error })
    }
}

/// Facts gathered during a run that rollback needs.
#[derive(Default)]
struct RunState {
    backup_created: bool,
    target_modified: bool,
}

/// Size and digest the replaced target must match.
struct Expected {
    size: u64,
    sha256: String,
}

pub struct Watchdog<H> {
    host: H,
    paths: InstallPaths,
    settings: WatchdogSettings,
    markers: OutcomeMarkers,
    process_name: String,
}

impl<H: HostControl> Watchdog<H> {
    pub fn new(host: H, paths: InstallPaths, settings: WatchdogSettings) -> Self {
        let markers = OutcomeMarkers::new(paths.marker_dir());
        let process_name = process_name_for(&paths.target);
        Self {
            host,
            paths,
            settings,
            markers,
            process_name,
        }
    }

    pub fn paths(&self) -> &InstallPaths {
        &self.paths
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Run the state machine to completion.
    ///
    /// Never returns an error: every failure is turned into a rollback and an
    /// error marker, and the report says what happened.
    pub async fn run(&self) -> WatchdogReport {
        info!(
            target_path = %self.paths.target.display(),
            staged = %self.paths.staged.display(),
            job = %self.paths.job_id(),
            "Watchdog started"
        );

        let _lock = match InstallLock::acquire(&self.paths.marker_dir(), &self.paths.job_id()).await {
            Ok(lock) => Some(lock),
            Err(e @ UpdateError::InstallInProgress { .. }) => {
                // Another job owns the mailbox; leave its files alone.
                error!("{e}");
                return WatchdogReport {
                    outcome: InstallOutcome::Failed {
                        reason: e.to_string(),
                    },
                    failed_phase: Some(Phase::Verify),
                    rolled_back: false,
                    restarted: false,
                };
            }
            Err(e) => {
                warn!("Continuing without install lock: {e}");
                None
            }
        };

        let backup = BackupManager::new(self.paths.target.clone()).with_restore_policy(
            self.settings.restore_attempts,
            self.settings.delete_retry_delay(),
        );
        let mut state = RunState::default();

        match self.install(&backup, &mut state).await {
            Ok(message) => self.finish_success(message).await,
            Err(failure) => self.roll_back(&backup, &state, failure).await,
        }
    }

    async fn install(&self, backup: &BackupManager, state: &mut RunState) -> Result<String, PhaseFailure> {
        let expected = self.verify_inputs().await.in_phase(Phase::Verify)?;
        self.terminate_host().await.in_phase(Phase::Terminate)?;

        info!("Backing up {}", self.paths.target.display());
        backup.create_backup().await.in_phase(Phase::Backup)?;
        state.backup_created = true;

        self.replace_target(state).await.in_phase(Phase::Replace)?;
        self.verify_replacement(&expected).await.in_phase(Phase::VerifyReplacement)?;

        if let Err(e) = backup.cleanup_backup().await {
            warn!("Failed to remove backup: {e}");
        }
        if let Err(e) = remove_file_if_exists(&self.paths.staged).await {
            warn!("Failed to remove staged artifact {}: {e}", self.paths.staged.display());
        }

        Ok(format!(
            "Updated {} ({} bytes, {})",
            self.paths.target.display(),
            expected.size,
            expected.sha256
        ))
    }

    async fn verify_inputs(&self) -> Result<Expected, UpdateError> {
        if !self.paths.target.is_file() {
            return Err(UpdateError::missing("target executable", &self.paths.target));
        }
        if !self.paths.staged.is_file() {
            return Err(UpdateError::missing("staged artifact", &self.paths.staged));
        }

        let size = tokio::fs::metadata(&self.paths.staged)
            .await
            .map_err(|e| UpdateError::filesystem("read metadata of", &self.paths.staged, e))?
            .len();
        let sha256 = ChecksumVerifier::compute_sha256(&self.paths.staged).await?;
        debug!("Staged artifact: {size} bytes, {sha256}");
        Ok(Expected { size, sha256 })
    }

    /// Poll and kill until the host is gone or the attempt budget runs out.
    async fn terminate_host(&self) -> Result<(), UpdateError> {
        let attempts = self.settings.max_kill_attempts;
        let delays = FixedInterval::from_millis(self.settings.kill_retry_delay_ms);

        for (attempt, delay) in (1..=attempts).zip(delays) {
            if !self.host.is_running(&self.process_name) {
                debug!("{} is not running", self.process_name);
                return Ok(());
            }
            let killed = self.host.terminate(&self.process_name);
            info!(attempt, killed, "Terminating {}", self.process_name);
            tokio::time::sleep(delay).await;
        }

        if self.host.is_running(&self.process_name) {
            return Err(UpdateError::ProcessTerminationFailure {
                process: self.process_name.clone(),
                attempts,
            });
        }
        Ok(())
    }

    async fn replace_target(&self, state: &mut RunState) -> Result<(), UpdateError> {
        let target = &self.paths.target;

        if let Err(first) = tokio::fs::remove_file(target).await {
            warn!(
                "Could not delete {} ({first}); retrying in {:?}",
                target.display(),
                self.settings.delete_retry_delay()
            );
            tokio::time::sleep(self.settings.delete_retry_delay()).await;
            tokio::fs::remove_file(target)
                .await
                .map_err(|e| UpdateError::filesystem("delete", target, e))?;
        }
        state.target_modified = true;

        info!("Copying {} to {}", self.paths.staged.display(), target.display());
        self.host
            .copy_file(&self.paths.staged, target)
            .map_err(|e| UpdateError::filesystem("copy", target, e))?;

        #[cfg(unix)]
        {
            let backup_path = BackupManager::backup_path_for(target);
            if backup_path.exists() {
                crate::upgrade::backup::copy_permissions(&backup_path, target).await?;
            }
        }
        Ok(())
    }

    async fn verify_replacement(&self, expected: &Expected) -> Result<(), UpdateError> {
        let target = &self.paths.target;
        let actual_size = tokio::fs::metadata(target)
            .await
            .map_err(|e| UpdateError::filesystem("read metadata of", target, e))?
            .len();
        if actual_size != expected.size {
            return Err(UpdateError::IntegrityFailure {
                path: target.display().to_string(),
                expected: format!("{} bytes", expected.size),
                actual: format!("{actual_size} bytes"),
            });
        }
        ChecksumVerifier::verify_checksum(target, &expected.sha256).await
    }

    async fn finish_success(&self, message: String) -> WatchdogReport {
        info!("{message}");
        if let Err(e) = self.markers.write_success(&message).await {
            error!("Failed to write success marker: {e}");
        }
        let restarted = self.restart_host();
        WatchdogReport {
            outcome: InstallOutcome::Succeeded { message },
            failed_phase: None,
            rolled_back: false,
            restarted,
        }
    }

    async fn roll_back(&self, backup: &BackupManager, state: &RunState, failure: PhaseFailure) -> WatchdogReport {
        let PhaseFailure { phase, error } = failure;
        error!("Install failed while {phase}: {error}");

        let mut reason = format!("Install failed while {phase}: {error}");
        let mut rolled_back = false;

        if state.target_modified && backup.backup_exists() {
            match backup.restore_backup().await {
                Ok(()) => {
                    rolled_back = true;
                    if let Err(e) = backup.cleanup_backup().await {
                        warn!("Failed to remove backup after rollback: {e}");
                    }
                }
                Err(e) => {
                    error!("Rollback failed: {e}");
                    reason.push_str(&format!(
                        "; rollback failed ({e}), backup kept at {}",
                        backup.backup_path().display()
                    ));
                }
            }
        } else if !self.paths.target.exists() && backup.backup_exists() {
            // An earlier attempt left the target deleted; its backup is the
            // only copy of the application.
            match backup.restore_backup().await {
                Ok(()) => {
                    rolled_back = true;
                    reason.push_str(&format!(
                        "; restored {} from {}",
                        self.paths.target.display(),
                        backup.backup_path().display()
                    ));
                    if let Err(e) = backup.cleanup_backup().await {
                        warn!("Failed to remove backup after restore: {e}");
                    }
                }
                Err(e) => {
                    error!("Restore from earlier backup failed: {e}");
                    reason.push_str(&format!(
                        "; restore failed ({e}), backup kept at {}",
                        backup.backup_path().display()
                    ));
                }
            }
        } else if state.backup_created
            && let Err(e) = backup.cleanup_backup().await
        {
            warn!("Failed to remove backup: {e}");
        }

        let restarted = if !self.host.is_running(&self.process_name) && self.paths.target.is_file() {
            self.restart_host()
        } else {
            false
        };

        if let Err(e) = self.markers.write_error(&reason).await {
            error!("Failed to write error marker: {e}");
        }

        WatchdogReport {
            outcome: InstallOutcome::Failed { reason },
            failed_phase: Some(phase),
            rolled_back,
            restarted,
        }
    }

    fn restart_host(&self) -> bool {
        match self.host.launch_detached(&self.paths.target, &[]) {
            Ok(pid) => {
                info!("Restarted {} (pid {pid})", self.paths.target.display());
                true
            }
            Err(e) => {
                error!("Failed to restart {}: {e}", self.paths.target.display());
                false
            }
        }
    }
}

/// Delete the watchdog's own per-attempt copy once it is done.
///
/// Only possible on Unix, where a running executable can be unlinked; on
/// Windows the next `clean_up_stale` removes it.
pub async fn remove_own_copy(paths: &InstallPaths) {
    if !cfg!(unix) || !paths.is_per_attempt_copy() {
        return;
    }
    if let Err(e) = remove_file_if_exists(&paths.watchdog).await {
        debug!("Could not remove {}: {e}", paths.watchdog.display());
    }
}
