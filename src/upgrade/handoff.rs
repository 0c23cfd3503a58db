//! Handoff Orchestrator: turn a staged artifact into a running watchdog.
//!
//! `begin_install` resolves the real install path, picks a watchdog variant,
//! spawns it detached with exactly three path arguments and returns. It never
//! waits for the watchdog; the outcome comes back through the marker files on
//! the next launch.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WatchdogSettings;
use crate::constants::{INSTALL_JOB_FILE, WATCHDOG_BINARY_STEM, WATCHDOG_PREFIX};
use crate::core::UpdateError;
use crate::upgrade::install_lock::{self, InstallLockRecord};
use crate::upgrade::locator::InstallLocator;
use crate::upgrade::markers::OutcomeMarkers;
use crate::upgrade::process::HostControl;
use crate::upgrade::staging::StagingArea;
use crate::upgrade::transfer::StagedArtifact;
use crate::upgrade::watchdog::InstallPaths;
use crate::upgrade::watchdog::script::WatchdogScript;
use crate::utils::fs::{atomic_write, remove_file_if_exists};
use crate::utils::platform::executable_name;

/// Which watchdog implementation runs the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchdogKind {
    /// The shipped `appswap-watchdog` binary
    Compiled,
    /// A script generated at handoff
    Script,
}

/// A handed-off install attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallJob {
    /// Unique per-attempt identifier
    pub id: String,
    /// Executable being replaced
    pub target: PathBuf,
    /// Artifact copied over the target
    pub staged: PathBuf,
    /// Per-attempt watchdog copy or script
    pub watchdog: PathBuf,
    pub kind: WatchdogKind,
    /// Pid of the spawned watchdog; unset in the record written before the spawn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Version being installed, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl InstallJob {
    pub fn record_path(staging_dir: &Path) -> PathBuf {
        staging_dir.join(INSTALL_JOB_FILE)
    }

    /// Last job record left in `staging_dir`, if readable.
    pub async fn load(staging_dir: &Path) -> Option<Self> {
        let content = tokio::fs::read_to_string(Self::record_path(staging_dir)).await.ok()?;
        serde_json::from_str(&content).ok()
    }

    async fn save(&self, staging_dir: &Path) -> Result<(), UpdateError> {
        let path = Self::record_path(staging_dir);
        let content = serde_json::to_vec_pretty(self)
            .map_err(|e| UpdateError::filesystem("serialize", &path, std::io::Error::other(e)))?;
        let target = path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&target, &content))
            .await
            .map_err(|e| UpdateError::filesystem("write", &path, std::io::Error::other(e)))?
            .map_err(|e| {
                UpdateError::filesystem("write", &path, std::io::Error::other(format!("{e:#}")))
            })
    }
}

/// Timestamp plus a short random suffix, e.g. `20261019143055123-1f9c2a7b`.
pub fn new_job_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%d%H%M%S%3f"), &suffix[..8])
}

/// Remove the lock and job record of a handoff that never started.
async fn discard_handoff(dir: &Path) {
    for path in [install_lock::lock_path(dir), InstallJob::record_path(dir)] {
        if let Err(e) = remove_file_if_exists(&path).await {
            warn!("Failed to remove {}: {e}", path.display());
        }
    }
}

pub struct HandoffOrchestrator<H> {
    host: H,
    locator: InstallLocator,
    staging: StagingArea,
    settings: WatchdogSettings,
    current_exe: PathBuf,
    watchdog_dirs: Option<Vec<PathBuf>>,
}

impl<H: HostControl> HandoffOrchestrator<H> {
    pub fn new(
        host: H,
        locator: InstallLocator,
        staging: StagingArea,
        settings: WatchdogSettings,
        current_exe: PathBuf,
    ) -> Self {
        Self {
            host,
            locator,
            staging,
            settings,
            current_exe,
            watchdog_dirs: None,
        }
    }

    /// Directories searched for the compiled watchdog, replacing the defaults
    /// (next to the executable and under `resources/updater/`).
    #[must_use]
    pub fn with_watchdog_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.watchdog_dirs = Some(dirs);
        self
    }

    fn watchdog_search_dirs(&self, target: &Path) -> Vec<PathBuf> {
        if let Some(dirs) = &self.watchdog_dirs {
            return dirs.clone();
        }
        let mut dirs = Vec::new();
        for exe in [target, self.current_exe.as_path()] {
            if let Some(parent) = exe.parent() {
                for dir in [parent.to_path_buf(), parent.join("resources").join("updater")] {
                    if !dirs.contains(&dir) {
                        dirs.push(dir);
                    }
                }
            }
        }
        dirs
    }

    /// The shipped watchdog binary, if one exists.
    pub fn locate_compiled_watchdog(&self, target: &Path) -> Option<PathBuf> {
        let name = executable_name(WATCHDOG_BINARY_STEM);
        self.watchdog_search_dirs(target)
            .into_iter()
            .map(|dir| dir.join(&name))
            .find(|candidate| candidate.is_file())
    }

    /// Hand `staged` off to a detached watchdog.
    pub async fn begin_install(
        &self,
        staged: &StagedArtifact,
        version: Option<&str>,
    ) -> Result<InstallJob, UpdateError> {
        if !staged.path.is_file() {
            return Err(UpdateError::missing("staged artifact", &staged.path));
        }

        let target = self.locator.locate_real_install_path(&self.current_exe)?;
        let dir = self.staging.dir();
        self.staging.ensure().await?;
        install_lock::ensure_available(dir).await?;
        OutcomeMarkers::new(dir).clear().await?;

        let id = new_job_id();
        let (kind, watchdog) = self.prepare_watchdog(&id, &target).await?;
        let paths = InstallPaths {
            target: target.clone(),
            staged: staged.path.clone(),
            watchdog: watchdog.clone(),
        };

        let (program, args) = match kind {
            WatchdogKind::Compiled => (watchdog.clone(), paths.to_args()),
            WatchdogKind::Script => WatchdogScript::command(&paths),
        };

        // The watchdog kills this process, so everything the next launch
        // needs is on disk before the spawn. The lock names this process until
        // the watchdog adopts it under the same job id.
        let mut job = InstallJob {
            id,
            target,
            staged: staged.path.clone(),
            watchdog,
            kind,
            pid: None,
            version: version.map(str::to_string),
        };
        install_lock::write(dir, &InstallLockRecord::new(std::process::id(), &job.id)).await?;
        if let Err(e) = job.save(dir).await {
            discard_handoff(dir).await;
            return Err(e);
        }

        info!(job = %job.id, kind = ?job.kind, "Spawning watchdog for {}", job.target.display());
        let pid = match self.host.launch_detached(&program, &args) {
            Ok(pid) => pid,
            Err(e) => {
                discard_handoff(dir).await;
                return Err(UpdateError::WatchdogUnavailable {
                    reason: format!("failed to start {}: {e}", program.display()),
                });
            }
        };

        job.pid = Some(pid);
        if let Err(e) = job.save(dir).await {
            warn!("Watchdog started but its pid was not recorded: {e}");
        }
        Ok(job)
    }

    async fn prepare_watchdog(&self, id: &str, target: &Path) -> Result<(WatchdogKind, PathBuf), UpdateError> {
        let dir = self.staging.dir();

        if let Some(compiled) = self.locate_compiled_watchdog(target) {
            let copy = dir.join(executable_name(&format!("{WATCHDOG_PREFIX}{id}")));
            debug!("Copying watchdog {} to {}", compiled.display(), copy.display());
            self.host
                .copy_file(&compiled, &copy)
                .map_err(|e| UpdateError::WatchdogUnavailable {
                    reason: format!("failed to copy {}: {e}", compiled.display()),
                })?;
            #[cfg(unix)]
            crate::upgrade::backup::copy_permissions(&compiled, &copy).await?;
            return Ok((WatchdogKind::Compiled, copy));
        }

        let script_path = dir.join(format!("{WATCHDOG_PREFIX}{id}.{}", WatchdogScript::extension()));
        info!("No compiled watchdog found; generating {}", script_path.display());
        WatchdogScript::new(self.settings.clone())
            .materialize(&script_path)
            .await
            .map_err(|e| UpdateError::WatchdogUnavailable {
                reason: e.to_string(),
            })?;
        Ok((WatchdogKind::Script, script_path))
    }
}
