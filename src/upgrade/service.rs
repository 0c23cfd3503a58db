//! Host-side facade over the update pipeline.
//!
//! [`UpdateService`] wires configuration, the distribution reader, the staging
//! area and the progress bridge together and exposes the host command surface:
//! check, download, install, plus consuming the outcome of the previous
//! install on the next launch.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::UpdateConfig;
use crate::core::UpdateError;
use crate::upgrade::descriptor::DistributionReader;
use crate::upgrade::handoff::{HandoffOrchestrator, InstallJob};
use crate::upgrade::locator::InstallLocator;
use crate::upgrade::markers::{InstallOutcome, OutcomeMarkers};
use crate::upgrade::process::{HostControl, SystemHost};
use crate::upgrade::progress::{ProgressBridge, ProgressEvent, Stage};
use crate::upgrade::resolver::{UpdateCheck, UpdateDescriptor, UpdateResolver};
use crate::upgrade::staging::{CleanupReport, StagingArea};
use crate::upgrade::transfer::{ArtifactSource, CancelHandle, StagedArtifact, TransferEngine};
use crate::utils::fs::remove_file_if_exists;

pub struct UpdateService<H = SystemHost> {
    config: UpdateConfig,
    config_path: Option<PathBuf>,
    reader: DistributionReader,
    staging: StagingArea,
    progress: ProgressBridge,
    host: Arc<H>,
    watchdog_dirs: Option<Vec<PathBuf>>,
}

impl UpdateService<SystemHost> {
    pub fn new(config: UpdateConfig) -> Self {
        Self::with_host(config, SystemHost::new())
    }
}

impl<H: HostControl + 'static> UpdateService<H> {
    /// Service that drives processes through `host`.
    pub fn with_host(config: UpdateConfig, host: H) -> Self {
        let reader = DistributionReader::new(config.update_timeout());
        let staging = StagingArea::new(config.staging_dir());
        Self {
            config,
            config_path: None,
            reader,
            staging,
            progress: ProgressBridge::new(),
            host: Arc::new(host),
            watchdog_dirs: None,
        }
    }

    /// File that receives the new `current_version` after a successful install.
    #[must_use]
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Override where the compiled watchdog is looked up.
    #[must_use]
    pub fn with_watchdog_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.watchdog_dirs = Some(dirs);
        self
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn progress(&self) -> &ProgressBridge {
        &self.progress
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Probe the configured candidates.
    pub async fn check_for_updates(&self) -> Result<UpdateCheck, UpdateError> {
        let candidates = self.config.candidates();
        self.progress.emit(
            Stage::Checking,
            0,
            format!("Checking {} distribution location(s)", candidates.len()),
        );

        let resolver = UpdateResolver::new(self.reader.clone());
        let result = resolver
            .check_for_updates(&candidates, &self.config.current_version)
            .await?;

        let message = match &result {
            UpdateCheck::Available(update) => format!("Version {} is available", update.version),
            UpdateCheck::UpToDate => "Up to date".to_string(),
        };
        self.progress.emit(Stage::Checking, 100, message);
        Ok(result)
    }

    /// Startup check; skipped entirely when `auto_check` is off.
    pub async fn check_on_startup(&self) -> Result<Option<UpdateDescriptor>, UpdateError> {
        if !self.config.auto_check {
            debug!("Automatic update check disabled");
            return Ok(None);
        }
        Ok(self.check_for_updates().await?.into_available())
    }

    /// Transfer the artifact of `update` into the staging directory.
    pub async fn download(
        &self,
        update: &UpdateDescriptor,
        cancel: CancelHandle,
    ) -> Result<StagedArtifact, UpdateError> {
        self.staging.ensure().await?;
        let lock = self.staging.lock_transfer().await?;

        let mut source = ArtifactSource::open(
            self.reader.client(),
            &update.artifact,
            update.size,
            update.sha256.clone(),
        )
        .await?;

        let dest = self.staging.artifact_path(&update.filename);
        let staged = TransferEngine::new()
            .with_cancel(cancel)
            .transfer(&mut source, &dest, self.progress.transfer_reporter())
            .await;

        lock.release();
        let staged = staged?;
        info!("Staged version {} at {}", update.version, staged.path.display());
        Ok(staged)
    }

    /// Hand `staged` off to a detached watchdog and return immediately.
    pub async fn install(
        &self,
        staged: &StagedArtifact,
        version: Option<&str>,
    ) -> Result<InstallJob, UpdateError> {
        self.progress.emit(Stage::Installing, 0, "Preparing install");

        let current_exe = self.config.host_executable().map_err(|e| UpdateError::Config {
            message: format!("{e:#}"),
        })?;
        let mut orchestrator = HandoffOrchestrator::new(
            Arc::clone(&self.host),
            InstallLocator::from_config(&self.config),
            self.staging.clone(),
            self.config.watchdog.clone(),
            current_exe,
        );
        if let Some(dirs) = &self.watchdog_dirs {
            orchestrator = orchestrator.with_watchdog_dirs(dirs.clone());
        }

        let job = orchestrator.begin_install(staged, version).await?;
        self.progress.emit(
            Stage::Installing,
            100,
            "Installer started; the application will restart",
        );
        Ok(job)
    }

    /// Consume the marker left by the previous install attempt.
    ///
    /// A success also records the installed version in the configuration
    /// file, when the service knows where that file lives.
    pub async fn take_last_outcome(&mut self) -> Result<Option<InstallOutcome>> {
        let dir = self.staging.dir().to_path_buf();
        let outcome = OutcomeMarkers::new(&dir)
            .take()
            .await
            .context("Failed to read install outcome markers")?;
        let Some(outcome) = outcome else {
            return Ok(None);
        };

        let job = InstallJob::load(&dir).await;
        if let InstallOutcome::Succeeded { .. } = &outcome
            && let Some(version) = job.as_ref().and_then(|j| j.version.as_deref())
        {
            match &self.config_path {
                Some(path) => {
                    let path = path.clone();
                    self.config
                        .record_installed_version(version, &path)
                        .await
                        .context("Failed to record installed version")?;
                }
                None => debug!("No config path; not recording installed version {version}"),
            }
        }

        let record = InstallJob::record_path(&dir);
        if let Err(e) = remove_file_if_exists(&record).await {
            warn!("Failed to remove {}: {e}", record.display());
        }
        Ok(Some(outcome))
    }

    /// Remove leftovers of crashed transfers and finished watchdogs.
    pub async fn clean_up_stale(&self) -> Result<CleanupReport, UpdateError> {
        self.staging.clean_up_stale().await
    }
}
