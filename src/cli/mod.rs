//! Command-line interface for appswap.
//!
//! The `appswap` binary is the reference host command surface. Each
//! subcommand lives in its own module with its own argument struct:
//!
//! - `check` - probe the configured distribution locations
//! - `download` - stage the newer build with a progress bar
//! - `install` - hand a local artifact to the watchdog
//! - `upgrade` - check, download and install in one go
//! - `status` - report the outcome of the previous install
//! - `cleanup` - remove leftovers from crashed transfers and old watchdogs
//!
//! ```bash
//! appswap check
//! appswap --no-progress upgrade
//! appswap --config ./appswap.toml install ./build/app
//! appswap status --json
//! ```

mod check;
mod cleanup;
pub mod common;
mod download;
mod install;
mod status;
mod upgrade;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::CONFIG_ENV_VAR;
use common::{CommandContext, CommandExecutor};

/// Environment variable that disables progress bars.
pub const NO_PROGRESS_ENV_VAR: &str = "APPSWAP_NO_PROGRESS";

/// Settings derived from the global flags.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter for the tracing subscriber; `None` disables logging
    /// unless `RUST_LOG` is set.
    pub log_level: Option<String>,

    /// Hide progress bars and spinners.
    pub no_progress: bool,

    /// Explicit configuration file.
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Export the settings the spawned watchdog must inherit.
    ///
    /// The watchdog only receives three paths, so a `--config` override
    /// reaches it through `APPSWAP_CONFIG`. Must run before the async runtime
    /// starts any threads.
    pub fn apply_to_env(&self) {
        if self.no_progress {
            // SAFETY: called from `main` before any other thread exists.
            unsafe { std::env::set_var(NO_PROGRESS_ENV_VAR, "1") };
        }

        if let Some(path) = &self.config_path {
            // SAFETY: as above.
            unsafe { std::env::set_var(CONFIG_ENV_VAR, path) };
        }
    }

    /// Install the global tracing subscriber.
    ///
    /// `RUST_LOG` wins over the level chosen by `--verbose`/`--quiet`.
    pub fn init_logging(&self) {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            match &self.log_level {
                Some(level) => EnvFilter::new(format!("appswap={level}")),
                None => return,
            }
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}

#[derive(Parser)]
#[command(
    name = "appswap",
    about = "Check for, download and install new builds of a desktop application",
    version,
    long_about = "appswap stages a new build of the application and hands it to a detached \
                  watchdog that closes the running copy, swaps the executable and restarts it."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to an `appswap.toml` to use instead of the one next to the executable.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Disable progress bars and spinners.
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the distribution locations for a newer version.
    Check(check::CheckCommand),

    /// Download the newer version into the staging directory.
    Download(download::DownloadCommand),

    /// Install a local artifact over the application executable.
    Install(install::InstallCommand),

    /// Check, download and install the newer version.
    Upgrade(upgrade::UpgradeCommand),

    /// Show the outcome of the last install.
    Status(status::StatusCommand),

    /// Remove stale locks, partial downloads and leftover watchdogs.
    Cleanup(cleanup::CleanupCommand),
}

impl Cli {
    /// Run with settings built from the parsed flags.
    ///
    /// Expects [`CliConfig::apply_to_env`] to have been called already.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Translate the global flags into a [`CliConfig`].
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("info".to_string())
        };

        CliConfig {
            log_level,
            no_progress: self.no_progress,
            config_path: self.config.clone(),
        }
    }

    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.init_logging();
        let context = CommandContext::load(&config).await?;

        match self.command {
            Commands::Check(cmd) => cmd.execute_with_context(context).await,
            Commands::Download(cmd) => cmd.execute_with_context(context).await,
            Commands::Install(cmd) => cmd.execute_with_context(context).await,
            Commands::Upgrade(cmd) => cmd.execute_with_context(context).await,
            Commands::Status(cmd) => cmd.execute_with_context(context).await,
            Commands::Cleanup(cmd) => cmd.execute_with_context(context).await,
        }
    }
}
