//! Common utilities and traits for CLI commands

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use super::{CliConfig, NO_PROGRESS_ENV_VAR};
use crate::config::UpdateConfig;
use crate::upgrade::UpdateService;
use crate::upgrade::resolver::UpdateDescriptor;

/// Common trait for CLI command execution pattern
pub trait CommandExecutor: Sized {
    /// Execute the command against a loaded configuration
    fn execute_with_context(
        self,
        context: CommandContext,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Configuration and switches shared by every subcommand
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Effective update configuration
    pub config: UpdateConfig,
    /// File the configuration came from, if it exists
    pub config_path: Option<PathBuf>,
    /// Whether progress output is suppressed
    pub no_progress: bool,
}

impl CommandContext {
    /// Load the configuration named by `--config`, `APPSWAP_CONFIG` or the
    /// file next to the executable.
    pub async fn load(cli: &CliConfig) -> Result<Self> {
        let no_progress = cli.no_progress || std::env::var(NO_PROGRESS_ENV_VAR).is_ok();

        if let Some(path) = &cli.config_path {
            let config = UpdateConfig::load_from(path)
                .await
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
            return Ok(Self {
                config,
                config_path: Some(path.clone()),
                no_progress,
            });
        }

        let exe = std::env::current_exe().context("Failed to get current executable path")?;
        let config = UpdateConfig::load_for_executable(&exe).await?;
        let config_path = UpdateConfig::resolve_path(&exe).filter(|p| p.exists());
        Ok(Self {
            config,
            config_path,
            no_progress,
        })
    }

    /// Context over an in-memory configuration.
    pub fn from_config(config: UpdateConfig, config_path: Option<PathBuf>) -> Self {
        Self {
            config,
            config_path,
            no_progress: true,
        }
    }

    /// Service that records installed versions into the loaded file.
    pub fn service(&self) -> UpdateService {
        let service = UpdateService::new(self.config.clone());
        match &self.config_path {
            Some(path) => service.with_config_path(path.clone()),
            None => service,
        }
    }
}

/// Print the summary line and changelog of an available update.
pub fn print_update(current_version: &str, update: &UpdateDescriptor) {
    let headline = format!("Update available: {} -> {}", current_version, update.version);
    if update.mandatory {
        println!("{} {}", headline.green().bold(), "(mandatory)".yellow());
    } else {
        println!("{}", headline.green().bold());
    }
    println!("  {} {}", "from".dimmed(), update.source);
    println!("  {}", update.changelog);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_explicit_config_path_is_loaded() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("appswap.toml");
        std::fs::write(&path, "current_version = \"3.0.0\"\nauto_check = false\n").unwrap();

        let cli = CliConfig {
            config_path: Some(path.clone()),
            ..CliConfig::new()
        };
        let context = CommandContext::load(&cli).await.unwrap();
        assert_eq!(context.config.current_version, "3.0.0");
        assert!(!context.config.auto_check);
        assert_eq!(context.config_path, Some(path));
    }

    #[tokio::test]
    async fn test_missing_explicit_config_is_an_error() {
        let temp = TempDir::new().unwrap();
        let cli = CliConfig {
            config_path: Some(temp.path().join("missing.toml")),
            ..CliConfig::new()
        };
        assert!(CommandContext::load(&cli).await.is_err());
    }
}
