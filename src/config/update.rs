//! Update configuration file (`appswap.toml`).
//!
//! # Location
//!
//! 1. `$APPSWAP_CONFIG` when set
//! 2. `<executable dir>/resources/config/appswap.toml`
//! 3. Built-in defaults when neither exists
//!
//! The watchdog resolves the file the same way relative to the executable it
//! replaces, and inherits `$APPSWAP_CONFIG` from the host that spawned it.
//!
//! # Example
//!
//! ```toml
//! update_paths = ['\\fileserver\updates\app', "https://updates.example.com/app"]
//! current_version = "2.1.5"
//! auto_check = true
//! app_name = "Inbound Scope"
//!
//! [watchdog]
//! max_kill_attempts = 10
//! kill_retry_delay_ms = 2000
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_STAGING_DIR_NAME, DEFAULT_UPDATE_TIMEOUT_MS};
use crate::upgrade::config::WatchdogSettings;
use crate::utils::fs::atomic_write;

/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV_VAR: &str = "APPSWAP_CONFIG";

/// Update settings shared by the host command surface and the watchdog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Distribution locations in priority order.
    ///
    /// Directories (local or network shares) and `http(s)://` base URLs are
    /// both accepted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update_paths: Vec<String>,

    /// Single-location form kept for older configuration files.
    ///
    /// Only used when `update_paths` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_path: Option<String>,

    /// Version of the installed host application.
    #[serde(default = "default_current_version")]
    pub current_version: String,

    /// Whether the host checks for updates at startup.
    #[serde(default = "default_auto_check")]
    pub auto_check: bool,

    /// Timeout for remote descriptor reads and HTTP connections.
    #[serde(default = "default_update_timeout_ms")]
    pub update_timeout_ms: u64,

    /// Display name of the host, used for well-known install directories.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Executable to replace; defaults to the running executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_executable: Option<PathBuf>,

    /// Private staging directory; defaults to `<temp>/app-updates`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,

    /// Replaces the built-in list of well-known install locations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install_fallbacks: Vec<PathBuf>,

    /// Project checkout directory searched after the standard locations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<PathBuf>,

    /// Watchdog retry budget.
    #[serde(default, skip_serializing_if = "WatchdogSettings::is_default")]
    pub watchdog: WatchdogSettings,
}

fn default_current_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

const fn default_auto_check() -> bool {
    true
}

const fn default_update_timeout_ms() -> u64 {
    DEFAULT_UPDATE_TIMEOUT_MS
}

fn default_app_name() -> String {
    "app".to_string()
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            update_paths: Vec::new(),
            update_path: None,
            current_version: default_current_version(),
            auto_check: default_auto_check(),
            update_timeout_ms: default_update_timeout_ms(),
            app_name: default_app_name(),
            host_executable: None,
            staging_dir: None,
            install_fallbacks: Vec::new(),
            project_dir: None,
            watchdog: WatchdogSettings::default(),
        }
    }
}

impl UpdateConfig {
    /// Load the configuration for the running executable.
    pub async fn load() -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to get current executable path")?;
        Self::load_for_executable(&exe).await
    }

    /// Load the configuration that belongs to `executable`.
    ///
    /// Missing files yield defaults; unreadable or invalid files are errors.
    pub async fn load_for_executable(executable: &Path) -> Result<Self> {
        match Self::resolve_path(executable) {
            Some(path) if path.exists() => Self::load_from(&path).await,
            Some(path) => {
                debug!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Where the configuration for `executable` is looked up.
    pub fn resolve_path(executable: &Path) -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
            && !path.is_empty()
        {
            return Some(PathBuf::from(path));
        }
        executable
            .parent()
            .map(|dir| dir.join("resources").join("config").join("appswap.toml"))
    }

    /// Load and validate a configuration file.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read update config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse update config from {}", path.display()))?;
        config.validate()?;

        debug!("Loaded update config from {}", path.display());
        Ok(config)
    }

    /// Write the configuration atomically.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize update config")?;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || atomic_write(&path, content.as_bytes()))
            .await
            .context("Config writer task panicked")??;
        Ok(())
    }

    /// Reject values that would make every later step fail in a confusing way.
    pub fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            bail!("app_name must not be empty");
        }
        if self.update_timeout_ms == 0 {
            bail!("update_timeout_ms must be greater than zero");
        }
        if self.watchdog.max_kill_attempts == 0 {
            bail!("watchdog.max_kill_attempts must be at least 1");
        }
        if self.watchdog.restore_attempts == 0 {
            bail!("watchdog.restore_attempts must be at least 1");
        }
        Ok(())
    }

    /// Distribution candidates in priority order, with `~` expanded.
    #[must_use]
    pub fn candidates(&self) -> Vec<String> {
        let raw: Vec<&String> = if self.update_paths.is_empty() {
            self.update_path.iter().collect()
        } else {
            if self.update_path.is_some() {
                warn!("Both update_paths and update_path are set; ignoring update_path");
            }
            self.update_paths.iter().collect()
        };

        raw.into_iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| {
                if p.starts_with("http://") || p.starts_with("https://") {
                    p.to_string()
                } else {
                    shellexpand::tilde(p).into_owned()
                }
            })
            .collect()
    }

    /// Staging directory for downloads, markers and watchdog copies.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        match &self.staging_dir {
            Some(dir) => expand_path(dir),
            None => std::env::temp_dir().join(DEFAULT_STAGING_DIR_NAME),
        }
    }

    /// The executable an install would replace, before locator checks.
    pub fn host_executable(&self) -> Result<PathBuf> {
        match &self.host_executable {
            Some(path) => Ok(expand_path(path)),
            None => std::env::current_exe().context("Failed to get current executable path"),
        }
    }

    /// Configured fallback install locations, with `~` expanded.
    #[must_use]
    pub fn install_fallbacks(&self) -> Vec<PathBuf> {
        self.install_fallbacks.iter().map(|p| expand_path(p)).collect()
    }

    /// Configured project checkout directory, with `~` expanded.
    #[must_use]
    pub fn project_dir(&self) -> Option<PathBuf> {
        self.project_dir.as_deref().map(expand_path)
    }

    /// Timeout for remote reads.
    #[must_use]
    pub const fn update_timeout(&self) -> Duration {
        Duration::from_millis(self.update_timeout_ms)
    }

    /// Persist `version` as the installed version after a successful install.
    pub async fn record_installed_version(&mut self, version: &str, path: &Path) -> Result<()> {
        if self.current_version == version {
            return Ok(());
        }
        info!("Recording installed version {} (was {})", version, self.current_version);
        self.current_version = version.to_string();
        self.save_to(path).await
    }
}

fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).into_owned()),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = UpdateConfig::default();
        assert!(config.auto_check);
        assert_eq!(config.update_timeout(), Duration::from_secs(10));
        assert!(config.candidates().is_empty());
        assert!(config.staging_dir().ends_with("app-updates"));
        config.validate().unwrap();
    }

    #[test]
    fn test_legacy_single_update_path() {
        let config: UpdateConfig = toml::from_str(r#"update_path = "/srv/updates""#).unwrap();
        assert_eq!(config.candidates(), vec!["/srv/updates".to_string()]);
    }

    #[test]
    fn test_update_paths_take_precedence() {
        let config: UpdateConfig = toml::from_str(
            r#"
            update_paths = ["/a", " ", "https://example.com/updates"]
            update_path = "/legacy"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.candidates(),
            vec!["/a".to_string(), "https://example.com/updates".to_string()]
        );
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config: UpdateConfig = toml::from_str("[watchdog]\nmax_kill_attempts = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_reload_records_version() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("appswap.toml");

        let mut config = UpdateConfig {
            update_paths: vec!["/srv/updates".to_string()],
            current_version: "1.0.0".to_string(),
            ..UpdateConfig::default()
        };
        config.record_installed_version("1.1.0", &path).await.unwrap();

        let loaded = UpdateConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded.current_version, "1.1.0");
        assert_eq!(loaded.update_paths, vec!["/srv/updates".to_string()]);
        assert!(loaded.watchdog.is_default());
    }

    #[test]
    #[serial_test::serial]
    fn test_resolve_path_env_override() {
        let exe = Path::new("/opt/app/app");
        // SAFETY: serialized; no other test touches this variable concurrently.
        unsafe { std::env::remove_var(CONFIG_ENV_VAR) };
        assert_eq!(
            UpdateConfig::resolve_path(exe),
            Some(PathBuf::from("/opt/app/resources/config/appswap.toml"))
        );

        unsafe { std::env::set_var(CONFIG_ENV_VAR, "/etc/appswap.toml") };
        assert_eq!(UpdateConfig::resolve_path(exe), Some(PathBuf::from("/etc/appswap.toml")));
        unsafe { std::env::remove_var(CONFIG_ENV_VAR) };
    }

    #[tokio::test]
    async fn test_load_from_invalid_toml_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("appswap.toml");
        tokio::fs::write(&path, "update_paths = [").await.unwrap();
        assert!(UpdateConfig::load_from(&path).await.is_err());
    }
}
