//! On-disk fixtures: distribution locations, an installed host and a staging
//! directory under one temporary root.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::{UpdateConfig, WatchdogSettings};
use crate::constants::VERSION_DESCRIPTOR_FILE;
use crate::upgrade::verification::format_digest;

/// File name of the fake host executable.
pub const HOST_NAME: &str = "fixture-host";

/// Temporary layout:
///
/// ```text
/// <root>/dist/<name>/version.json + artifact
/// <root>/install/fixture-host
/// <root>/staging/
/// ```
pub struct UpdateFixture {
    temp: TempDir,
}

impl UpdateFixture {
    /// Create the layout with an installed host containing `installed`.
    pub fn new(installed: &[u8]) -> Result<Self> {
        let temp = TempDir::new().context("Failed to create temp dir")?;
        let fixture = Self { temp };
        fs::create_dir_all(fixture.install_dir())?;
        fs::create_dir_all(fixture.staging_dir())?;
        fs::write(fixture.target(), installed)?;
        Ok(fixture)
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn install_dir(&self) -> PathBuf {
        self.root().join("install")
    }

    /// The installed host executable.
    pub fn target(&self) -> PathBuf {
        self.install_dir().join(HOST_NAME)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root().join("staging")
    }

    /// A distribution location that does not exist.
    pub fn missing_location(&self, name: &str) -> String {
        self.root().join("dist").join(name).display().to_string()
    }

    /// Publish `artifact` as `version` under `dist/<name>`, with size and
    /// digest in the descriptor. Returns the location string.
    pub fn publish(&self, name: &str, version: &str, artifact: &[u8]) -> Result<String> {
        let filename = format!("{HOST_NAME}-{version}");
        let descriptor = serde_json::json!({
            "version": version,
            "filename": filename,
            "changelog": format!("Release {version}"),
            "size": artifact.len(),
            "sha256": sha256_of(artifact),
        });
        let dir = self.publish_descriptor(name, &descriptor.to_string())?;
        fs::write(Path::new(&dir).join(&filename), artifact)?;
        Ok(dir)
    }

    /// Write a raw descriptor under `dist/<name>` without any artifact.
    pub fn publish_descriptor(&self, name: &str, content: &str) -> Result<String> {
        let dir = self.root().join("dist").join(name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(VERSION_DESCRIPTOR_FILE), content)?;
        Ok(dir.display().to_string())
    }

    /// Configuration pointing at this layout, with millisecond watchdog delays.
    pub fn config(&self, update_paths: Vec<String>, current_version: &str) -> UpdateConfig {
        UpdateConfig {
            update_paths,
            current_version: current_version.to_string(),
            app_name: HOST_NAME.to_string(),
            host_executable: Some(self.target()),
            staging_dir: Some(self.staging_dir()),
            install_fallbacks: vec![self.install_dir()],
            watchdog: WatchdogSettings::with_uniform_delay(3, 10),
            ..UpdateConfig::default()
        }
    }

    /// Save `config` as `<root>/appswap.toml`.
    pub fn write_config(&self, config: &UpdateConfig) -> Result<PathBuf> {
        let path = self.root().join("appswap.toml");
        fs::write(&path, toml::to_string_pretty(config)?)?;
        Ok(path)
    }

    /// Stage `content` directly, as if a transfer had completed.
    pub fn stage(&self, filename: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.staging_dir().join(filename);
        fs::write(&path, content)?;
        Ok(path)
    }
}

/// `sha256:<hex>` of `content`.
pub fn sha256_of(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format_digest(hasher)
}
