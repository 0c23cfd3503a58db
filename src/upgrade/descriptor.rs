//! Version descriptors and the locations that publish them.
//!
//! A distribution location exposes exactly two things: `version.json` and the
//! artifact it names, both relative to the location itself. Locations are
//! either directories (local disks or network shares) or `http(s)://` base
//! URLs.
//!
//! # Descriptor format
//!
//! ```json
//! {
//!   "version": "2.1.6",
//!   "filename": "app-2.1.6.exe",
//!   "changelog": "Fixes the export dialog",
//!   "mandatory": false,
//!   "size": 73400320,
//!   "sha256": "sha256:9f2c..."
//! }
//! ```
//!
//! Only `version` and `filename` are required.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::constants::{DEFAULT_UPDATE_TIMEOUT_MS, VERSION_DESCRIPTOR_FILE};
use crate::core::UpdateError;

/// Contents of `version.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    /// Dotted version of the published build
    pub version: String,
    /// Artifact file name, relative to the distribution location
    pub filename: String,
    /// Release notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<String>,
    /// Whether the host should not offer to skip this update
    #[serde(default)]
    pub mandatory: bool,
    /// Expected artifact size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Expected artifact digest, `sha256:<hex>` or bare hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl VersionDescriptor {
    /// Parse and sanity-check descriptor JSON.
    ///
    /// The artifact name must be a plain file name so a descriptor can never
    /// point outside its own location.
    pub fn parse(content: &str) -> Result<Self, String> {
        let descriptor: Self =
            serde_json::from_str(content).map_err(|e| format!("invalid {VERSION_DESCRIPTOR_FILE}: {e}"))?;

        if descriptor.version.trim().is_empty() {
            return Err("descriptor has an empty version".to_string());
        }
        let filename = descriptor.filename.trim();
        if filename.is_empty()
            || filename.contains(['/', '\\'])
            || filename == "."
            || filename == ".."
        {
            return Err(format!("descriptor filename '{}' is not a plain file name", descriptor.filename));
        }
        Ok(descriptor)
    }
}

/// A place a descriptor or an artifact can be read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DistributionLocation {
    /// Local directory or mounted network share
    Directory(PathBuf),
    /// HTTP(S) base URL
    Http(String),
}

impl DistributionLocation {
    /// Classify a configured location by its prefix.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Http(trimmed.trim_end_matches('/').to_string())
        } else {
            Self::Directory(PathBuf::from(trimmed))
        }
    }

    /// Location of `name` inside this location.
    #[must_use]
    pub fn join(&self, name: &str) -> Self {
        match self {
            Self::Directory(dir) => Self::Directory(dir.join(name)),
            Self::Http(base) => Self::Http(format!("{base}/{name}")),
        }
    }

    /// Filesystem path, if this is a directory location.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Directory(path) => Some(path),
            Self::Http(_) => None,
        }
    }
}

impl fmt::Display for DistributionLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(path) => write!(f, "{}", path.display()),
            Self::Http(url) => f.write_str(url),
        }
    }
}

/// Reads the version descriptor published at a location.
///
/// Every failure mode (missing location, missing or malformed descriptor,
/// I/O or transport errors) is reported as [`UpdateError::Unreachable`].
pub trait VersionSource {
    fn probe(
        &self,
        location: &DistributionLocation,
    ) -> impl Future<Output = Result<VersionDescriptor, UpdateError>> + Send;
}

/// [`VersionSource`] over directories and HTTP.
#[derive(Clone)]
pub struct DistributionReader {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for DistributionReader {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_UPDATE_TIMEOUT_MS))
    }
}

impl DistributionReader {
    /// Reader whose individual reads give up after `timeout`.
    ///
    /// Directory reads are bounded too, since a dead network share can hang
    /// an open call for minutes.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("appswap/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client, timeout }
    }

    /// Shared HTTP client, reused by the transfer engine.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    async fn read_directory(&self, dir: &Path) -> Result<String, String> {
        let descriptor_path = dir.join(VERSION_DESCRIPTOR_FILE);
        let read = tokio::fs::read_to_string(&descriptor_path);
        match tokio::time::timeout(self.timeout, read).await {
            Err(_) => Err(format!("timed out after {:?}", self.timeout)),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                if tokio::fs::metadata(dir).await.is_ok() {
                    Err(format!("{VERSION_DESCRIPTOR_FILE} not found"))
                } else {
                    Err("location does not exist".to_string())
                }
            }
            Ok(Err(e)) => Err(format!("failed to read {}: {e}", descriptor_path.display())),
            Ok(Ok(content)) => Ok(content),
        }
    }

    async fn read_http(&self, base: &str) -> Result<String, String> {
        let url = format!("{base}/{VERSION_DESCRIPTOR_FILE}");
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        response.text().await.map_err(|e| e.to_string())
    }
}

impl VersionSource for DistributionReader {
    async fn probe(&self, location: &DistributionLocation) -> Result<VersionDescriptor, UpdateError> {
        debug!("Probing distribution location {location}");

        let content = match location {
            DistributionLocation::Directory(dir) => self.read_directory(dir).await,
            DistributionLocation::Http(base) => self.read_http(base).await,
        };

        content.and_then(|c| VersionDescriptor::parse(&c)).map_err(|reason| {
            UpdateError::Unreachable {
                location: location.to_string(),
                reason,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_descriptor() {
        let descriptor =
            VersionDescriptor::parse(r#"{"version": "2.0.0", "filename": "app.exe"}"#).unwrap();
        assert_eq!(descriptor.version, "2.0.0");
        assert_eq!(descriptor.filename, "app.exe");
        assert!(descriptor.changelog.is_none());
        assert!(!descriptor.mandatory);
    }

    #[test]
    fn test_parse_rejects_path_in_filename() {
        assert!(VersionDescriptor::parse(r#"{"version": "1", "filename": "../app"}"#).is_err());
        assert!(VersionDescriptor::parse(r#"{"version": "1", "filename": "a\\b"}"#).is_err());
        assert!(VersionDescriptor::parse(r#"{"version": "", "filename": "a"}"#).is_err());
        assert!(VersionDescriptor::parse("not json").is_err());
    }

    #[test]
    fn test_location_parse_and_join() {
        let http = DistributionLocation::parse("HTTPS://updates.example.com/app/");
        assert_eq!(http, DistributionLocation::Http("HTTPS://updates.example.com/app".to_string()));
        assert_eq!(
            http.join("version.json").to_string(),
            "HTTPS://updates.example.com/app/version.json"
        );

        let dir = DistributionLocation::parse("/srv/updates");
        assert_eq!(dir.join("app").as_path(), Some(Path::new("/srv/updates/app")));
    }

    #[tokio::test]
    async fn test_probe_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(VERSION_DESCRIPTOR_FILE),
            r#"{"version": "1.4.0", "filename": "app", "changelog": "notes"}"#,
        )
        .unwrap();

        let reader = DistributionReader::default();
        let descriptor = reader
            .probe(&DistributionLocation::Directory(temp.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(descriptor.version, "1.4.0");
        assert_eq!(descriptor.changelog.as_deref(), Some("notes"));
    }

    #[tokio::test]
    async fn test_probe_missing_directory_is_unreachable() {
        let temp = TempDir::new().unwrap();
        let reader = DistributionReader::default();

        let err = reader
            .probe(&DistributionLocation::Directory(temp.path().join("missing")))
            .await
            .unwrap_err();
        match err {
            UpdateError::Unreachable { reason, .. } => assert_eq!(reason, "location does not exist"),
            other => panic!("unexpected error: {other}"),
        }

        let err = reader
            .probe(&DistributionLocation::Directory(temp.path().to_path_buf()))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_probe_unparseable_descriptor_is_unreachable() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(VERSION_DESCRIPTOR_FILE), "{ broken").unwrap();

        let err = DistributionReader::default()
            .probe(&DistributionLocation::Directory(temp.path().to_path_buf()))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::Unreachable { .. }));
    }
}
