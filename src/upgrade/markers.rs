//! Durable outcome markers: the filesystem mailbox between watchdog and host.
//!
//! The watchdog writes exactly one of `update-success.flag` or
//! `update-error.flag` next to itself in the staging directory. The next host
//! launch consumes it with [`OutcomeMarkers::take`]. Writing one marker removes
//! the other first, so the two are never present together.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::constants::{ERROR_MARKER_FILE, SUCCESS_MARKER_FILE};
use crate::core::UpdateError;
use crate::utils::fs::{atomic_write, remove_file_if_exists};

/// What the last install attempt reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum InstallOutcome {
    Succeeded { message: String },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct OutcomeMarkers {
    dir: PathBuf,
}

impl OutcomeMarkers {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn success_path(&self) -> PathBuf {
        self.dir.join(SUCCESS_MARKER_FILE)
    }

    pub fn error_path(&self) -> PathBuf {
        self.dir.join(ERROR_MARKER_FILE)
    }

    pub async fn write_success(&self, message: &str) -> Result<(), UpdateError> {
        self.write_exclusive(&self.success_path(), &self.error_path(), message).await
    }

    pub async fn write_error(&self, reason: &str) -> Result<(), UpdateError> {
        self.write_exclusive(&self.error_path(), &self.success_path(), reason).await
    }

    async fn write_exclusive(&self, path: &Path, other: &Path, content: &str) -> Result<(), UpdateError> {
        remove_file_if_exists(other)
            .await
            .map_err(|e| UpdateError::filesystem("remove", other, e))?;

        let target = path.to_path_buf();
        let bytes = content.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || atomic_write(&target, &bytes))
            .await
            .map_err(|e| UpdateError::filesystem("write", path, std::io::Error::other(e)))?
            .map_err(|e| UpdateError::filesystem("write", path, std::io::Error::other(format!("{e:#}"))))?;

        debug!("Wrote outcome marker {}", path.display());
        Ok(())
    }

    /// Read and delete whatever marker the last attempt left.
    ///
    /// If both are somehow present the error wins.
    pub async fn take(&self) -> Result<Option<InstallOutcome>, UpdateError> {
        let error = read_optional(&self.error_path()).await?;
        let success = read_optional(&self.success_path()).await?;

        let outcome = match (error, success) {
            (Some(reason), success) => {
                if success.is_some() {
                    warn!("Both outcome markers present; reporting the error");
                }
                Some(InstallOutcome::Failed {
                    reason: reason.trim().to_string(),
                })
            }
            (None, Some(message)) => Some(InstallOutcome::Succeeded {
                message: message.trim().to_string(),
            }),
            (None, None) => None,
        };

        self.clear().await?;
        Ok(outcome)
    }

    /// Remove both markers.
    pub async fn clear(&self) -> Result<(), UpdateError> {
        for path in [self.success_path(), self.error_path()] {
            remove_file_if_exists(&path)
                .await
                .map_err(|e| UpdateError::filesystem("remove", &path, e))?;
        }
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, UpdateError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(UpdateError::filesystem("read", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_markers_are_mutually_exclusive() {
        let temp = TempDir::new().unwrap();
        let markers = OutcomeMarkers::new(temp.path());

        markers.write_error("copy failed").await.unwrap();
        markers.write_success("updated to 2.0.0").await.unwrap();

        assert!(markers.success_path().exists());
        assert!(!markers.error_path().exists());
    }

    #[tokio::test]
    async fn test_take_consumes_marker() {
        let temp = TempDir::new().unwrap();
        let markers = OutcomeMarkers::new(temp.path());

        markers.write_error("Process 'app' is still running\n").await.unwrap();
        assert_eq!(
            markers.take().await.unwrap(),
            Some(InstallOutcome::Failed {
                reason: "Process 'app' is still running".to_string()
            })
        );
        assert_eq!(markers.take().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_take_prefers_error_when_both_exist() {
        let temp = TempDir::new().unwrap();
        let markers = OutcomeMarkers::new(temp.path());
        std::fs::write(markers.success_path(), "ok").unwrap();
        std::fs::write(markers.error_path(), "bad").unwrap();

        assert!(matches!(markers.take().await.unwrap(), Some(InstallOutcome::Failed { .. })));
        assert!(!markers.success_path().exists());
    }
}
