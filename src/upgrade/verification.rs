use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::constants::TRANSFER_CHUNK_SIZE;
use crate::core::UpdateError;

/// SHA-256 checks for staged artifacts and replaced executables.
///
/// Digests use the `sha256:<lowercase hex>` form. Expected values from a
/// version descriptor may omit the prefix and may use either case.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Digest of the file at `file_path`, read in chunks.
    pub async fn compute_sha256(file_path: &Path) -> Result<String, UpdateError> {
        debug!("Computing SHA256 checksum for: {}", file_path.display());

        let mut file = tokio::fs::File::open(file_path)
            .await
            .map_err(|e| UpdateError::filesystem("open", file_path, e))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; TRANSFER_CHUNK_SIZE];
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .map_err(|e| UpdateError::filesystem("read", file_path, e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(format_digest(hasher))
    }

    /// Fail with [`UpdateError::IntegrityFailure`] unless the digests match.
    pub async fn verify_checksum(file_path: &Path, expected_checksum: &str) -> Result<(), UpdateError> {
        info!("Verifying checksum for: {}", file_path.display());

        let actual_checksum = Self::compute_sha256(file_path).await?;
        if !Self::matches(&actual_checksum, expected_checksum) {
            return Err(UpdateError::IntegrityFailure {
                path: file_path.display().to_string(),
                expected: Self::normalize(expected_checksum),
                actual: actual_checksum,
            });
        }

        debug!("Checksum verification successful");
        Ok(())
    }

    /// Canonical `sha256:<lowercase hex>` form of a digest string.
    pub fn normalize(checksum: &str) -> String {
        let trimmed = checksum.trim();
        let hex = trimmed
            .strip_prefix("sha256:")
            .or_else(|| trimmed.strip_prefix("SHA256:"))
            .unwrap_or(trimmed);
        format!("sha256:{}", hex.to_lowercase())
    }

    /// Case-insensitive, prefix-insensitive digest comparison.
    pub fn matches(actual: &str, expected: &str) -> bool {
        Self::normalize(actual) == Self::normalize(expected)
    }
}

/// Finish a running hasher into the `sha256:<hex>` form.
pub(crate) fn format_digest(hasher: Sha256) -> String {
    format!("sha256:{:x}", hasher.finalize())
}
