//! Transfer Engine: stream an artifact into staging with progress and checks.
//!
//! Every transport is a [`TransferSource`]: a byte stream with a known total
//! size and an optional expected digest. The engine writes to
//! `<dest>.partial`, hashes while streaming, and only renames onto `dest` once
//! size and digest check out. Any failure, including cancellation, deletes the
//! partial file, so an interrupted transfer never leaves a full-size
//! destination behind.
//!
//! Each chunk read races the cancel token and a stall timeout, so a dead
//! share or a silent HTTP peer cannot pin the transfer.

use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_CHUNK_TIMEOUT_MS, PARTIAL_EXTENSION, TRANSFER_CHUNK_SIZE};
use crate::core::UpdateError;
use crate::upgrade::descriptor::DistributionLocation;
use crate::upgrade::verification::{ChecksumVerifier, format_digest};
use crate::utils::fs::remove_file_if_exists;

/// Byte-level progress of a running transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub transferred: u64,
    pub total: u64,
    /// Whole percent, 0 to 100
    pub percent: u8,
}

/// A readable byte stream with a known size.
pub trait TransferSource: Send {
    /// Human-readable origin, used in errors and logs.
    fn location(&self) -> String;

    /// Total number of bytes the stream will yield.
    fn total_size(&self) -> u64;

    /// Expected digest, when the publisher supplied one.
    fn expected_sha256(&self) -> Option<&str>;

    /// Next chunk, or `None` at end of stream.
    fn next_chunk(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>, UpdateError>> + Send;
}

/// Copy from a local file or network share.
pub struct FileSource {
    path: PathBuf,
    file: tokio::fs::File,
    size: u64,
    expected_sha256: Option<String>,
}

impl FileSource {
    pub async fn open(path: &Path, expected_sha256: Option<String>) -> Result<Self, UpdateError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| UpdateError::Unreachable {
                location: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let size = file
            .metadata()
            .await
            .map_err(|e| UpdateError::filesystem("read metadata of", path, e))?
            .len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
            expected_sha256,
        })
    }
}

impl TransferSource for FileSource {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn total_size(&self) -> u64 {
        self.size
    }

    fn expected_sha256(&self) -> Option<&str> {
        self.expected_sha256.as_deref()
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, UpdateError> {
        let mut buffer = vec![0u8; TRANSFER_CHUNK_SIZE];
        let read = self
            .file
            .read(&mut buffer)
            .await
            .map_err(|e| UpdateError::filesystem("read", &self.path, e))?;
        if read == 0 {
            return Ok(None);
        }
        buffer.truncate(read);
        Ok(Some(buffer))
    }
}

/// HTTP download.
pub struct HttpSource {
    url: String,
    response: reqwest::Response,
    size: u64,
    expected_sha256: Option<String>,
}

impl HttpSource {
    /// Start a GET request.
    ///
    /// The size comes from `Content-Length`, or from the descriptor when the
    /// server does not send one.
    pub async fn open(
        client: &reqwest::Client,
        url: &str,
        expected_size: Option<u64>,
        expected_sha256: Option<String>,
    ) -> Result<Self, UpdateError> {
        let network = |reason: String| UpdateError::Network {
            url: url.to_string(),
            reason,
        };

        let response = client.get(url).send().await.map_err(|e| network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(network(format!("HTTP {}", response.status())));
        }

        let size = response
            .content_length()
            .or(expected_size)
            .ok_or_else(|| network("server did not report the artifact size".to_string()))?;

        Ok(Self {
            url: url.to_string(),
            response,
            size,
            expected_sha256,
        })
    }
}

impl TransferSource for HttpSource {
    fn location(&self) -> String {
        self.url.clone()
    }

    fn total_size(&self) -> u64 {
        self.size
    }

    fn expected_sha256(&self) -> Option<&str> {
        self.expected_sha256.as_deref()
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, UpdateError> {
        let chunk = self.response.chunk().await.map_err(|e| UpdateError::Network {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        Ok(chunk.map(|bytes| bytes.to_vec()))
    }
}

/// Either transport, picked from the artifact location.
pub enum ArtifactSource {
    File(FileSource),
    Http(HttpSource),
}

impl ArtifactSource {
    /// Open the artifact at `location`.
    ///
    /// A published size that disagrees with what the source reports is an
    /// integrity failure before a single byte is copied.
    pub async fn open(
        client: &reqwest::Client,
        location: &DistributionLocation,
        expected_size: Option<u64>,
        expected_sha256: Option<String>,
    ) -> Result<Self, UpdateError> {
        let source = match location {
            DistributionLocation::Directory(path) => {
                Self::File(FileSource::open(path, expected_sha256).await?)
            }
            DistributionLocation::Http(url) => {
                Self::Http(HttpSource::open(client, url, expected_size, expected_sha256).await?)
            }
        };

        if let Some(expected) = expected_size
            && expected != source.total_size()
        {
            return Err(UpdateError::IntegrityFailure {
                path: location.to_string(),
                expected: format!("{expected} bytes"),
                actual: format!("{} bytes", source.total_size()),
            });
        }
        Ok(source)
    }
}

impl TransferSource for ArtifactSource {
    fn location(&self) -> String {
        match self {
            Self::File(s) => s.location(),
            Self::Http(s) => s.location(),
        }
    }

    fn total_size(&self) -> u64 {
        match self {
            Self::File(s) => s.total_size(),
            Self::Http(s) => s.total_size(),
        }
    }

    fn expected_sha256(&self) -> Option<&str> {
        match self {
            Self::File(s) => s.expected_sha256(),
            Self::Http(s) => s.expected_sha256(),
        }
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, UpdateError> {
        match self {
            Self::File(s) => s.next_chunk().await,
            Self::Http(s) => s.next_chunk().await,
        }
    }
}

/// A verified artifact in the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub path: PathBuf,
    pub size: u64,
    /// `sha256:<hex>` digest of the staged bytes
    pub sha256: Option<String>,
}

impl StagedArtifact {
    /// Describe an artifact that is already on disk, e.g. one passed to
    /// `appswap install`.
    pub async fn from_path(path: &Path) -> Result<Self, UpdateError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| UpdateError::missing("staged artifact", path))?;
        if !metadata.is_file() {
            return Err(UpdateError::missing("staged artifact", path));
        }
        let sha256 = ChecksumVerifier::compute_sha256(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            sha256: Some(sha256),
        })
    }
}

/// Cancellation for a transfer; clones share one token.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        self.0.cancelled().await;
    }
}

/// Path of the in-flight file for `dest`.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PARTIAL_EXTENSION);
    dest.with_file_name(name)
}

/// Streams a [`TransferSource`] to disk.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    cancel: CancelHandle,
    chunk_timeout: Duration,
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self {
            cancel: CancelHandle::new(),
            chunk_timeout: Duration::from_millis(DEFAULT_CHUNK_TIMEOUT_MS),
        }
    }
}

impl TransferEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the transfer when `cancel` fires, even mid-read.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fail when the source yields nothing for `timeout`.
    #[must_use]
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Copy `source` to `dest`, reporting whole-percent progress.
    ///
    /// `on_progress` is called at start, once per percent change and at 100%.
    pub async fn transfer<S, F>(
        &self,
        source: &mut S,
        dest: &Path,
        mut on_progress: F,
    ) -> Result<StagedArtifact, UpdateError>
    where
        S: TransferSource,
        F: FnMut(TransferProgress),
    {
        let partial = partial_path(dest);
        info!("Transferring {} to {}", source.location(), dest.display());

        match self.stream_to(source, &partial, dest, &mut on_progress).await {
            Ok(staged) => Ok(staged),
            Err(e) => {
                if let Err(remove_err) = remove_file_if_exists(&partial).await {
                    warn!("Failed to remove partial file {}: {remove_err}", partial.display());
                }
                Err(e)
            }
        }
    }

    async fn stream_to<S, F>(
        &self,
        source: &mut S,
        partial: &Path,
        dest: &Path,
        on_progress: &mut F,
    ) -> Result<StagedArtifact, UpdateError>
    where
        S: TransferSource,
        F: FnMut(TransferProgress),
    {
        if let Some(parent) = partial.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UpdateError::filesystem("create", parent, e))?;
        }

        let mut file = tokio::fs::File::create(partial)
            .await
            .map_err(|e| UpdateError::filesystem("create", partial, e))?;

        let location = source.location();
        let total = source.total_size();
        let mut hasher = Sha256::new();
        let mut transferred: u64 = 0;
        let mut reporter = PercentReporter::new(total);
        reporter.report(0, on_progress);

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    info!("Transfer from {location} cancelled");
                    return Err(UpdateError::TransferCancelled { location });
                }
                next = tokio::time::timeout(self.chunk_timeout, source.next_chunk()) => next,
            };

            let Some(chunk) = next.map_err(|_| UpdateError::Unreachable {
                location: location.clone(),
                reason: format!("no data received for {:?}", self.chunk_timeout),
            })??
            else {
                break;
            };

            transferred += chunk.len() as u64;
            if transferred > total {
                return Err(size_mismatch(dest, total, transferred));
            }

            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| UpdateError::filesystem("write", partial, e))?;
            reporter.report(transferred, on_progress);
        }

        file.flush().await.map_err(|e| UpdateError::filesystem("flush", partial, e))?;
        file.sync_all().await.map_err(|e| UpdateError::filesystem("sync", partial, e))?;
        drop(file);

        if transferred != total {
            return Err(size_mismatch(dest, total, transferred));
        }

        let on_disk = tokio::fs::metadata(partial)
            .await
            .map_err(|e| UpdateError::filesystem("read metadata of", partial, e))?
            .len();
        if on_disk != total {
            return Err(size_mismatch(dest, total, on_disk));
        }

        let digest = format_digest(hasher);
        if let Some(expected) = source.expected_sha256()
            && !ChecksumVerifier::matches(&digest, expected)
        {
            return Err(UpdateError::IntegrityFailure {
                path: dest.display().to_string(),
                expected: ChecksumVerifier::normalize(expected),
                actual: digest,
            });
        }

        tokio::fs::rename(partial, dest)
            .await
            .map_err(|e| UpdateError::filesystem("move into place", dest, e))?;
        reporter.report(total, on_progress);

        debug!("Staged {} ({} bytes, {})", dest.display(), total, digest);
        Ok(StagedArtifact {
            path: dest.to_path_buf(),
            size: total,
            sha256: Some(digest),
        })
    }
}

fn size_mismatch(dest: &Path, expected: u64, actual: u64) -> UpdateError {
    UpdateError::IntegrityFailure {
        path: dest.display().to_string(),
        expected: format!("{expected} bytes"),
        actual: format!("{actual} bytes"),
    }
}

/// Emits a callback only when the whole percent changes.
struct PercentReporter {
    total: u64,
    last: Option<u8>,
}

impl PercentReporter {
    fn new(total: u64) -> Self {
        Self { total, last: None }
    }

    fn report<F: FnMut(TransferProgress)>(&mut self, transferred: u64, on_progress: &mut F) {
        let percent = if self.total == 0 {
            100
        } else {
            (transferred.min(self.total) * 100 / self.total) as u8
        };
        if self.last == Some(percent) {
            return;
        }
        self.last = Some(percent);
        on_progress(TransferProgress {
            transferred,
            total: self.total,
            percent,
        });
    }
}
