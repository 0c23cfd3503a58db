//! Error handling for appswap
//!
//! The error system follows two principles:
//! 1. **Strongly-typed errors** so callers can tell a skipped candidate from a
//!    corrupted transfer or a host that refused to die
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Error Categories
//!
//! - **Discovery**: [`UpdateError::Unreachable`], [`UpdateError::Network`]
//! - **Integrity**: [`UpdateError::IntegrityFailure`]
//! - **Process control**: [`UpdateError::ProcessTerminationFailure`],
//!   [`UpdateError::WatchdogUnavailable`]
//! - **File system**: [`UpdateError::FilesystemFailure`], [`UpdateError::MissingFile`]
//! - **Location**: [`UpdateError::LocatorFailure`]
//! - **Coordination**: [`UpdateError::TransferInProgress`],
//!   [`UpdateError::InstallInProgress`], [`UpdateError::TransferCancelled`]
//!
//! Only [`UpdateError::Unreachable`] is recoverable inside the resolver. Everything
//! else ends the current attempt; whether the user sees it immediately or on the
//! next launch depends on which side of the handoff it happened.
//!
//! # Examples
//!
//! ```rust,no_run
//! use appswap::core::{UpdateError, user_friendly_error};
//!
//! let error = UpdateError::LocatorFailure {
//!     current_exe: "/tmp/.mount_app/app".to_string(),
//! };
//! user_friendly_error(anyhow::Error::from(error)).display();
//! ```

use colored::Colorize;
use std::fmt;
use std::io;
use std::path::Path;
use thiserror::Error;

/// The main error type for update operations.
///
/// # Retry semantics
///
/// - [`Unreachable`](Self::Unreachable) is never surfaced by the resolver; it is
///   logged and the next candidate is tried.
/// - [`FilesystemFailure`](Self::FilesystemFailure) may already have been retried
///   once for handle-release races before it is returned.
/// - [`LocatorFailure`](Self::LocatorFailure) is explicitly non-retryable.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// A distribution candidate could not be read
    #[error("Distribution location unreachable: {location} ({reason})")]
    Unreachable {
        /// The location that was probed
        location: String,
        /// Why the probe failed
        reason: String,
    },

    /// Size or checksum mismatch after a transfer or a replacement
    #[error("Integrity check failed for {path}: expected {expected}, got {actual}")]
    IntegrityFailure {
        /// File that failed verification
        path: String,
        /// Expected size or digest
        expected: String,
        /// Observed size or digest
        actual: String,
    },

    /// The host process kept running after the whole retry budget
    #[error("Process '{process}' is still running after {attempts} termination attempts")]
    ProcessTerminationFailure {
        /// Process name that was polled
        process: String,
        /// Number of poll-and-kill rounds performed
        attempts: u32,
    },

    /// Copy, delete or permission failure on an installation file
    #[error("File system error: failed to {operation} {path}")]
    FilesystemFailure {
        /// The operation that failed (e.g. "delete", "copy")
        operation: String,
        /// The path involved
        path: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The durable install location could not be determined
    #[error(
        "Cannot determine the real install location: {current_exe} is running from a temporary directory"
    )]
    LocatorFailure {
        /// Path of the running executable
        current_exe: String,
    },

    /// A file the install job depends on does not exist
    #[error("Required {role} not found: {path}")]
    MissingFile {
        /// What the file is ("target executable", "staged artifact", ...)
        role: String,
        /// The missing path
        path: String,
    },

    /// The transfer was cancelled by the user
    #[error("Transfer from {location} was cancelled")]
    TransferCancelled {
        /// Source of the cancelled transfer
        location: String,
    },

    /// Another transfer holds the staging lock
    #[error("Another transfer is already in progress (lock: {lock})")]
    TransferInProgress {
        /// Path of the held lock marker
        lock: String,
    },

    /// A watchdog from a previous attempt is still alive
    #[error("An install is already in progress (watchdog pid {pid})")]
    InstallInProgress {
        /// Process id recorded in the install lock
        pid: u32,
    },

    /// No watchdog could be located, materialized or spawned
    #[error("Watchdog unavailable: {reason}")]
    WatchdogUnavailable {
        /// What went wrong
        reason: String,
    },

    /// HTTP transport failure
    #[error("Network error while fetching {url}: {reason}")]
    Network {
        /// Requested URL
        url: String,
        /// Transport error text
        reason: String,
    },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },
}

impl UpdateError {
    /// Build a [`UpdateError::FilesystemFailure`] for `operation` on `path`.
    pub fn filesystem(operation: &str, path: &Path, source: io::Error) -> Self {
        Self::FilesystemFailure {
            operation: operation.to_string(),
            path: path.display().to_string(),
            source,
        }
    }

    /// Build a [`UpdateError::MissingFile`].
    pub fn missing(role: &str, path: &Path) -> Self {
        Self::MissingFile {
            role: role.to_string(),
            path: path.display().to_string(),
        }
    }

    /// Whether the caller may simply try the same operation again.
    ///
    /// Check and download failures are retryable from the UI; locator and
    /// integrity failures need a change in the environment first.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. }
                | Self::Network { .. }
                | Self::TransferCancelled { .. }
                | Self::TransferInProgress { .. }
                | Self::InstallInProgress { .. }
                | Self::IntegrityFailure { .. }
        )
    }
}

/// Error context wrapper that pairs an error with a suggestion and details.
#[derive(Debug)]
pub struct ErrorContext {
    /// Human-readable error message
    pub message: String,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors
    ///
    /// - Error message: red and bold
    /// - Details: yellow
    /// - Suggestion: green
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.message);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into a user-friendly [`ErrorContext`].
///
/// Walks the error chain looking for an [`UpdateError`] so errors wrapped with
/// `anyhow::Context` still get tailored suggestions. I/O errors get generic
/// filesystem guidance; anything else is shown as-is.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    for cause in error.chain() {
        if let Some(update_error) = cause.downcast_ref::<UpdateError>() {
            return create_error_context(update_error, &error);
        }
    }

    if let Some(io_error) = error.downcast_ref::<io::Error>() {
        return match io_error.kind() {
            io::ErrorKind::PermissionDenied => ErrorContext::new(format!("{error:#}"))
                .with_suggestion(
                    "Check that you can write to the install and staging directories",
                ),
            io::ErrorKind::NotFound => ErrorContext::new(format!("{error:#}"))
                .with_suggestion("Check that the file or directory exists and the path is correct"),
            _ => ErrorContext::new(format!("{error:#}")),
        };
    }

    ErrorContext::new(format!("{error:#}"))
}

fn create_error_context(error: &UpdateError, full: &anyhow::Error) -> ErrorContext {
    let context = ErrorContext::new(format!("{full:#}"));
    match error {
        UpdateError::Unreachable { .. } | UpdateError::Network { .. } => context
            .with_suggestion("Check that the distribution share or server is reachable and try again")
            .with_details("Each configured update path is tried in priority order"),
        UpdateError::IntegrityFailure { .. } => context
            .with_suggestion("Download the update again; the staged copy was discarded")
            .with_details("The copied file does not match the published artifact"),
        UpdateError::ProcessTerminationFailure { .. } => context
            .with_suggestion("Close the application manually and retry the install")
            .with_details("No files were modified"),
        UpdateError::FilesystemFailure { .. } => context.with_suggestion(
            "Make sure no other program is using the executable and that you have write access",
        ),
        UpdateError::LocatorFailure { .. } => context
            .with_suggestion("Reinstall the application from its real location and run it from there")
            .with_details(
                "Updating a copy inside a temporary directory would leave the installed version unchanged",
            ),
        UpdateError::MissingFile { .. } => {
            context.with_suggestion("Download the update again before installing")
        }
        UpdateError::TransferCancelled { .. } => context,
        UpdateError::TransferInProgress { .. } => context
            .with_suggestion("Wait for the running download to finish, or run `appswap cleanup`"),
        UpdateError::InstallInProgress { .. } => {
            context.with_suggestion("Wait for the running install to finish and restart the application")
        }
        UpdateError::WatchdogUnavailable { .. } => context.with_suggestion(
            "Reinstall the application so the appswap-watchdog helper is shipped next to it",
        ),
        UpdateError::Config { .. } => {
            context.with_suggestion("Fix the configuration file or remove it to use defaults")
        }
    }
}
