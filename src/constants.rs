//! Global constants used throughout the appswap codebase.
//!
//! File names that form the on-disk contract between the host and the
//! watchdog live here, next to the default retry parameters. The retry
//! values are only defaults; [`crate::config::WatchdogSettings`] carries the
//! values actually used so tests can shrink them.

use std::time::Duration;

/// Name of the version descriptor expected at every distribution location.
pub const VERSION_DESCRIPTOR_FILE: &str = "version.json";

/// Directory under the OS temp root used for staging when none is configured.
pub const DEFAULT_STAGING_DIR_NAME: &str = "app-updates";

/// Durable marker written by the watchdog after a successful install.
pub const SUCCESS_MARKER_FILE: &str = "update-success.flag";

/// Durable marker written by the watchdog after a failed install.
///
/// Its content is the human-readable failure reason.
pub const ERROR_MARKER_FILE: &str = "update-error.flag";

/// Lock marker held by the host while a transfer is streaming.
pub const TRANSFER_LOCK_FILE: &str = "transfer-in-progress.lock";

/// Lock marker held by the watchdog for its whole lifetime.
pub const INSTALL_LOCK_FILE: &str = "install-in-progress.lock";

/// Record of the last handed-off install job, read back on the next launch.
pub const INSTALL_JOB_FILE: &str = "install-job.json";

/// Extension of in-flight transfer files inside the staging directory.
pub const PARTIAL_EXTENSION: &str = "partial";

/// Suffix appended to the target executable name for its backup copy.
pub const BACKUP_SUFFIX: &str = "backup";

/// Prefix of per-attempt watchdog copies and generated scripts.
pub const WATCHDOG_PREFIX: &str = "watchdog-";

/// File name stem of the compiled watchdog shipped next to the host.
pub const WATCHDOG_BINARY_STEM: &str = "appswap-watchdog";

/// Default number of poll-and-kill rounds before giving up on the host.
pub const DEFAULT_MAX_KILL_ATTEMPTS: u32 = 10;

/// Default delay between poll-and-kill rounds (2 seconds).
pub const DEFAULT_KILL_RETRY_DELAY_MS: u64 = 2_000;

/// Default wait before the single retry of deleting the target (2 seconds).
pub const DEFAULT_DELETE_RETRY_DELAY_MS: u64 = 2_000;

/// Default number of attempts when restoring the backup during rollback.
pub const DEFAULT_RESTORE_ATTEMPTS: u32 = 3;

/// Default timeout for reading remote descriptors (10 seconds).
pub const DEFAULT_UPDATE_TIMEOUT_MS: u64 = 10_000;

/// Longest a transfer waits for the next chunk before giving up (30 seconds).
pub const DEFAULT_CHUNK_TIMEOUT_MS: u64 = 30_000;

/// Read buffer size used by the filesystem transport.
pub const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

/// Capacity of the progress broadcast channel.
///
/// Subscribers that fall further behind than this skip events instead of
/// stalling the producer.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 128;

/// Age after which a lock marker whose owner cannot be identified is stale.
pub fn stale_lock_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}
