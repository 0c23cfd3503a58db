use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_DELETE_RETRY_DELAY_MS, DEFAULT_KILL_RETRY_DELAY_MS, DEFAULT_MAX_KILL_ATTEMPTS,
    DEFAULT_RESTORE_ATTEMPTS,
};

/// Retry budget and delays used by the watchdog.
///
/// These are the knobs of the only place where real inter-process
/// synchronization happens: the poll-and-kill loop that waits for the host to
/// release its executable. They are explicit values rather than inline
/// literals so tests can run the whole state machine with millisecond delays.
///
/// # TOML Example
/// ```toml
/// [watchdog]
/// max_kill_attempts = 10
/// kill_retry_delay_ms = 2000
/// delete_retry_delay_ms = 2000
/// restore_attempts = 3
/// ```
///
/// The compiled watchdog only receives three paths on its command line, so it
/// reads these values from the same configuration file as the host (see
/// [`crate::config::UpdateConfig::load`]) and falls back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogSettings {
    /// How many poll-and-kill rounds to run before declaring the host unkillable.
    ///
    /// # Default: `10`
    #[serde(default = "default_max_kill_attempts")]
    pub max_kill_attempts: u32,

    /// Delay after each kill, before polling again.
    ///
    /// # Default: `2000` ms
    #[serde(default = "default_kill_retry_delay_ms")]
    pub kill_retry_delay_ms: u64,

    /// Wait before the single retry of deleting the target executable.
    ///
    /// Right after termination the OS may still hold a handle on the file.
    ///
    /// # Default: `2000` ms
    #[serde(default = "default_delete_retry_delay_ms")]
    pub delete_retry_delay_ms: u64,

    /// Attempts at copying the backup back during rollback.
    ///
    /// # Default: `3`
    #[serde(default = "default_restore_attempts")]
    pub restore_attempts: u32,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            max_kill_attempts: default_max_kill_attempts(),
            kill_retry_delay_ms: default_kill_retry_delay_ms(),
            delete_retry_delay_ms: default_delete_retry_delay_ms(),
            restore_attempts: default_restore_attempts(),
        }
    }
}

const fn default_max_kill_attempts() -> u32 {
    DEFAULT_MAX_KILL_ATTEMPTS
}

const fn default_kill_retry_delay_ms() -> u64 {
    DEFAULT_KILL_RETRY_DELAY_MS
}

const fn default_delete_retry_delay_ms() -> u64 {
    DEFAULT_DELETE_RETRY_DELAY_MS
}

const fn default_restore_attempts() -> u32 {
    DEFAULT_RESTORE_ATTEMPTS
}

impl WatchdogSettings {
    /// Settings with every delay set to `delay_ms`, for fast test runs.
    #[must_use]
    pub fn with_uniform_delay(max_kill_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_kill_attempts,
            kill_retry_delay_ms: delay_ms,
            delete_retry_delay_ms: delay_ms,
            restore_attempts: default_restore_attempts(),
        }
    }

    /// Delay between poll-and-kill rounds.
    #[must_use]
    pub const fn kill_retry_delay(&self) -> Duration {
        Duration::from_millis(self.kill_retry_delay_ms)
    }

    /// Wait before retrying the target deletion.
    #[must_use]
    pub const fn delete_retry_delay(&self) -> Duration {
        Duration::from_millis(self.delete_retry_delay_ms)
    }

    /// Whether these are the defaults (used to keep saved configs short).
    #[must_use]
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}
