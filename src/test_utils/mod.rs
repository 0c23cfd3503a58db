//! Test utilities for appswap
//!
//! Shared by unit tests and the `tests/integration` suite (through the
//! `test-utils` feature):
//!
//! - [`UpdateFixture`] - a throwaway distribution share, install directory and
//!   staging directory
//! - [`MockHost`] - a recording [`HostControl`](crate::upgrade::HostControl)
//!   that never touches real processes
//! - [`init_test_logging`] - opt-in tracing output for tests

pub mod fixtures;
pub mod host;

pub use fixtures::UpdateFixture;
pub use host::MockHost;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`; with neither, tests stay
/// silent.
///
/// ```bash
/// RUST_LOG=appswap=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
