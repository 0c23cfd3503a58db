//! appswap-watchdog: the detached installer process.
//!
//! Invoked by the handoff with exactly three arguments:
//!
//! ```text
//! appswap-watchdog <target executable> <staged artifact> <own path>
//! ```
//!
//! Waits for the host to exit (killing it if needed), swaps the executable,
//! verifies it, restarts the host and leaves `update-success.flag` or
//! `update-error.flag` next to its own path. Logs go to `<own stem>.log` in
//! the same directory.

use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use appswap::config::{UpdateConfig, WatchdogSettings};
use appswap::upgrade::SystemHost;
use appswap::upgrade::watchdog::{InstallPaths, Watchdog, remove_own_copy};

/// Exit code for a malformed invocation.
const USAGE_EXIT_CODE: i32 = 2;

#[tokio::main]
async fn main() {
    let paths = match InstallPaths::from_args(std::env::args_os().skip(1)) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("usage: appswap-watchdog <target> <staged> <watchdog>");
            std::process::exit(USAGE_EXIT_CODE);
        }
    };

    init_logging(&paths);

    let settings = match UpdateConfig::load_for_executable(&paths.target).await {
        Ok(config) => config.watchdog,
        Err(e) => {
            warn!("Using default watchdog settings: {e:#}");
            WatchdogSettings::default()
        }
    };

    let watchdog = Watchdog::new(SystemHost::new(), paths, settings);
    let report = watchdog.run().await;
    info!(
        succeeded = report.succeeded(),
        rolled_back = report.rolled_back,
        restarted = report.restarted,
        "Watchdog finished"
    );

    remove_own_copy(watchdog.paths()).await;
    std::process::exit(report.exit_code());
}

/// Log to `<stem>.log` beside the watchdog, and to stderr when attached.
fn init_logging(paths: &InstallPaths) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_path = paths.log_path();

    match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .try_init();
        }
        Err(e) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::io::stderr)
                .try_init();
            warn!("Cannot open log file {}: {e}", log_path.display());
        }
    }
}
