//! appswap - stage a new build of a running desktop application and swap it in
//! through a detached watchdog.
//!
//! A running executable usually cannot replace itself. appswap splits the job
//! between the long-lived host, which discovers and downloads the new build,
//! and a short-lived watchdog process, which waits for the host to go away,
//! swaps the executable, verifies it and starts the new version. The two never
//! talk directly after the handoff: the watchdog leaves a success or error
//! marker in the staging directory and the next host launch reads it.
//!
//! # Modules
//!
//! - [`upgrade`] - the pipeline: resolver, transfer engine, install locator,
//!   handoff orchestrator, watchdog state machine, progress bridge
//! - [`config`] - `appswap.toml` shared by the host and the watchdog
//! - [`core`] - [`UpdateError`](core::UpdateError) and version comparison
//! - [`cli`] - the `appswap` command surface
//! - [`utils`] - file system, platform and terminal helpers
//!
//! # Distribution layout
//!
//! Every distribution location, a directory, a network share or an HTTP base
//! URL, exposes two files:
//!
//! ```text
//! version.json        {"version": "2.1.6", "filename": "app-2.1.6.exe",
//!                      "changelog": "...", "mandatory": false,
//!                      "size": 18874368, "sha256": "sha256:..."}
//! app-2.1.6.exe       the full replacement executable
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use appswap::config::UpdateConfig;
//! use appswap::upgrade::{CancelHandle, UpdateService};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = UpdateConfig::load().await?;
//! let service = UpdateService::new(config);
//!
//! if let Some(update) = service.check_on_startup().await? {
//!     let staged = service.download(&update, CancelHandle::new()).await?;
//!     service.install(&staged, Some(&update.version)).await?;
//!     // The watchdog now waits for this process to exit.
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod upgrade;
pub mod utils;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
