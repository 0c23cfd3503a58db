//! Configuration for the host command surface and the watchdog.
//!
//! Everything lives in one TOML file so the watchdog, which only receives three
//! paths on its command line, can find the same retry budget the host uses.

mod update;

pub use crate::upgrade::config::WatchdogSettings;
pub use update::{CONFIG_ENV_VAR, UpdateConfig};
