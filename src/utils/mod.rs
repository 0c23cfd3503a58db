//! Cross-platform helpers shared by the host CLI and the watchdog.
//!
//! - [`fs`] - atomic writes and tolerant removal
//! - [`platform`] - executable naming and process names
//! - [`progress`] - terminal rendering of progress events

pub mod fs;
pub mod platform;
pub mod progress;

pub use fs::{atomic_write, ensure_dir};
pub use platform::{executable_name, is_windows, process_name_for};
pub use progress::{ProgressBar, render_events};
