//! Progress Bridge: fan-out of progress events to the presentation layer.
//!
//! The bridge is purely observational. Producers call [`ProgressBridge::emit`]
//! and never wait on consumers: events go through a bounded broadcast channel,
//! and a subscriber that falls behind skips ahead instead of stalling the
//! transfer. Repeated events with the same stage and percent are dropped so a
//! subscriber sees at most one event per meaningful change.
//!
//! ```rust,no_run
//! use appswap::upgrade::progress::{ProgressBridge, Stage};
//!
//! # async fn example() {
//! let bridge = ProgressBridge::new();
//! let mut events = bridge.subscribe();
//! bridge.emit(Stage::Downloading, 0, "Starting download");
//! let first = events.recv().await.unwrap();
//! assert_eq!(first.percent, 0);
//! # }
//! ```

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::constants::PROGRESS_CHANNEL_CAPACITY;
use crate::upgrade::transfer::TransferProgress;

/// Pipeline stage a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Probing distribution locations
    Checking,
    /// Streaming the artifact into staging
    Downloading,
    /// Handing off to the watchdog
    Installing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Checking => "checking",
            Self::Downloading => "downloading",
            Self::Installing => "installing",
        };
        f.write_str(label)
    }
}

/// One `{stage, percent, message}` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Pipeline stage
    pub stage: Stage,
    /// Completion from 0 to 100
    pub percent: u8,
    /// Human-readable status line
    pub message: String,
}

/// Non-blocking broadcaster of [`ProgressEvent`]s.
///
/// Cloning the bridge shares the same channel.
#[derive(Clone)]
pub struct ProgressBridge {
    sender: broadcast::Sender<ProgressEvent>,
    last: Arc<Mutex<Option<(Stage, u8)>>>,
}

impl Default for ProgressBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBridge {
    /// Create a bridge with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            sender,
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Subscribe to events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Relay an event unless it repeats the previous stage and percent.
    ///
    /// Returns whether the event was forwarded. Having no subscribers is not
    /// an error.
    pub fn emit(&self, stage: Stage, percent: u8, message: impl Into<String>) -> bool {
        let percent = percent.min(100);
        {
            let mut last = match self.last.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *last == Some((stage, percent)) {
                return false;
            }
            *last = Some((stage, percent));
        }

        let _ = self.sender.send(ProgressEvent {
            stage,
            percent,
            message: message.into(),
        });
        true
    }

    /// Adapter turning transfer callbacks into `downloading` events.
    pub fn transfer_reporter(&self) -> impl FnMut(TransferProgress) + Send + 'static {
        let bridge = self.clone();
        move |progress: TransferProgress| {
            let message = if progress.percent >= 100 {
                format!("Download complete ({} bytes)", progress.total)
            } else {
                format!("Downloaded {} of {} bytes", progress.transferred, progress.total)
            };
            bridge.emit(Stage::Downloading, progress.percent, message);
        }
    }
}
