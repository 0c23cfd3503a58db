//! Terminal progress rendering for the `appswap` CLI.
//!
//! This is the reference subscriber of the
//! [`ProgressBridge`](crate::upgrade::progress::ProgressBridge): it turns the
//! event stream into an indicatif bar. Progress output can be disabled with
//! `--no-progress` or `APPSWAP_NO_PROGRESS`.

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle as IndicatifStyle};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::upgrade::progress::ProgressEvent;

fn is_progress_disabled() -> bool {
    std::env::var("APPSWAP_NO_PROGRESS").is_ok()
}

/// Thin wrapper over an indicatif bar that honors the no-progress switch.
#[derive(Clone)]
pub struct ProgressBar {
    inner: IndicatifBar,
}

impl ProgressBar {
    /// A percent bar (0..=100).
    pub fn new_percent(hidden: bool) -> Self {
        let bar = if hidden || is_progress_disabled() {
            IndicatifBar::hidden()
        } else {
            let bar = IndicatifBar::new(100);
            bar.set_style(percent_style());
            bar
        };
        Self { inner: bar }
    }

    /// A spinner for steps without measurable progress.
    pub fn new_spinner(hidden: bool) -> Self {
        let bar = if hidden || is_progress_disabled() {
            IndicatifBar::hidden()
        } else {
            let bar = IndicatifBar::new_spinner();
            bar.set_style(spinner_style());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        Self { inner: bar }
    }

    pub fn set_message(&self, msg: impl Into<String>) {
        self.inner.set_message(msg.into());
    }

    pub fn set_prefix(&self, prefix: impl Into<String>) {
        self.inner.set_prefix(prefix.into());
    }

    pub fn set_position(&self, pos: u64) {
        self.inner.set_position(pos);
    }

    pub fn finish_with_message(&self, msg: impl Into<String>) {
        self.inner.finish_with_message(msg.into());
    }

    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }
}

fn percent_style() -> IndicatifStyle {
    IndicatifStyle::default_bar()
        .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        .unwrap()
        .progress_chars("━╸━")
}

fn spinner_style() -> IndicatifStyle {
    IndicatifStyle::default_spinner()
        .template("{prefix:.bold} {spinner:.cyan} {msg}")
        .unwrap()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}

/// Drive a percent bar from a progress subscription until the bridge closes.
///
/// Lagging is fine: the next event carries the current percent anyway.
pub fn render_events(
    mut events: broadcast::Receiver<ProgressEvent>,
    hidden: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new_percent(hidden);
        loop {
            match events.recv().await {
                Ok(event) => {
                    bar.set_prefix(event.stage.to_string());
                    bar.set_position(u64::from(event.percent));
                    bar.set_message(event.message);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        bar.finish_and_clear();
    })
}

/// Create a spinner already showing `msg`.
pub fn spinner_with_message(msg: impl Into<String>, hidden: bool) -> ProgressBar {
    let spinner = ProgressBar::new_spinner(hidden);
    spinner.set_message(msg);
    spinner
}
