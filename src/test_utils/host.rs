//! Recording [`HostControl`] for tests.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::upgrade::process::HostControl;

/// A spawned program and its arguments.
pub type Launch = (PathBuf, Vec<OsString>);

/// Pretends the host runs for a number of polls, records kills and launches,
/// and never starts a real process.
#[derive(Debug)]
pub struct MockHost {
    running_polls: AtomicUsize,
    unkillable: AtomicBool,
    fail_launch: AtomicBool,
    pid: u32,
    kills: AtomicUsize,
    launches: Mutex<Vec<Launch>>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    /// A host that is not running. Launches report the test's own pid, which
    /// is always alive.
    pub fn new() -> Self {
        Self {
            running_polls: AtomicUsize::new(0),
            unkillable: AtomicBool::new(false),
            fail_launch: AtomicBool::new(false),
            pid: std::process::id(),
            kills: AtomicUsize::new(0),
            launches: Mutex::new(Vec::new()),
        }
    }

    /// Report the host as running for the next `polls` checks.
    #[must_use]
    pub fn running_for(self, polls: usize) -> Self {
        self.running_polls.store(polls, Ordering::SeqCst);
        self
    }

    /// A host that survives every kill.
    #[must_use]
    pub fn unkillable(self) -> Self {
        self.unkillable.store(true, Ordering::SeqCst);
        self
    }

    /// Make every launch fail.
    #[must_use]
    pub fn failing_launch(self) -> Self {
        self.fail_launch.store(true, Ordering::SeqCst);
        self
    }

    /// Pid reported for launched processes.
    #[must_use]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.launches.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl HostControl for MockHost {
    fn is_running(&self, _process_name: &str) -> bool {
        if self.unkillable.load(Ordering::SeqCst) {
            return true;
        }
        self.running_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn terminate(&self, _process_name: &str) -> usize {
        self.kills.fetch_add(1, Ordering::SeqCst);
        1
    }

    fn launch_detached(&self, program: &Path, args: &[OsString]) -> io::Result<u32> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "launch refused"));
        }
        if let Ok(mut launches) = self.launches.lock() {
            launches.push((program.to_path_buf(), args.to_vec()));
        }
        Ok(self.pid)
    }
}
