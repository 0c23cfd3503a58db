//! Process control seam used by the orchestrator and the watchdog.
//!
//! [`HostControl`] covers the OS side effects the install protocol needs:
//! finding the host by process name, force-killing it, launching detached
//! processes and copying the artifact over the target. [`SystemHost`] is the
//! real implementation; tests substitute a recording mock.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use sysinfo::{Process, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

pub trait HostControl: Send + Sync {
    /// Whether any process other than the caller runs under `process_name`.
    fn is_running(&self, process_name: &str) -> bool;

    /// Force-kill every process named `process_name`; returns how many kills
    /// were issued.
    fn terminate(&self, process_name: &str) -> usize;

    /// Start `program` detached from the caller (own session on Unix,
    /// detached console on Windows) with all standard streams closed.
    fn launch_detached(&self, program: &Path, args: &[OsString]) -> io::Result<u32>;

    /// Copy `from` over `to`, returning the bytes written.
    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        std::fs::copy(from, to)
    }
}

impl<T: HostControl + ?Sized> HostControl for Arc<T> {
    fn is_running(&self, process_name: &str) -> bool {
        (**self).is_running(process_name)
    }

    fn terminate(&self, process_name: &str) -> usize {
        (**self).terminate(process_name)
    }

    fn launch_detached(&self, program: &Path, args: &[OsString]) -> io::Result<u32> {
        (**self).launch_detached(program, args)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        (**self).copy_file(from, to)
    }
}

/// [`HostControl`] backed by `sysinfo` and `std::process`.
#[derive(Debug, Default)]
pub struct SystemHost;

impl SystemHost {
    pub fn new() -> Self {
        Self
    }

    fn snapshot() -> System {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_exe(sysinfo::UpdateKind::OnlyIfNotSet),
        );
        system
    }

    fn matching<'a>(system: &'a System, process_name: &str) -> Vec<&'a Process> {
        let own_pid = sysinfo::get_current_pid().ok();
        system
            .processes()
            .values()
            .filter(|process| Some(process.pid()) != own_pid && process.thread_kind().is_none())
            .filter(|process| process_matches(process, process_name))
            .collect()
    }
}

fn names_equal(candidate: &OsStr, wanted: &str) -> bool {
    if cfg!(windows) {
        candidate.to_string_lossy().eq_ignore_ascii_case(wanted)
    } else {
        candidate == OsStr::new(wanted)
    }
}

/// Linux truncates `comm` to 15 bytes, so the executable file name is checked
/// as well as the reported process name.
fn process_matches(process: &Process, wanted: &str) -> bool {
    if names_equal(process.name(), wanted) {
        return true;
    }
    process
        .exe()
        .and_then(Path::file_name)
        .is_some_and(|file_name| names_equal(file_name, wanted))
}

impl HostControl for SystemHost {
    fn is_running(&self, process_name: &str) -> bool {
        let system = Self::snapshot();
        !Self::matching(&system, process_name).is_empty()
    }

    fn terminate(&self, process_name: &str) -> usize {
        let system = Self::snapshot();
        let mut killed = 0;
        for process in Self::matching(&system, process_name) {
            if process.kill() {
                debug!("Killed {} (pid {})", process_name, process.pid());
                killed += 1;
            } else {
                warn!("Failed to kill {} (pid {})", process_name, process.pid());
            }
        }
        killed
    }

    fn launch_detached(&self, program: &Path, args: &[OsString]) -> io::Result<u32> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = program.parent()
            && !dir.as_os_str().is_empty()
            && dir.is_dir()
        {
            command.current_dir(dir);
        }
        detach(&mut command);

        let child = command.spawn()?;
        debug!("Launched {} detached (pid {})", program.display(), child.id());
        Ok(child.id())
    }
}

/// Start the child in a new session, so a closing terminal cannot signal it.
#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: the hook only calls `setsid`, which is async-signal-safe.
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_process_is_not_running() {
        let host = SystemHost::new();
        assert!(!host.is_running("appswap-no-such-process-7f3a"));
        assert_eq!(host.terminate("appswap-no-such-process-7f3a"), 0);
    }

    #[test]
    fn test_own_process_is_excluded() {
        let own = std::env::current_exe().unwrap();
        let name = own.file_name().unwrap().to_string_lossy().into_owned();
        // Test binaries are not shared with other processes, so only this
        // process could match and it is filtered out.
        assert!(!SystemHost::new().is_running(&name));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_launched_process_leads_its_own_session() {
        let temp = tempfile::TempDir::new().unwrap();
        let out = temp.path().join("session");
        let script = format!(
            "cut -d' ' -f6 /proc/$$/stat > '{0}.tmp'; echo $$ >> '{0}.tmp'; mv '{0}.tmp' '{0}'",
            out.display()
        );
        SystemHost::new()
            .launch_detached(Path::new("/bin/sh"), &[OsString::from("-c"), OsString::from(script)])
            .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !out.exists() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        let content = std::fs::read_to_string(&out).unwrap();
        let mut lines = content.lines();
        let session = lines.next().unwrap();
        let pid = lines.next().unwrap();
        assert_eq!(session, pid);
    }

    #[cfg(unix)]
    #[test]
    fn test_launch_detached_returns_pid() {
        let pid = SystemHost::new()
            .launch_detached(Path::new("/bin/sh"), &[OsString::from("-c"), OsString::from("exit 0")])
            .unwrap();
        assert!(pid > 0);
    }
}
