//! Generated watchdog script, used when the compiled watchdog is not shipped.
//!
//! The script implements the same state machine and the same three-argument
//! contract as [`Watchdog`](super::Watchdog): poll and kill the host by name
//! within a fixed budget, back up, replace, compare against the staged
//! artifact, roll back on failure, write one outcome marker, restart the host
//! and delete itself. Retry settings are baked in when the script is
//! materialized.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::WatchdogSettings;
use crate::constants::{ERROR_MARKER_FILE, INSTALL_LOCK_FILE, SUCCESS_MARKER_FILE, WATCHDOG_PREFIX};
use crate::core::UpdateError;
use crate::upgrade::watchdog::InstallPaths;

const UNIX_TEMPLATE: &str = r#"#!/bin/sh
# appswap watchdog: replaces an executable after its process exits.
# usage: <script> <target> <staged artifact> <script path>

if [ "$#" -ne 3 ]; then
    echo "usage: $0 <target> <staged> <self>" >&2
    exit 2
fi

TARGET="$1"
STAGED="$2"
SELF="$3"
DIR=$(dirname -- "$SELF")
LOG="${SELF%.*}.log"
SUCCESS="$DIR/@SUCCESS_MARKER@"
ERROR="$DIR/@ERROR_MARKER@"
LOCK="$DIR/@INSTALL_LOCK@"
BACKUP="$TARGET.backup"
NAME=$(basename -- "$TARGET")
COMM="$NAME"
if [ "$(uname -s)" = "Linux" ]; then
    COMM=$(printf '%s' "$NAME" | cut -c1-15)
fi
MAX_ATTEMPTS=@MAX_KILL_ATTEMPTS@
KILL_DELAY=@KILL_DELAY@
DELETE_DELAY=@DELETE_DELAY@
BACKUP_CREATED=0
MODIFIED=0
JOB=$(basename -- "$SELF")
JOB="${JOB#@WATCHDOG_PREFIX@}"
JOB="${JOB%.*}"

log() {
    printf '%s %s\n' "$(date '+%Y-%m-%dT%H:%M:%S')" "$*" >> "$LOG"
}

is_running() {
    if command -v pgrep >/dev/null 2>&1; then
        pgrep -x -- "$COMM" >/dev/null 2>&1
        return $?
    fi
    for comm in /proc/[0-9]*/comm; do
        [ "$(cat "$comm" 2>/dev/null)" = "$COMM" ] && return 0
    done
    return 1
}

kill_host() {
    if command -v pkill >/dev/null 2>&1; then
        pkill -9 -x -- "$COMM" >/dev/null 2>&1
        return 0
    fi
    for comm in /proc/[0-9]*/comm; do
        if [ "$(cat "$comm" 2>/dev/null)" = "$COMM" ]; then
            pid=$(basename -- "$(dirname -- "$comm")")
            kill -9 "$pid" 2>/dev/null
        fi
    done
    return 0
}

restart_host() {
    log "Restarting $TARGET"
    nohup "$TARGET" >/dev/null 2>&1 &
}

write_marker() {
    rm -f -- "$2"
    printf '%s\n' "$3" > "$1.tmp" && mv -f -- "$1.tmp" "$1"
}

finish() {
    rm -f -- "$LOCK"
    rm -f -- "$SELF"
    exit "$1"
}

fail() {
    REASON="$1"
    log "ERROR: $REASON"
    if [ "$MODIFIED" = 1 ] && [ -f "$BACKUP" ]; then
        rm -f -- "$TARGET"
        if cp -p -- "$BACKUP" "$TARGET"; then
            rm -f -- "$BACKUP"
            log "Restored $TARGET from backup"
        else
            REASON="$REASON; rollback failed, backup kept at $BACKUP"
            log "Rollback failed"
        fi
    elif [ ! -f "$TARGET" ] && [ -f "$BACKUP" ]; then
        if cp -p -- "$BACKUP" "$TARGET"; then
            rm -f -- "$BACKUP"
            REASON="$REASON; restored $TARGET from $BACKUP"
            log "Restored $TARGET from earlier backup"
        else
            REASON="$REASON; restore failed, backup kept at $BACKUP"
            log "Restore from earlier backup failed"
        fi
    elif [ "$BACKUP_CREATED" = 1 ]; then
        rm -f -- "$BACKUP"
    fi
    if ! is_running && [ -f "$TARGET" ]; then
        restart_host
    fi
    write_marker "$ERROR" "$SUCCESS" "$REASON"
    finish 1
}

log "Starting install: target=$TARGET staged=$STAGED"
printf '{"pid": %s, "job_id": "%s", "started_at": "%s"}\n' \
    "$$" "$JOB" "$(date -u '+%Y-%m-%dT%H:%M:%SZ')" > "$LOCK.tmp" && mv -f -- "$LOCK.tmp" "$LOCK"

[ -f "$TARGET" ] || fail "Required target executable not found: $TARGET"
[ -f "$STAGED" ] || fail "Required staged artifact not found: $STAGED"
EXPECTED_SIZE=$(wc -c < "$STAGED" | tr -d ' ')

attempt=0
while is_running; do
    attempt=$((attempt + 1))
    if [ "$attempt" -gt "$MAX_ATTEMPTS" ]; then
        fail "Process '$NAME' is still running after $MAX_ATTEMPTS termination attempts"
    fi
    log "Terminating $NAME (attempt $attempt)"
    kill_host
    sleep "$KILL_DELAY"
done

log "Backing up $TARGET"
cp -p -- "$TARGET" "$BACKUP" || fail "Failed to back up $TARGET"
BACKUP_CREATED=1

if ! rm -f -- "$TARGET" 2>/dev/null || [ -e "$TARGET" ]; then
    log "Could not delete $TARGET; retrying"
    sleep "$DELETE_DELAY"
    rm -f -- "$TARGET" || fail "Failed to delete $TARGET"
fi
MODIFIED=1

log "Copying $STAGED to $TARGET"
cp -- "$STAGED" "$TARGET" || fail "Failed to copy $STAGED to $TARGET"
chmod --reference="$BACKUP" "$TARGET" 2>/dev/null || chmod 755 "$TARGET" 2>/dev/null

ACTUAL_SIZE=$(wc -c < "$TARGET" | tr -d ' ')
if [ "$ACTUAL_SIZE" != "$EXPECTED_SIZE" ]; then
    fail "Integrity check failed for $TARGET: expected $EXPECTED_SIZE bytes, got $ACTUAL_SIZE bytes"
fi
if command -v cmp >/dev/null 2>&1; then
    cmp -s -- "$STAGED" "$TARGET" || fail "Integrity check failed for $TARGET: content differs from $STAGED"
fi

rm -f -- "$BACKUP" "$STAGED"
write_marker "$SUCCESS" "$ERROR" "Updated $TARGET ($ACTUAL_SIZE bytes)"
log "Install complete"
restart_host
finish 0
"#;

const WINDOWS_TEMPLATE: &str = r#"@echo off
rem appswap watchdog: replaces an executable after its process exits.
rem usage: <script> <target> <staged artifact> <script path>
setlocal EnableExtensions

if "%~3"=="" exit /b 2

set "TARGET=%~1"
set "STAGED=%~2"
set "SELF=%~f3"
set "DIR=%~dp3"
set "LOG=%~dpn3.log"
set "SUCCESS=%DIR%@SUCCESS_MARKER@"
set "ERROR=%DIR%@ERROR_MARKER@"
set "LOCK=%DIR%@INSTALL_LOCK@"
set "BACKUP=%TARGET%.backup"
set "NAME=%~nx1"
set "BACKUP_CREATED=0"
set "MODIFIED=0"
set "ATTEMPT=0"

call :log Starting install: target=%TARGET% staged=%STAGED%

if not exist "%TARGET%" (
    set "REASON=Required target executable not found: %TARGET%"
    goto fail
)
if not exist "%STAGED%" (
    set "REASON=Required staged artifact not found: %STAGED%"
    goto fail
)
for %%F in ("%STAGED%") do set "EXPECTED_SIZE=%%~zF"

:terminate
tasklist /FI "IMAGENAME eq %NAME%" 2>nul | find /I "%NAME%" >nul
if errorlevel 1 goto backup
set /a ATTEMPT+=1
if %ATTEMPT% GTR @MAX_KILL_ATTEMPTS@ (
    set "REASON=Process '%NAME%' is still running after @MAX_KILL_ATTEMPTS@ termination attempts"
    goto fail
)
call :log Terminating %NAME% attempt %ATTEMPT%
taskkill /F /IM "%NAME%" >nul 2>&1
ping -n @KILL_DELAY_PING@ 127.0.0.1 >nul
goto terminate

:backup
call :log Backing up %TARGET%
copy /Y "%TARGET%" "%BACKUP%" >nul
if errorlevel 1 (
    set "REASON=Failed to back up %TARGET%"
    goto fail
)
set "BACKUP_CREATED=1"
del /F /Q "%TARGET%" >nul 2>&1
if exist "%TARGET%" (
    ping -n @DELETE_DELAY_PING@ 127.0.0.1 >nul
    del /F /Q "%TARGET%" >nul 2>&1
)
if exist "%TARGET%" (
    set "REASON=Failed to delete %TARGET%"
    goto fail
)
set "MODIFIED=1"

call :log Copying %STAGED% to %TARGET%
copy /Y "%STAGED%" "%TARGET%" >nul
if errorlevel 1 (
    set "REASON=Failed to copy %STAGED% to %TARGET%"
    goto fail
)
for %%F in ("%TARGET%") do set "ACTUAL_SIZE=%%~zF"
if not "%ACTUAL_SIZE%"=="%EXPECTED_SIZE%" (
    set "REASON=Integrity check failed for %TARGET%: expected %EXPECTED_SIZE% bytes, got %ACTUAL_SIZE% bytes"
    goto fail
)
fc /B "%STAGED%" "%TARGET%" >nul
if errorlevel 1 (
    set "REASON=Integrity check failed for %TARGET%: content differs from %STAGED%"
    goto fail
)

del /F /Q "%BACKUP%" >nul 2>&1
del /F /Q "%STAGED%" >nul 2>&1
del /F /Q "%ERROR%" >nul 2>&1
> "%SUCCESS%" echo Updated %TARGET% (%ACTUAL_SIZE% bytes)
call :log Install complete
start "" "%TARGET%"
del /F /Q "%LOCK%" >nul 2>&1
(goto) 2>nul & del /F /Q "%SELF%" & exit /b 0

:fail
call :log ERROR: %REASON%
if "%MODIFIED%"=="1" if exist "%BACKUP%" (
    del /F /Q "%TARGET%" >nul 2>&1
    copy /Y "%BACKUP%" "%TARGET%" >nul && del /F /Q "%BACKUP%" >nul 2>&1
)
if "%MODIFIED%"=="0" if not exist "%TARGET%" if exist "%BACKUP%" (
    copy /Y "%BACKUP%" "%TARGET%" >nul && (
        del /F /Q "%BACKUP%" >nul 2>&1
        set "REASON=%REASON%; restored %TARGET% from %BACKUP%"
    )
)
if "%MODIFIED%"=="0" if "%BACKUP_CREATED%"=="1" del /F /Q "%BACKUP%" >nul 2>&1
tasklist /FI "IMAGENAME eq %NAME%" 2>nul | find /I "%NAME%" >nul
if errorlevel 1 if exist "%TARGET%" start "" "%TARGET%"
del /F /Q "%SUCCESS%" >nul 2>&1
> "%ERROR%" echo %REASON%
del /F /Q "%LOCK%" >nul 2>&1
(goto) 2>nul & del /F /Q "%SELF%" & exit /b 1

:log
>> "%LOG%" echo %DATE% %TIME% %*
exit /b 0
"#;

/// Renders and launches the script variant of the watchdog.
#[derive(Debug, Clone)]
pub struct WatchdogScript {
    settings: WatchdogSettings,
}

impl WatchdogScript {
    pub fn new(settings: WatchdogSettings) -> Self {
        Self { settings }
    }

    /// `sh` on Unix, `cmd` on Windows.
    pub const fn extension() -> &'static str {
        if cfg!(windows) { "cmd" } else { "sh" }
    }

    /// Script text for the current platform.
    pub fn render(&self) -> String {
        if cfg!(windows) { self.render_windows() } else { self.render_unix() }
    }

    pub fn render_unix(&self) -> String {
        fill_markers(UNIX_TEMPLATE)
            .replace("@MAX_KILL_ATTEMPTS@", &self.settings.max_kill_attempts.to_string())
            .replace("@KILL_DELAY@", &sleep_seconds(self.settings.kill_retry_delay_ms))
            .replace("@DELETE_DELAY@", &sleep_seconds(self.settings.delete_retry_delay_ms))
    }

    pub fn render_windows(&self) -> String {
        fill_markers(WINDOWS_TEMPLATE)
            .replace("@MAX_KILL_ATTEMPTS@", &self.settings.max_kill_attempts.to_string())
            .replace("@KILL_DELAY_PING@", &ping_count(self.settings.kill_retry_delay_ms))
            .replace("@DELETE_DELAY_PING@", &ping_count(self.settings.delete_retry_delay_ms))
            .replace('\n', "\r\n")
    }

    /// Write the script to `path` and make it executable.
    pub async fn materialize(&self, path: &Path) -> Result<(), UpdateError> {
        tokio::fs::write(path, self.render())
            .await
            .map_err(|e| UpdateError::filesystem("write", path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| UpdateError::filesystem("set permissions on", path, e))?;
        }

        debug!("Materialized watchdog script at {}", path.display());
        Ok(())
    }

    /// Program and arguments that run the script with the three install paths.
    ///
    /// The script is its own last argument, so it can find the marker
    /// directory and delete itself.
    pub fn command(paths: &InstallPaths) -> (PathBuf, Vec<OsString>) {
        if cfg!(windows) {
            (paths.watchdog.clone(), paths.to_args())
        } else {
            let mut args = vec![paths.watchdog.clone().into_os_string()];
            args.extend(paths.to_args());
            (PathBuf::from("/bin/sh"), args)
        }
    }
}

fn fill_markers(template: &str) -> String {
    template
        .replace("@SUCCESS_MARKER@", SUCCESS_MARKER_FILE)
        .replace("@ERROR_MARKER@", ERROR_MARKER_FILE)
        .replace("@INSTALL_LOCK@", INSTALL_LOCK_FILE)
        .replace("@WATCHDOG_PREFIX@", WATCHDOG_PREFIX)
}

/// Milliseconds as a `sleep` argument.
fn sleep_seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// `ping -n N` waits roughly N-1 seconds.
fn ping_count(ms: u64) -> String {
    (ms.div_ceil(1000) + 1).to_string()
}
