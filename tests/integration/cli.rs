//! Behavior of the `appswap` and `appswap-watchdog` binaries.

use anyhow::Result;
use appswap::constants::{ERROR_MARKER_FILE, SUCCESS_MARKER_FILE, TRANSFER_LOCK_FILE};
use appswap::test_utils::UpdateFixture;
use assert_cmd::Command;
use predicates::prelude::*;

fn appswap() -> Command {
    let mut cmd = Command::cargo_bin("appswap").unwrap();
    cmd.env_remove("APPSWAP_CONFIG")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .arg("--no-progress");
    cmd
}

#[test]
fn test_check_reports_available_update() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let dist = fixture.publish("a", "2.0.0", b"v2")?;
    let config = fixture.write_config(&fixture.config(vec![dist], "1.0.0"))?;

    appswap()
        .arg("--config")
        .arg(&config)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Update available: 1.0.0 -> 2.0.0"))
        .stdout(predicate::str::contains("Release 2.0.0"));
    Ok(())
}

#[test]
fn test_check_json_when_up_to_date() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let dist = fixture.publish("a", "1.0.0", b"v1")?;
    let config = fixture.write_config(&fixture.config(vec![dist], "1.0.0"))?;

    let output = appswap().arg("--config").arg(&config).args(["check", "--json"]).output()?;
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(value["update_available"], false);
    assert_eq!(value["current_version"], "1.0.0");
    Ok(())
}

#[test]
fn test_download_stages_artifact() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let dist = fixture.publish("a", "2.0.0", b"new build")?;
    let config = fixture.write_config(&fixture.config(vec![dist], "1.0.0"))?;

    appswap()
        .arg("--config")
        .arg(&config)
        .arg("download")
        .assert()
        .success()
        .stdout(predicate::str::contains("Staged"));
    assert_eq!(std::fs::read(fixture.staging_dir().join("fixture-host-2.0.0"))?, b"new build");
    Ok(())
}

#[test]
fn test_install_missing_artifact_fails() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let config = fixture.write_config(&fixture.config(vec![], "1.0.0"))?;

    appswap()
        .arg("--config")
        .arg(&config)
        .arg("install")
        .arg(fixture.root().join("no-such-artifact"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("staged artifact"));
    Ok(())
}

#[test]
fn test_status_consumes_error_marker() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let config = fixture.write_config(&fixture.config(vec![], "1.0.0"))?;
    std::fs::write(
        fixture.staging_dir().join(ERROR_MARKER_FILE),
        "Install failed while terminating the application",
    )?;

    appswap()
        .arg("--config")
        .arg(&config)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Last install failed"));
    assert!(!fixture.staging_dir().join(ERROR_MARKER_FILE).exists());

    appswap()
        .arg("--config")
        .arg(&config)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No install outcome"));
    Ok(())
}

#[test]
fn test_cleanup_removes_stale_files() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let config = fixture.write_config(&fixture.config(vec![], "1.0.0"))?;
    std::fs::write(fixture.staging_dir().join(TRANSFER_LOCK_FILE), "")?;
    std::fs::write(fixture.staging_dir().join("fixture-host-2.0.0.partial"), b"half")?;

    appswap()
        .arg("--config")
        .arg(&config)
        .arg("cleanup")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1 lock(s), 1 partial download(s)"));
    Ok(())
}

#[test]
fn test_invalid_config_is_reported() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let config = fixture.root().join("appswap.toml");
    std::fs::write(&config, "update_paths = [")?;

    appswap()
        .arg("--config")
        .arg(&config)
        .arg("check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error"));
    Ok(())
}

#[test]
fn test_watchdog_rejects_wrong_argument_count() {
    Command::cargo_bin("appswap-watchdog")
        .unwrap()
        .args(["only", "two"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("expected 3 arguments"));
}

/// Runs the real watchdog binary from a per-attempt copy in staging.
#[cfg(unix)]
#[test]
fn test_watchdog_binary_swaps_idle_target() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let fixture = UpdateFixture::new(b"#!/bin/sh\nexit 0\n")?;
    std::fs::set_permissions(fixture.target(), std::fs::Permissions::from_mode(0o755))?;
    let staged = fixture.stage("fixture-host-2.0.0", b"#!/bin/sh\necho v2\nexit 0\n")?;

    let watchdog = fixture.staging_dir().join("watchdog-e2e");
    std::fs::copy(assert_cmd::cargo::cargo_bin("appswap-watchdog"), &watchdog)?;

    Command::new(&watchdog)
        .env_remove("APPSWAP_CONFIG")
        .arg(fixture.target())
        .arg(&staged)
        .arg(&watchdog)
        .assert()
        .success();

    assert_eq!(std::fs::read(fixture.target())?, b"#!/bin/sh\necho v2\nexit 0\n");
    assert!(!staged.exists());
    assert!(fixture.staging_dir().join(SUCCESS_MARKER_FILE).exists());
    assert!(fixture.staging_dir().join("watchdog-e2e.log").exists());
    assert!(!watchdog.exists());
    Ok(())
}
