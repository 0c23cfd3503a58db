//! The install state machine against a mock host.

use anyhow::Result;
use appswap::config::WatchdogSettings;
use appswap::constants::{ERROR_MARKER_FILE, SUCCESS_MARKER_FILE};
use appswap::test_utils::{MockHost, UpdateFixture, init_test_logging};
use appswap::upgrade::backup::BackupManager;
use appswap::upgrade::markers::InstallOutcome;
use appswap::upgrade::watchdog::Phase;
use appswap::upgrade::{InstallPaths, UpdateService, Watchdog};

fn paths(fixture: &UpdateFixture, staged: &[u8]) -> Result<InstallPaths> {
    Ok(InstallPaths {
        target: fixture.target(),
        staged: fixture.stage("fixture-host-2.0.0", staged)?,
        watchdog: fixture.staging_dir().join("watchdog-it-job"),
    })
}

#[tokio::test]
async fn test_completed_run_swaps_target_and_reports_on_next_launch() -> Result<()> {
    init_test_logging(None);
    let fixture = UpdateFixture::new(b"version one")?;
    let paths = paths(&fixture, b"version two")?;
    let watchdog = Watchdog::new(
        MockHost::new().running_for(1),
        paths.clone(),
        WatchdogSettings::with_uniform_delay(3, 5),
    );

    let report = watchdog.run().await;

    assert!(report.succeeded(), "{report:?}");
    assert!(report.restarted);
    assert_eq!(std::fs::read(&paths.target)?, b"version two");
    assert!(!paths.staged.exists());
    assert!(!BackupManager::backup_path_for(&paths.target).exists());
    assert_eq!(watchdog.host().kill_count(), 1);

    let mut service = UpdateService::with_host(fixture.config(vec![], "1.0.0"), MockHost::new());
    let outcome = service.take_last_outcome().await?;
    assert!(matches!(outcome, Some(InstallOutcome::Succeeded { .. })));
    assert!(!fixture.staging_dir().join(SUCCESS_MARKER_FILE).exists());
    Ok(())
}

#[tokio::test]
async fn test_unkillable_host_leaves_target_untouched() -> Result<()> {
    let fixture = UpdateFixture::new(b"version one")?;
    let paths = paths(&fixture, b"version two")?;
    let watchdog = Watchdog::new(
        MockHost::new().unkillable(),
        paths.clone(),
        WatchdogSettings::with_uniform_delay(4, 1),
    );

    let report = watchdog.run().await;

    assert_eq!(report.failed_phase, Some(Phase::Terminate));
    assert_eq!(report.exit_code(), 1);
    assert!(!report.rolled_back);
    assert_eq!(watchdog.host().kill_count(), 4);
    assert_eq!(std::fs::read(&paths.target)?, b"version one");
    assert!(!BackupManager::backup_path_for(&paths.target).exists());
    assert!(fixture.staging_dir().join(ERROR_MARKER_FILE).exists());
    assert!(!fixture.staging_dir().join(SUCCESS_MARKER_FILE).exists());

    let mut service = UpdateService::with_host(fixture.config(vec![], "1.0.0"), MockHost::new());
    match service.take_last_outcome().await? {
        Some(InstallOutcome::Failed { reason }) => {
            assert!(reason.contains("terminating the application"), "{reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_missing_target_writes_error_marker() -> Result<()> {
    let fixture = UpdateFixture::new(b"version one")?;
    let paths = paths(&fixture, b"version two")?;
    std::fs::remove_file(&paths.target)?;

    let report = Watchdog::new(MockHost::new(), paths, WatchdogSettings::with_uniform_delay(2, 1))
        .run()
        .await;

    assert_eq!(report.failed_phase, Some(Phase::Verify));
    assert!(fixture.staging_dir().join(ERROR_MARKER_FILE).exists());
    Ok(())
}

#[tokio::test]
async fn test_backup_from_failed_rollback_survives_next_run() -> Result<()> {
    let fixture = UpdateFixture::new(b"version one")?;
    let paths = paths(&fixture, b"version two")?;
    let backup = BackupManager::backup_path_for(&paths.target);
    std::fs::remove_file(&paths.target)?;
    std::fs::write(&backup, b"the only good copy")?;

    let host = MockHost::new();
    let report = Watchdog::new(host, paths.clone(), WatchdogSettings::with_uniform_delay(2, 1))
        .run()
        .await;

    assert_eq!(report.failed_phase, Some(Phase::Verify));
    assert!(report.rolled_back);
    assert!(report.restarted);
    assert_eq!(std::fs::read(&paths.target)?, b"the only good copy");
    assert!(fixture.staging_dir().join(ERROR_MARKER_FILE).exists());
    Ok(())
}
