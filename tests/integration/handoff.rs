//! Install handoff through the service with a recording host.

use anyhow::Result;
use appswap::constants::{WATCHDOG_BINARY_STEM, WATCHDOG_PREFIX};
use appswap::core::UpdateError;
use appswap::test_utils::{MockHost, UpdateFixture, init_test_logging};
use appswap::upgrade::install_lock;
use appswap::upgrade::{InstallJob, StagedArtifact, UpdateService, WatchdogKind};
use appswap::utils::platform::executable_name;

#[tokio::test]
async fn test_install_spawns_bundled_watchdog_copy() -> Result<()> {
    init_test_logging(None);
    let fixture = UpdateFixture::new(b"v1")?;
    let bundle = fixture.root().join("bundle");
    std::fs::create_dir_all(&bundle)?;
    std::fs::write(bundle.join(executable_name(WATCHDOG_BINARY_STEM)), b"watchdog binary")?;

    let service = UpdateService::with_host(fixture.config(vec![], "1.0.0"), MockHost::new())
        .with_watchdog_dirs(vec![bundle]);
    let staged = StagedArtifact::from_path(&fixture.stage("fixture-host-2.0.0", b"v2")?).await?;

    let job = service.install(&staged, Some("2.0.0")).await?;

    assert_eq!(job.kind, WatchdogKind::Compiled);
    assert_eq!(job.target, fixture.target());
    assert_eq!(std::fs::read(&job.watchdog)?, b"watchdog binary");
    let name = job.watchdog.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with(&format!("{WATCHDOG_PREFIX}{}", job.id)));

    let launches = service.host().launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].0, job.watchdog);
    assert_eq!(launches[0].1.len(), 3);
    assert_eq!(launches[0].1[0], fixture.target().into_os_string());

    let lock = install_lock::read(&fixture.staging_dir()).await.expect("lock written");
    assert_eq!(lock.job_id, job.id);
    assert_eq!(InstallJob::load(&fixture.staging_dir()).await, Some(job));
    Ok(())
}

#[tokio::test]
async fn test_install_falls_back_to_script() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let service = UpdateService::with_host(fixture.config(vec![], "1.0.0"), MockHost::new())
        .with_watchdog_dirs(vec![]);
    let staged = StagedArtifact::from_path(&fixture.stage("fixture-host-2.0.0", b"v2")?).await?;

    let job = service.install(&staged, None).await?;

    assert_eq!(job.kind, WatchdogKind::Script);
    let script = std::fs::read_to_string(&job.watchdog)?;
    assert!(script.contains("update-success.flag"));

    let (program, args) = service.host().launches().remove(0);
    if cfg!(windows) {
        assert_eq!(program, job.watchdog);
        assert_eq!(args.len(), 3);
    } else {
        assert_eq!(program, std::path::PathBuf::from("/bin/sh"));
        assert_eq!(args.len(), 4);
        assert_eq!(args[0], job.watchdog.clone().into_os_string());
    }
    Ok(())
}

#[tokio::test]
async fn test_launch_failure_is_watchdog_unavailable() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let service = UpdateService::with_host(fixture.config(vec![], "1.0.0"), MockHost::new().failing_launch())
        .with_watchdog_dirs(vec![]);
    let staged = StagedArtifact::from_path(&fixture.stage("fixture-host-2.0.0", b"v2")?).await?;

    let err = service.install(&staged, None).await.unwrap_err();

    assert!(matches!(err, UpdateError::WatchdogUnavailable { .. }));
    assert!(install_lock::read(&fixture.staging_dir()).await.is_none());
    assert!(InstallJob::load(&fixture.staging_dir()).await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_second_install_refused_while_first_is_live() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let service = UpdateService::with_host(fixture.config(vec![], "1.0.0"), MockHost::new())
        .with_watchdog_dirs(vec![]);
    let staged = StagedArtifact::from_path(&fixture.stage("fixture-host-2.0.0", b"v2")?).await?;

    service.install(&staged, None).await?;
    let err = service.install(&staged, None).await.unwrap_err();
    assert!(matches!(err, UpdateError::InstallInProgress { .. }));
    Ok(())
}

#[tokio::test]
async fn test_transient_host_without_install_is_locator_failure() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let mut config = fixture.config(vec![], "1.0.0");
    config.install_fallbacks = vec![fixture.root().join("nowhere")];
    let service = UpdateService::with_host(config, MockHost::new()).with_watchdog_dirs(vec![]);
    let staged = StagedArtifact::from_path(&fixture.stage("fixture-host-2.0.0", b"v2")?).await?;

    let err = service.install(&staged, None).await.unwrap_err();

    // The fixture lives under the system temp directory.
    assert!(matches!(err, UpdateError::LocatorFailure { .. }));
    assert!(!err.is_retryable());
    assert!(service.host().launches().is_empty());
    Ok(())
}
