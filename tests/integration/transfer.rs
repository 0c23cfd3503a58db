//! Downloads into the staging directory.

use anyhow::Result;
use appswap::constants::TRANSFER_LOCK_FILE;
use appswap::core::UpdateError;
use appswap::test_utils::{MockHost, UpdateFixture, init_test_logging};
use appswap::upgrade::{CancelHandle, Stage, UpdateService};

#[tokio::test]
async fn test_download_stages_verified_artifact() -> Result<()> {
    init_test_logging(None);
    let fixture = UpdateFixture::new(b"v1")?;
    let artifact = vec![7u8; 300_000];
    let dist = fixture.publish("a", "2.0.0", &artifact)?;
    let service = UpdateService::with_host(fixture.config(vec![dist], "1.0.0"), MockHost::new());
    let mut events = service.subscribe();

    let update = service.check_for_updates().await?.into_available().expect("newer");
    let staged = service.download(&update, CancelHandle::new()).await?;

    assert_eq!(staged.size, artifact.len() as u64);
    assert_eq!(staged.sha256, update.sha256);
    assert_eq!(std::fs::read(&staged.path)?, artifact);
    assert!(!fixture.staging_dir().join(TRANSFER_LOCK_FILE).exists());

    let mut download_percents = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.stage == Stage::Downloading {
            download_percents.push(event.percent);
        }
    }
    assert_eq!(download_percents.first(), Some(&0));
    assert_eq!(download_percents.last(), Some(&100));
    assert!(download_percents.windows(2).all(|w| w[0] < w[1]));
    Ok(())
}

#[tokio::test]
async fn test_digest_mismatch_leaves_nothing_staged() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let dist = fixture.publish_descriptor(
        "a",
        r#"{"version": "2.0.0", "filename": "app.bin",
            "sha256": "sha256:0000000000000000000000000000000000000000000000000000000000000000"}"#,
    )?;
    std::fs::write(std::path::Path::new(&dist).join("app.bin"), b"tampered")?;
    let service = UpdateService::with_host(fixture.config(vec![dist], "1.0.0"), MockHost::new());

    let update = service.check_for_updates().await?.into_available().expect("newer");
    let err = service.download(&update, CancelHandle::new()).await.unwrap_err();

    assert!(matches!(err, UpdateError::IntegrityFailure { .. }));
    let leftovers: Vec<_> = std::fs::read_dir(fixture.staging_dir())?.collect();
    assert!(leftovers.is_empty(), "staging not empty: {leftovers:?}");
    Ok(())
}

#[tokio::test]
async fn test_published_size_mismatch_is_rejected_up_front() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let dist = fixture.publish_descriptor("a", r#"{"version": "2.0.0", "filename": "app.bin", "size": 5}"#)?;
    std::fs::write(std::path::Path::new(&dist).join("app.bin"), b"longer than five")?;
    let service = UpdateService::with_host(fixture.config(vec![dist], "1.0.0"), MockHost::new());

    let update = service.check_for_updates().await?.into_available().expect("newer");
    let err = service.download(&update, CancelHandle::new()).await.unwrap_err();
    assert!(matches!(err, UpdateError::IntegrityFailure { .. }));
    assert!(!fixture.staging_dir().join("app.bin").exists());
    Ok(())
}

#[tokio::test]
async fn test_cancelled_download_removes_partial() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let dist = fixture.publish("a", "2.0.0", &vec![1u8; 200_000])?;
    let service = UpdateService::with_host(fixture.config(vec![dist], "1.0.0"), MockHost::new());

    let update = service.check_for_updates().await?.into_available().expect("newer");
    let cancel = CancelHandle::new();
    cancel.cancel();
    let err = service.download(&update, cancel).await.unwrap_err();

    assert!(matches!(err, UpdateError::TransferCancelled { .. }));
    assert!(!fixture.staging_dir().join("fixture-host-2.0.0").exists());
    assert!(!fixture.staging_dir().join("fixture-host-2.0.0.partial").exists());
    Ok(())
}

#[tokio::test]
async fn test_clean_up_stale_after_crash() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let staging = fixture.staging_dir();
    std::fs::write(staging.join(TRANSFER_LOCK_FILE), "")?;
    std::fs::write(staging.join("fixture-host-2.0.0.partial"), b"half")?;
    let service = UpdateService::with_host(fixture.config(vec![], "1.0.0"), MockHost::new());

    let report = service.clean_up_stale().await?;

    assert_eq!(report.removed_locks, 1);
    assert_eq!(report.removed_partials, 1);
    assert!(!staging.join(TRANSFER_LOCK_FILE).exists());
    Ok(())
}
