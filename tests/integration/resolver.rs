//! Candidate probing through the real distribution reader.

use anyhow::Result;
use appswap::core::UpdateError;
use appswap::test_utils::{UpdateFixture, init_test_logging};
use appswap::upgrade::resolver::{DEFAULT_CHANGELOG, UpdateCheck};
use appswap::upgrade::{DistributionLocation, DistributionReader, UpdateResolver, UpdateService};
use std::path::PathBuf;
use std::time::Duration;

fn resolver() -> UpdateResolver<DistributionReader> {
    UpdateResolver::new(DistributionReader::new(Duration::from_secs(2)))
}

#[tokio::test]
async fn test_unreachable_candidate_is_skipped() -> Result<()> {
    init_test_logging(None);
    let fixture = UpdateFixture::new(b"v1")?;
    let a = fixture.missing_location("a");
    let b = fixture.publish("b", "2.0.0", b"v2")?;

    let update = resolver().check_for_updates([&a, &b], "1.9.9").await?.into_available();

    let update = update.expect("B publishes a newer version");
    assert_eq!(update.version, "2.0.0");
    assert_eq!(update.source, DistributionLocation::Directory(PathBuf::from(&b)));
    assert_eq!(update.artifact, DistributionLocation::Directory(PathBuf::from(&b).join("fixture-host-2.0.0")));
    Ok(())
}

#[tokio::test]
async fn test_first_reachable_candidate_decides() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let a = fixture.publish("a", "1.0.0", b"old")?;
    let b = fixture.publish("b", "9.9.9", b"newest")?;

    let result = resolver().check_for_updates([&a, &b], "1.0.0").await?;
    assert_eq!(result, UpdateCheck::UpToDate);
    Ok(())
}

#[tokio::test]
async fn test_unparseable_descriptor_counts_as_unreachable() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let broken = fixture.publish_descriptor("broken", "{ not json")?;
    let no_version = fixture.publish_descriptor("empty", r#"{"version": "", "filename": "x"}"#)?;
    let good = fixture.publish_descriptor("good", r#"{"version": "1.3", "filename": "app.bin"}"#)?;

    let update = resolver()
        .check_for_updates([&broken, &no_version, &good], "1.2.9")
        .await?
        .into_available()
        .expect("third candidate is newer");
    assert_eq!(update.version, "1.3");
    assert_eq!(update.changelog, DEFAULT_CHANGELOG);
    assert!(!update.mandatory);
    Ok(())
}

#[tokio::test]
async fn test_trailing_zero_versions_are_equal() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let a = fixture.publish("a", "1.2", b"same")?;

    assert_eq!(resolver().check_for_updates([&a], "1.2.0").await?, UpdateCheck::UpToDate);
    Ok(())
}

#[tokio::test]
async fn test_no_reachable_candidate_is_up_to_date() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let result = resolver()
        .check_for_updates([fixture.missing_location("a"), fixture.missing_location("b")], "1.0.0")
        .await?;
    assert_eq!(result, UpdateCheck::UpToDate);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_http_candidate_is_skipped() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let local = fixture.publish("local", "3.0.0", b"v3")?;

    // Nothing listens on port 9 of the loopback interface.
    let result = resolver()
        .check_for_updates(["http://127.0.0.1:9/updates", local.as_str()], "1.0.0")
        .await;
    match result {
        Ok(UpdateCheck::Available(update)) => assert_eq!(update.version, "3.0.0"),
        Ok(other) => panic!("unexpected {other:?}"),
        Err(UpdateError::Unreachable { .. }) => panic!("unreachable must not surface"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[tokio::test]
async fn test_service_check_uses_configured_order() -> Result<()> {
    let fixture = UpdateFixture::new(b"v1")?;
    let a = fixture.missing_location("a");
    let b = fixture.publish("b", "1.1.0", b"v1.1")?;
    let service = UpdateService::new(fixture.config(vec![a, b], "1.0.0"));

    let update = service.check_on_startup().await?.expect("update available");
    assert_eq!(update.version, "1.1.0");
    Ok(())
}
