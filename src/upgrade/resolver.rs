//! Update Resolver: decide whether a newer build is published.
//!
//! Candidates are probed in priority order. Unreachable ones are logged and
//! skipped; the first reachable candidate decides the outcome. A reachable
//! candidate that is not newer ends the scan with "up to date" even when a
//! later candidate would publish something newer. That first-reachable-wins
//! policy is kept on purpose and covered by tests.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::{UpdateError, Version};
use crate::upgrade::descriptor::{DistributionLocation, VersionDescriptor, VersionSource};

/// Changelog shown when a descriptor carries none.
pub const DEFAULT_CHANGELOG: &str = "New version available";

/// A newer build, ready to be transferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateDescriptor {
    /// Version as published
    pub version: String,
    /// Artifact file name
    pub filename: String,
    /// Release notes, or [`DEFAULT_CHANGELOG`]
    pub changelog: String,
    /// Where the artifact is read from
    #[serde(serialize_with = "serialize_location")]
    pub artifact: DistributionLocation,
    /// The distribution location that published it
    #[serde(serialize_with = "serialize_location")]
    pub source: DistributionLocation,
    pub mandatory: bool,
    /// Expected artifact size, if published
    pub size: Option<u64>,
    /// Expected artifact digest, if published
    pub sha256: Option<String>,
}

fn serialize_location<S: serde::Serializer>(
    location: &DistributionLocation,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(location)
}

impl UpdateDescriptor {
    fn from_descriptor(source: DistributionLocation, descriptor: VersionDescriptor) -> Self {
        let changelog = descriptor
            .changelog
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CHANGELOG.to_string());
        Self {
            artifact: source.join(&descriptor.filename),
            version: descriptor.version,
            filename: descriptor.filename,
            changelog,
            source,
            mandatory: descriptor.mandatory,
            size: descriptor.size,
            sha256: descriptor.sha256,
        }
    }
}

/// Result of a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    /// The first reachable candidate publishes a strictly newer version
    Available(UpdateDescriptor),
    /// Nothing newer, or no candidate was reachable
    UpToDate,
}

impl UpdateCheck {
    pub fn into_available(self) -> Option<UpdateDescriptor> {
        match self {
            Self::Available(descriptor) => Some(descriptor),
            Self::UpToDate => None,
        }
    }
}

/// Probes distribution candidates through a [`VersionSource`].
pub struct UpdateResolver<S> {
    source: S,
}

impl<S: VersionSource> UpdateResolver<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Compare the first reachable candidate against `current_version`.
    ///
    /// Unreachable candidates never fail the check. Any other error from the
    /// source is returned as-is.
    pub async fn check_for_updates<I, T>(
        &self,
        candidates: I,
        current_version: &str,
    ) -> Result<UpdateCheck, UpdateError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let current = Version::parse(current_version);
        let mut probed = 0usize;

        for candidate in candidates {
            let location = DistributionLocation::parse(candidate.as_ref());
            probed += 1;

            let descriptor = match self.source.probe(&location).await {
                Ok(descriptor) => descriptor,
                Err(UpdateError::Unreachable { location, reason }) => {
                    warn!("Skipping unreachable update location {location}: {reason}");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let published = Version::parse(&descriptor.version);
            if published.is_newer_than(&current) {
                info!("Update available at {location}: {current} -> {published}");
                return Ok(UpdateCheck::Available(UpdateDescriptor::from_descriptor(
                    location, descriptor,
                )));
            }

            debug!("{location} publishes {published}, not newer than {current}");
            return Ok(UpdateCheck::UpToDate);
        }

        if probed == 0 {
            debug!("No update locations configured");
        } else {
            warn!("None of the {probed} update locations were reachable");
        }
        Ok(UpdateCheck::UpToDate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned descriptors and records every probe.
    struct CannedSource {
        published: HashMap<String, &'static str>,
        probes: Mutex<Vec<String>>,
    }

    impl CannedSource {
        fn new(entries: &[(&str, &'static str)]) -> Self {
            Self {
                published: entries.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                probes: Mutex::new(Vec::new()),
            }
        }

        fn probes(&self) -> Vec<String> {
            self.probes.lock().unwrap().clone()
        }
    }

    impl VersionSource for CannedSource {
        async fn probe(
            &self,
            location: &DistributionLocation,
        ) -> Result<VersionDescriptor, UpdateError> {
            let key = location.to_string();
            self.probes.lock().unwrap().push(key.clone());
            match self.published.get(&key) {
                Some(version) => Ok(VersionDescriptor {
                    version: (*version).to_string(),
                    filename: "app.exe".to_string(),
                    changelog: None,
                    mandatory: false,
                    size: None,
                    sha256: None,
                }),
                None => Err(UpdateError::Unreachable {
                    location: key,
                    reason: "offline".to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_skips_unreachable_and_returns_newer() {
        let resolver = UpdateResolver::new(CannedSource::new(&[("/b", "2.0.0")]));
        let check = resolver.check_for_updates(["/a", "/b"], "1.9.9").await.unwrap();

        let descriptor = check.into_available().unwrap();
        assert_eq!(descriptor.version, "2.0.0");
        assert_eq!(descriptor.source, DistributionLocation::parse("/b"));
        assert_eq!(descriptor.artifact, DistributionLocation::parse("/b/app.exe"));
        assert_eq!(descriptor.changelog, DEFAULT_CHANGELOG);
    }

    #[tokio::test]
    async fn test_first_reachable_wins_even_if_older() {
        let resolver =
            UpdateResolver::new(CannedSource::new(&[("/a", "1.0.0"), ("/b", "9.9.9")]));
        let check = resolver.check_for_updates(["/a", "/b"], "1.5.0").await.unwrap();

        assert_eq!(check, UpdateCheck::UpToDate);
        assert_eq!(resolver.source().probes(), vec!["/a".to_string()]);
    }

    #[tokio::test]
    async fn test_never_reads_past_the_deciding_candidate() {
        let resolver = UpdateResolver::new(CannedSource::new(&[("/c3", "3.0.0"), ("/c4", "4.0.0")]));
        let check = resolver
            .check_for_updates(["/c1", "/c2", "/c3", "/c4", "/c5"], "1.0.0")
            .await
            .unwrap();

        assert_eq!(check.into_available().unwrap().version, "3.0.0");
        assert_eq!(resolver.source().probes(), vec!["/c1", "/c2", "/c3"]);
    }

    #[tokio::test]
    async fn test_equal_version_is_up_to_date() {
        let resolver = UpdateResolver::new(CannedSource::new(&[("/a", "1.2")]));
        let check = resolver.check_for_updates(["/a"], "1.2.0").await.unwrap();
        assert_eq!(check, UpdateCheck::UpToDate);
    }

    #[tokio::test]
    async fn test_no_reachable_candidates_is_up_to_date() {
        let resolver = UpdateResolver::new(CannedSource::new(&[]));
        let check = resolver.check_for_updates(["/a", "/b"], "1.0.0").await.unwrap();
        assert_eq!(check, UpdateCheck::UpToDate);
        assert_eq!(resolver.source().probes().len(), 2);

        let empty: [&str; 0] = [];
        assert_eq!(resolver.check_for_updates(empty, "1.0.0").await.unwrap(), UpdateCheck::UpToDate);
    }
}
