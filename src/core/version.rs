//! Lenient dotted-numeric versions.
//!
//! Distribution descriptors are written by hand on file shares, so version
//! strings are parsed forgivingly: `v1.2`, `1.2.0` and `1.2.0.0` all compare
//! equal, and a component without digits counts as zero instead of failing the
//! whole update check. Pre-release and build metadata are not modeled.
//!
//! ```rust
//! use appswap::core::{Version, is_newer};
//!
//! assert!(is_newer("1.2.10", "1.2.9"));
//! assert!(!is_newer("1.2", "1.2.0"));
//! assert_eq!(Version::parse("v2.0").to_string(), "2.0");
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// An ordered tuple of non-negative integers.
///
/// Equality and ordering treat missing trailing components as `0`.
#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<u64>,
}

impl Version {
    /// Parse a dotted version string.
    ///
    /// Never fails: surrounding whitespace and a leading `v`/`V` are ignored,
    /// each component contributes its leading digits (saturating at
    /// `u64::MAX`), and an empty input parses as `0`.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        let components = trimmed
            .split('.')
            .map(|part| {
                let digits: String = part.trim().chars().take_while(char::is_ascii_digit).collect();
                if digits.is_empty() {
                    0
                } else {
                    // Only overflow can fail here.
                    digits.parse::<u64>().unwrap_or(u64::MAX)
                }
            })
            .collect();

        Self { components }
    }

    /// The parsed components, as written.
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    /// Whether `self` is strictly greater than `other`.
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Greater
    }
}

/// Whether `candidate` is strictly newer than `current`.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    Version::parse(candidate).is_newer_than(&Version::parse(current))
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().map(u64::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}
