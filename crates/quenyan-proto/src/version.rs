//! Semantic versioning for packages and payload envelopes.
//!
//! Versions travel in two places: packed into the binary frame header
//! (`major u8 | minor u8 | patch u16`) and as text inside wrapper JSON.
//! Text parsing accepts the historical `X.Y` shorthand alongside full
//! `X.Y.Z`.

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{FrameError, Result};

/// Minimal semantic version matching the wire header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major revision; a mismatch here is always incompatible
    pub major: u8,
    /// Minor revision
    pub minor: u8,
    /// Patch revision
    pub patch: u16,
}

/// Current package revision emitted by this codec.
pub const CURRENT_PACKAGE_VERSION: Version = Version::new(1, 2, 0);

/// Oldest package revision this codec will still decode.
pub const MINIMUM_SUPPORTED_PACKAGE_VERSION: Version = Version::new(1, 0, 0);

/// Every revision within the supported compatibility window.
pub const SUPPORTED_PACKAGE_VERSIONS: [Version; 3] =
    [Version::new(1, 0, 0), Version::new(1, 1, 0), CURRENT_PACKAGE_VERSION];

impl Version {
    /// Construct a version from its parts.
    #[must_use]
    pub const fn new(major: u8, minor: u8, patch: u16) -> Self {
        Self { major, minor, patch }
    }

    /// Parse a strict `X.Y.Z` or `X.Y` version string.
    ///
    /// # Errors
    ///
    /// `FrameError::InvalidVersion` if the text is not two or three
    /// dot-separated decimal components.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let mut parts = trimmed.split('.');
        let major = parts.next();
        let minor = parts.next();
        let patch = parts.next();
        if parts.next().is_some() {
            return Err(FrameError::InvalidVersion(value.to_owned()));
        }
        let parse_component = |part: Option<&str>| -> Result<u64> {
            let text = part.ok_or_else(|| FrameError::InvalidVersion(value.to_owned()))?;
            if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
                return Err(FrameError::InvalidVersion(value.to_owned()));
            }
            text.parse::<u64>().map_err(|_| FrameError::InvalidVersion(value.to_owned()))
        };
        let major = parse_component(major)?;
        let minor = parse_component(minor)?;
        let patch = match patch {
            Some(_) => parse_component(patch)?,
            None => 0,
        };
        if major > u64::from(u8::MAX) || minor > u64::from(u8::MAX) || patch > u64::from(u16::MAX) {
            return Err(FrameError::InvalidVersion(value.to_owned()));
        }
        Ok(Self::new(major as u8, minor as u8, patch as u16))
    }

    /// Short textual form, dropping a zero patch (`1.2` instead of `1.2.0`).
    #[must_use]
    pub fn short_text(&self) -> String {
        if self.patch == 0 {
            format!("{}.{}", self.major, self.minor)
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Parse a textual version, allowing historical shorthand revisions.
///
/// # Errors
///
/// `FrameError::InvalidVersion` when the text cannot be parsed at all.
pub fn parse_any_version(value: &str) -> Result<Version> {
    Version::parse(value)
}

/// Validate that `version` falls inside the supported window.
///
/// # Errors
///
/// `FrameError::UnsupportedVersion` on a major mismatch or a revision
/// below the supported minimum.
pub fn ensure_supported(version: Version) -> Result<()> {
    if version.major != CURRENT_PACKAGE_VERSION.major
        || version < MINIMUM_SUPPORTED_PACKAGE_VERSION
    {
        return Err(FrameError::UnsupportedVersion(version));
    }
    Ok(())
}

/// String forms of every known package revision, oldest first.
#[must_use]
pub fn advertised_versions() -> Vec<String> {
    SUPPORTED_PACKAGE_VERSIONS.iter().map(ToString::to_string).collect()
}

/// Select the best mutually supported version from `preferred`.
///
/// `None` or an empty preference list yields the current version. The
/// negotiation only considers revisions inside the supported window.
///
/// # Errors
///
/// `FrameError::VersionMismatch` when the intersection is empty, or
/// `FrameError::InvalidVersion` when a preference fails to parse.
pub fn negotiate_version<I, S>(preferred: Option<I>) -> Result<Version>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let Some(preferred) = preferred else {
        return Ok(CURRENT_PACKAGE_VERSION);
    };
    let mut requested = Vec::new();
    for value in preferred {
        requested.push(parse_any_version(value.as_ref())?);
    }
    if requested.is_empty() {
        return Ok(CURRENT_PACKAGE_VERSION);
    }
    SUPPORTED_PACKAGE_VERSIONS
        .iter()
        .rev()
        .find(|candidate| requested.contains(candidate))
        .copied()
        .ok_or(FrameError::VersionMismatch)
}

/// Decoder-by-payload compatibility lookup covering the supported window
/// plus any extra revisions the caller is interested in.
#[must_use]
pub fn compatibility_matrix(extra: &[Version]) -> BTreeMap<String, BTreeMap<String, bool>> {
    let mut revisions: Vec<Version> = SUPPORTED_PACKAGE_VERSIONS.to_vec();
    for version in extra {
        if !revisions.contains(version) {
            revisions.push(*version);
        }
    }
    revisions.sort_unstable();
    let mut matrix = BTreeMap::new();
    for decoder in &revisions {
        let mut row = BTreeMap::new();
        for payload in &revisions {
            let compatible = decoder.major == payload.major
                && *payload >= MINIMUM_SUPPORTED_PACKAGE_VERSION
                && payload <= decoder;
            row.insert(payload.to_string(), compatible);
        }
        matrix.insert(decoder.to_string(), row);
    }
    matrix
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parse_full_and_shorthand() {
        assert_eq!(Version::parse("1.2.3").unwrap(), Version::new(1, 2, 3));
        assert_eq!(Version::parse("1.2").unwrap(), Version::new(1, 2, 0));
        assert_eq!(Version::parse(" 1.0 ").unwrap(), Version::new(1, 0, 0));
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "1", "1.2.3.4", "a.b", "1..2", "1.2-rc1"] {
            assert!(Version::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn short_text_drops_zero_patch() {
        assert_eq!(Version::new(1, 2, 0).short_text(), "1.2");
        assert_eq!(Version::new(1, 2, 1).short_text(), "1.2.1");
    }

    #[test]
    fn supported_window() {
        assert!(ensure_supported(Version::new(1, 0, 0)).is_ok());
        assert!(ensure_supported(Version::new(1, 2, 0)).is_ok());
        assert_eq!(
            ensure_supported(Version::new(2, 0, 0)),
            Err(FrameError::UnsupportedVersion(Version::new(2, 0, 0)))
        );
        assert_eq!(
            ensure_supported(Version::new(0, 9, 0)),
            Err(FrameError::UnsupportedVersion(Version::new(0, 9, 0)))
        );
    }

    #[test]
    fn negotiate_prefers_highest_mutual() {
        let negotiated =
            negotiate_version(Some(["1.0", "1.1"])).unwrap();
        assert_eq!(negotiated, Version::new(1, 1, 0));
    }

    #[test]
    fn negotiate_defaults_to_current() {
        assert_eq!(negotiate_version::<[&str; 0], &str>(None).unwrap(), CURRENT_PACKAGE_VERSION);
        assert_eq!(negotiate_version(Some(Vec::<String>::new())).unwrap(), CURRENT_PACKAGE_VERSION);
    }

    #[test]
    fn negotiate_fails_on_empty_intersection() {
        assert_eq!(negotiate_version(Some(["0.9"])), Err(FrameError::VersionMismatch));
    }

    #[test]
    fn matrix_is_major_bound_and_monotone() {
        let matrix = compatibility_matrix(&[]);
        let current = CURRENT_PACKAGE_VERSION.to_string();
        assert!(matrix[&current]["1.0.0"]);
        assert!(matrix[&current][&current]);
        assert!(!matrix["1.0.0"][&current]);
    }

    proptest! {
        #[test]
        fn text_round_trip(major in 0u8..=255, minor in 0u8..=255, patch in 0u16..=u16::MAX) {
            let version = Version::new(major, minor, patch);
            let parsed = Version::parse(&version.to_string()).unwrap();
            prop_assert_eq!(version, parsed);
            let short = Version::parse(&version.short_text()).unwrap();
            prop_assert_eq!(version, short);
        }
    }
}
