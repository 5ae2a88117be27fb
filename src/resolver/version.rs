//! Semantic version model
//!
//! Total order: lexicographic over `(major, minor, patch)`, then a
//! prerelease comparison where an absent prerelease outranks any present
//! one, and present prereleases compare lexicographically as strings.
//! Build metadata never participates in ordering or equality.

use super::{ResolverError, ResolverResult};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A parsed semantic version.
#[derive(Debug, Clone)]
pub struct Version {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
    /// Prerelease identifier, e.g. `beta.1`.
    pub pre: Option<String>,
    /// Build metadata, carried but never compared.
    pub build: Option<String>,
}

impl Version {
    /// A release version with no prerelease or build metadata.
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
            build: None,
        }
    }

    /// Parse the strict `major.minor.patch[-pre][+build]` form.
    pub fn parse(text: &str) -> ResolverResult<Self> {
        Self::parse_components(text, false)
            .ok_or_else(|| ResolverError::InvalidVersion(text.to_string()))
    }

    /// Parse the dotted-integer form used in expressions, allowing one to
    /// three components (`3`, `3.2`, `3.2.0-beta`). Missing components
    /// default to zero.
    pub fn parse_lenient(text: &str) -> Option<Self> {
        Self::parse_components(text, true)
    }

    fn parse_components(text: &str, lenient: bool) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let (rest, build) = match text.split_once('+') {
            Some((rest, build)) if !build.is_empty() => (rest, Some(build.to_string())),
            Some(_) => return None,
            None => (text, None),
        };
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some(_) => return None,
            None => (rest, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.is_empty() || parts.len() > 3 || (!lenient && parts.len() != 3) {
            return None;
        }
        let mut numbers = [0u32; 3];
        for (i, part) in parts.iter().enumerate() {
            numbers[i] = part.parse().ok()?;
        }

        Some(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre,
            build,
        })
    }

    /// True when a prerelease identifier is present.
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    /// The smallest release above this version's major line: `(major+1).0.0`.
    pub fn bump_major(&self) -> Version {
        Version::new(self.major + 1, 0, 0)
    }

    /// The smallest release above this version's minor line:
    /// `major.(minor+1).0`.
    pub fn bump_minor(&self) -> Version {
        Version::new(self.major, self.minor + 1, 0)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.pre.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct VersionVisitor;

        impl Visitor<'_> for VersionVisitor {
            type Value = Version;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a semantic version string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Version, E> {
                Version::parse(v).map_err(|e| E::custom(e.to_string()))
            }
        }

        deserializer.deserialize_str(VersionVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_round_trip() {
        for text in ["1.2.3", "0.0.1", "10.20.30", "1.2.3-beta.1", "1.2.3-rc.2+build5"] {
            let v = Version::parse(text).unwrap();
            assert_eq!(v.to_string(), text);
            assert_eq!(Version::parse(&v.to_string()).unwrap(), v);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for text in ["", "1.2", "a.b.c", "1.2.3.4", "1.2.x", "1.2.3-"] {
            assert!(Version::parse(text).is_err(), "{} should not parse", text);
        }
    }

    #[test]
    fn test_lenient_parse() {
        assert_eq!(Version::parse_lenient("3").unwrap(), Version::new(3, 0, 0));
        assert_eq!(
            Version::parse_lenient("3.2").unwrap(),
            Version::new(3, 2, 0)
        );
        assert!(Version::parse_lenient("not-a-version").is_none());
    }

    #[test]
    fn test_ordering() {
        let parse = |s| Version::parse(s).unwrap();
        assert!(parse("1.0.0") < parse("2.0.0"));
        assert!(parse("1.1.0") < parse("1.2.0"));
        assert!(parse("1.1.1") < parse("1.1.2"));
        // Absent prerelease outranks any present prerelease.
        assert!(parse("1.0.0-beta") < parse("1.0.0"));
        // Prerelease strings compare lexicographically.
        assert!(parse("1.0.0-alpha") < parse("1.0.0-beta"));
    }

    #[test]
    fn test_build_metadata_ignored_in_ordering() {
        let a = Version::parse("1.2.3+linux").unwrap();
        let b = Version::parse("1.2.3+windows").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn test_bumps() {
        let v = Version::parse("1.2.3").unwrap();
        assert_eq!(v.bump_major(), Version::new(2, 0, 0));
        assert_eq!(v.bump_minor(), Version::new(1, 3, 0));
    }

    #[test]
    fn test_serde_as_string() {
        let v = Version::parse("1.2.3-beta").unwrap();
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"1.2.3-beta\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
