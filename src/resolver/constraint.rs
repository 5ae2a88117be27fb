//! Version constraints
//!
//! Grammar accepted by the parser: `*` (or empty) for any version, a bare
//! `1.2.3` or `=1.2.3` pin, `^1.2.3` (compatible within the major line),
//! `~1.2.3` (compatible within the minor line), and any whitespace-separated
//! combination of `>= > <= < =` operator tokens forming a range.

use super::version::Version;
use super::{ResolverError, ResolverResult};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A parsed version constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Matches every version.
    Any,
    /// Matches exactly one version.
    Exact(Version),
    /// `>= v` and `< (major+1).0.0`.
    Caret(Version),
    /// `>= v` and `< major.(minor+1).0`.
    Tilde(Version),
    /// A bounded range with inclusion flags.
    Range {
        /// Lower bound, if any.
        min: Option<Version>,
        /// Upper bound, if any.
        max: Option<Version>,
        /// Whether the lower bound itself is allowed.
        include_min: bool,
        /// Whether the upper bound itself is allowed.
        include_max: bool,
    },
}

impl VersionConstraint {
    /// Parse a constraint string.
    pub fn parse(text: &str) -> ResolverResult<Self> {
        let text = text.trim();
        if text.is_empty() || text == "*" {
            return Ok(VersionConstraint::Any);
        }

        if let Some(rest) = text.strip_prefix('^') {
            return Ok(VersionConstraint::Caret(parse_version(rest, text)?));
        }
        if let Some(rest) = text.strip_prefix('~') {
            return Ok(VersionConstraint::Tilde(parse_version(rest, text)?));
        }

        // A single token without range operators is a pin.
        if !text.contains(char::is_whitespace) {
            if let Some(rest) = text.strip_prefix('=') {
                if !rest.starts_with('=') {
                    return Ok(VersionConstraint::Exact(parse_version(rest, text)?));
                }
            } else if !text.starts_with('>') && !text.starts_with('<') {
                return Ok(VersionConstraint::Exact(parse_version(text, text)?));
            }
        }

        let mut min: Option<(Version, bool)> = None;
        let mut max: Option<(Version, bool)> = None;

        for token in text.split_whitespace() {
            let (op, rest) = split_operator(token)
                .ok_or_else(|| ResolverError::InvalidConstraint(text.to_string()))?;
            let version = parse_version(rest, text)?;
            match op {
                ">=" => merge_min(&mut min, version, true),
                ">" => merge_min(&mut min, version, false),
                "<=" => merge_max(&mut max, version, true),
                "<" => merge_max(&mut max, version, false),
                "=" => {
                    merge_min(&mut min, version.clone(), true);
                    merge_max(&mut max, version, true);
                }
                _ => return Err(ResolverError::InvalidConstraint(text.to_string())),
            }
        }

        let (min, include_min) = match min {
            Some((v, inc)) => (Some(v), inc),
            None => (None, true),
        };
        let (max, include_max) = match max {
            Some((v, inc)) => (Some(v), inc),
            None => (None, false),
        };

        Ok(VersionConstraint::Range {
            min,
            max,
            include_min,
            include_max,
        })
    }

    /// Whether a version satisfies this constraint.
    pub fn allows(&self, version: &Version) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(pin) => version == pin,
            VersionConstraint::Caret(base) => {
                version >= base && *version < base.bump_major()
            }
            VersionConstraint::Tilde(base) => {
                version >= base && *version < base.bump_minor()
            }
            VersionConstraint::Range {
                min,
                max,
                include_min,
                include_max,
            } => {
                if let Some(min) = min {
                    let ok = if *include_min {
                        version >= min
                    } else {
                        version > min
                    };
                    if !ok {
                        return false;
                    }
                }
                if let Some(max) = max {
                    let ok = if *include_max {
                        version <= max
                    } else {
                        version < max
                    };
                    if !ok {
                        return false;
                    }
                }
                true
            }
        }
    }
}

fn parse_version(text: &str, whole: &str) -> ResolverResult<Version> {
    Version::parse_lenient(text)
        .ok_or_else(|| ResolverError::InvalidConstraint(whole.to_string()))
}

fn split_operator(token: &str) -> Option<(&str, &str)> {
    for op in [">=", "<=", ">", "<", "="] {
        if let Some(rest) = token.strip_prefix(op) {
            return Some((op, rest));
        }
    }
    None
}

/// Keep the tightest lower bound seen so far.
fn merge_min(slot: &mut Option<(Version, bool)>, version: Version, inclusive: bool) {
    let replace = match slot {
        Some((existing, existing_inc)) => {
            version > *existing || (version == *existing && *existing_inc && !inclusive)
        }
        None => true,
    };
    if replace {
        *slot = Some((version, inclusive));
    }
}

/// Keep the tightest upper bound seen so far.
fn merge_max(slot: &mut Option<(Version, bool)>, version: Version, inclusive: bool) {
    let replace = match slot {
        Some((existing, existing_inc)) => {
            version < *existing || (version == *existing && *existing_inc && !inclusive)
        }
        None => true,
    };
    if replace {
        *slot = Some((version, inclusive));
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => f.write_str("*"),
            VersionConstraint::Exact(v) => write!(f, "={}", v),
            VersionConstraint::Caret(v) => write!(f, "^{}", v),
            VersionConstraint::Tilde(v) => write!(f, "~{}", v),
            VersionConstraint::Range {
                min,
                max,
                include_min,
                include_max,
            } => {
                let mut parts = Vec::new();
                if let Some(min) = min {
                    parts.push(format!("{}{}", if *include_min { ">=" } else { ">" }, min));
                }
                if let Some(max) = max {
                    parts.push(format!("{}{}", if *include_max { "<=" } else { "<" }, max));
                }
                if parts.is_empty() {
                    f.write_str("*")
                } else {
                    f.write_str(&parts.join(" "))
                }
            }
        }
    }
}

impl FromStr for VersionConstraint {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionConstraint::parse(s)
    }
}

impl Serialize for VersionConstraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionConstraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ConstraintVisitor;

        impl Visitor<'_> for ConstraintVisitor {
            type Value = VersionConstraint;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a version constraint string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<VersionConstraint, E> {
                VersionConstraint::parse(v).map_err(|e| E::custom(e.to_string()))
            }
        }

        deserializer.deserialize_str(ConstraintVisitor)
    }
}
