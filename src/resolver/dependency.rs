//! Dependency model and injected data sources
//!
//! The resolver walks dependencies through a [`MetadataSource`] and
//! surfaces findings from a vulnerability database and a license
//! compatibility table. All three are traits so tests can inject
//! deterministic in-memory fakes.

use super::constraint::VersionConstraint;
use super::version::Version;
use super::{ResolverError, ResolverResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// How a dependency participates in resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyKind {
    /// Needed at runtime.
    Runtime,
    /// Needed only for development.
    Dev,
    /// Installed only when explicitly requested.
    Optional,
    /// Expected to be provided by the consumer.
    Peer,
    /// Activated by an expression condition.
    Conditional,
}

/// A declared dependency edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    /// Package name.
    pub name: String,
    /// Version constraint.
    pub constraint: VersionConstraint,
    /// Dependency kind.
    pub kind: DependencyKind,
    /// Whether resolution may skip this edge entirely.
    pub optional: bool,
    /// Activation condition for `Conditional` dependencies.
    pub condition: Option<String>,
    /// Declared license, if known.
    pub license: Option<String>,
    /// Declared security rating, if known.
    pub security_rating: Option<String>,
}

impl Dependency {
    /// A runtime dependency parsed from a constraint string.
    pub fn runtime(name: &str, constraint: &str) -> ResolverResult<Self> {
        Ok(Self {
            name: name.to_string(),
            constraint: VersionConstraint::parse(constraint)?,
            kind: DependencyKind::Runtime,
            optional: false,
            condition: None,
            license: None,
            security_rating: None,
        })
    }
}

/// Source of package metadata: available versions and their declared
/// sub-dependencies.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// All published versions of a package.
    async fn available_versions(&self, name: &str) -> ResolverResult<Vec<Version>>;

    /// The dependencies a specific version declares.
    async fn dependencies_of(&self, name: &str, version: &Version)
        -> ResolverResult<Vec<Dependency>>;
}

/// Severity of a vulnerability advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Informational.
    Low,
    /// Should be addressed.
    Medium,
    /// Should be addressed promptly.
    High,
    /// Must be addressed.
    Critical,
}

/// A vulnerability advisory hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerabilityReport {
    /// Affected package.
    pub package: String,
    /// Affected version.
    pub version: Version,
    /// Advisory identifier.
    pub id: String,
    /// Severity.
    pub severity: Severity,
    /// Human-readable description.
    pub description: String,
}

/// A license incompatibility finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseIssue {
    /// Affected package.
    pub package: String,
    /// The license as declared, if any.
    pub license: Option<String>,
    /// Why it was flagged.
    pub reason: String,
}

/// Lookup of advisories for a resolved package version.
pub trait VulnerabilityDatabase: Send + Sync {
    /// Advisories affecting exactly this package version.
    fn advisories_for(&self, name: &str, version: &Version) -> Vec<VulnerabilityReport>;
}

/// License compatibility table.
pub trait LicenseDatabase: Send + Sync {
    /// An issue when the license is unknown or incompatible, else `None`.
    fn check(&self, name: &str, license: Option<&str>) -> Option<LicenseIssue>;
}

/// In-memory metadata source for tests and local registries.
#[derive(Default)]
pub struct InMemoryMetadataSource {
    packages: RwLock<HashMap<String, BTreeMap<Version, Vec<Dependency>>>>,
}

impl InMemoryMetadataSource {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a version of a package with its dependencies.
    pub fn add_package(&self, name: &str, version: Version, dependencies: Vec<Dependency>) {
        self.packages
            .write()
            .entry(name.to_string())
            .or_default()
            .insert(version, dependencies);
    }
}

#[async_trait]
impl MetadataSource for InMemoryMetadataSource {
    async fn available_versions(&self, name: &str) -> ResolverResult<Vec<Version>> {
        let packages = self.packages.read();
        let versions = packages.get(name).ok_or_else(|| {
            ResolverError::MetadataUnavailable(name.to_string(), "unknown package".to_string())
        })?;
        Ok(versions.keys().cloned().collect())
    }

    async fn dependencies_of(
        &self,
        name: &str,
        version: &Version,
    ) -> ResolverResult<Vec<Dependency>> {
        let packages = self.packages.read();
        let versions = packages.get(name).ok_or_else(|| {
            ResolverError::MetadataUnavailable(name.to_string(), "unknown package".to_string())
        })?;
        versions.get(version).cloned().ok_or_else(|| {
            ResolverError::MetadataUnavailable(
                name.to_string(),
                format!("unknown version {}", version),
            )
        })
    }
}

/// In-memory vulnerability database keyed by package and version.
#[derive(Default)]
pub struct InMemoryVulnerabilityDatabase {
    advisories: RwLock<Vec<VulnerabilityReport>>,
}

impl InMemoryVulnerabilityDatabase {
    /// Empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an advisory.
    pub fn add_advisory(&self, report: VulnerabilityReport) {
        self.advisories.write().push(report);
    }
}

impl VulnerabilityDatabase for InMemoryVulnerabilityDatabase {
    fn advisories_for(&self, name: &str, version: &Version) -> Vec<VulnerabilityReport> {
        self.advisories
            .read()
            .iter()
            .filter(|a| a.package == name && a.version == *version)
            .cloned()
            .collect()
    }
}

/// License table that flags anything outside an allow-list. An empty
/// allow-list accepts everything; a declared-but-unknown license is
/// flagged, and a missing declaration is flagged as unknown.
#[derive(Default)]
pub struct AllowListLicenseDatabase {
    allowed: HashSet<String>,
}

impl AllowListLicenseDatabase {
    /// Accept only the given license identifiers.
    pub fn new<I: IntoIterator<Item = String>>(allowed: I) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl LicenseDatabase for AllowListLicenseDatabase {
    fn check(&self, name: &str, license: Option<&str>) -> Option<LicenseIssue> {
        if self.allowed.is_empty() {
            return None;
        }
        match license {
            Some(license) if self.allowed.contains(license) => None,
            Some(license) => Some(LicenseIssue {
                package: name.to_string(),
                license: Some(license.to_string()),
                reason: format!("license `{}` is not on the allow-list", license),
            }),
            None => Some(LicenseIssue {
                package: name.to_string(),
                license: None,
                reason: "no license declared".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_metadata_source() {
        let source = InMemoryMetadataSource::new();
        source.add_package("core", Version::new(1, 0, 0), vec![]);
        source.add_package(
            "core",
            Version::new(1, 1, 0),
            vec![Dependency::runtime("util", "^2.0.0").unwrap()],
        );

        let versions = source.available_versions("core").await.unwrap();
        assert_eq!(versions.len(), 2);

        let deps = source
            .dependencies_of("core", &Version::new(1, 1, 0))
            .await
            .unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "util");

        assert!(source.available_versions("ghost").await.is_err());
    }

    #[test]
    fn test_license_allow_list() {
        let db = AllowListLicenseDatabase::new(["MIT".to_string(), "Apache-2.0".to_string()]);
        assert!(db.check("a", Some("MIT")).is_none());
        assert!(db.check("b", Some("GPL-3.0")).is_some());
        assert!(db.check("c", None).is_some());
    }
}
