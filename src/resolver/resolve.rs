//! Transitive dependency resolution
//!
//! Breadth-first walk over a FIFO queue guarded by the set of already
//! resolved names. Constraints accumulate per package; the chosen version
//! is the greatest available one satisfying every constraint gathered so
//! far. An empty candidate set produces a conflict naming every
//! contributing requirer. Cycles are detected against the discovery path
//! and reported, never retried.

use super::dependency::{
    Dependency, LicenseDatabase, LicenseIssue, MetadataSource, VulnerabilityDatabase,
    VulnerabilityReport,
};
use super::version::Version;
use super::{ResolverError, ResolverResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The requirer name recorded for root dependencies.
const ROOT_SOURCE: &str = "(root)";

fn sources_of(
    gathered: &HashMap<String, Vec<(String, super::VersionConstraint)>>,
    name: &str,
) -> Vec<(String, String)> {
    gathered
        .get(name)
        .map(|entries| {
            entries
                .iter()
                .map(|(requirer, constraint)| (requirer.clone(), constraint.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// An unsatisfiable package with every constraint that contributed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    /// Package name.
    pub name: String,
    /// `(requirer, constraint)` pairs gathered during the walk.
    pub sources: Vec<(String, String)>,
    /// Versions that were available, for diagnostics.
    pub available: Vec<Version>,
    /// Human-readable explanation.
    pub reason: String,
}

/// Outcome of a resolution walk. Vulnerability and license findings never
/// block resolution; they surface here alongside the resolved map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resolution {
    /// Chosen version per package name.
    pub resolved: BTreeMap<String, Version>,
    /// Packages with no satisfying version.
    pub conflicts: Vec<Conflict>,
    /// Dependency cycles discovered during the walk.
    pub cycles: Vec<Vec<String>>,
    /// Advisories affecting resolved versions.
    pub vulnerabilities: Vec<VulnerabilityReport>,
    /// License findings for resolved packages.
    pub license_issues: Vec<LicenseIssue>,
    /// The discovered subgraph: declared dependencies per resolved package.
    pub graph: BTreeMap<String, Vec<Dependency>>,
}

impl Resolution {
    /// True when every package resolved without conflict.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// The dependency resolver.
pub struct DependencyResolver {
    metadata: Arc<dyn MetadataSource>,
    vulnerabilities: Arc<dyn VulnerabilityDatabase>,
    licenses: Arc<dyn LicenseDatabase>,
}

struct QueueItem {
    dependency: Dependency,
    requirer: String,
    path: Vec<String>,
}

impl DependencyResolver {
    /// Resolver over injected metadata and check databases.
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        vulnerabilities: Arc<dyn VulnerabilityDatabase>,
        licenses: Arc<dyn LicenseDatabase>,
    ) -> Self {
        Self {
            metadata,
            vulnerabilities,
            licenses,
        }
    }

    /// Resolve a root dependency set to a version map.
    pub async fn resolve(
        &self,
        roots: &[Dependency],
        token: &CancellationToken,
    ) -> ResolverResult<Resolution> {
        let mut resolution = Resolution::default();
        let mut gathered: HashMap<String, Vec<(String, super::VersionConstraint)>> =
            HashMap::new();
        let mut queue: VecDeque<QueueItem> = roots
            .iter()
            .cloned()
            .map(|dependency| QueueItem {
                dependency,
                requirer: ROOT_SOURCE.to_string(),
                path: Vec::new(),
            })
            .collect();

        while let Some(item) = queue.pop_front() {
            if token.is_cancelled() {
                return Err(ResolverError::Cancelled);
            }

            let name = item.dependency.name.clone();
            gathered.entry(name.clone()).or_default().push((
                item.requirer.clone(),
                item.dependency.constraint.clone(),
            ));

            // A name reappearing in its own discovery path is a cycle;
            // report it and move on.
            if item.path.contains(&name) {
                let mut cycle = item.path.clone();
                cycle.push(name.clone());
                log::warn!("circular dependency: {}", cycle.join(" -> "));
                resolution.cycles.push(cycle);
                continue;
            }

            if let Some(chosen) = resolution.resolved.get(&name) {
                // Already resolved; a new constraint the chosen version
                // fails is a conflict.
                if !item.dependency.constraint.allows(chosen) {
                    resolution.conflicts.push(Conflict {
                        name: name.clone(),
                        sources: sources_of(&gathered, &name),
                        available: Vec::new(),
                        reason: format!(
                            "already resolved to {} which fails `{}` required by {}",
                            chosen, item.dependency.constraint, item.requirer
                        ),
                    });
                }
                continue;
            }

            let available = match self.metadata.available_versions(&name).await {
                Ok(available) => available,
                Err(e) => {
                    resolution.conflicts.push(Conflict {
                        name: name.clone(),
                        sources: sources_of(&gathered, &name),
                        available: Vec::new(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let constraints = gathered.get(&name).cloned().unwrap_or_default();
            let chosen = available
                .iter()
                .filter(|candidate| constraints.iter().all(|(_, c)| c.allows(candidate)))
                .max()
                .cloned();

            let chosen = match chosen {
                Some(chosen) => chosen,
                None => {
                    resolution.conflicts.push(Conflict {
                        name: name.clone(),
                        sources: sources_of(&gathered, &name),
                        available,
                        reason: "no available version satisfies all constraints".to_string(),
                    });
                    continue;
                }
            };

            log::debug!("resolved {} -> {}", name, chosen);

            let sub_dependencies = match self.metadata.dependencies_of(&name, &chosen).await {
                Ok(deps) => deps,
                Err(e) => {
                    resolution.conflicts.push(Conflict {
                        name: name.clone(),
                        sources: sources_of(&gathered, &name),
                        available,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            resolution.resolved.insert(name.clone(), chosen);
            resolution
                .graph
                .insert(name.clone(), sub_dependencies.clone());

            let mut child_path = item.path;
            child_path.push(name.clone());
            for sub in sub_dependencies {
                if sub.optional {
                    continue;
                }
                queue.push_back(QueueItem {
                    dependency: sub,
                    requirer: name.clone(),
                    path: child_path.clone(),
                });
            }
        }

        self.run_checks(&mut resolution);

        log::info!(
            "resolution complete: {} resolved, {} conflict(s), {} advisory hit(s)",
            resolution.resolved.len(),
            resolution.conflicts.len(),
            resolution.vulnerabilities.len()
        );

        Ok(resolution)
    }

    /// Vulnerability and license checks over the resolved map. Findings
    /// surface in the resolution; they never block it.
    fn run_checks(&self, resolution: &mut Resolution) {
        for (name, version) in &resolution.resolved {
            resolution
                .vulnerabilities
                .extend(self.vulnerabilities.advisories_for(name, version));

            let declared = resolution
                .graph
                .values()
                .flatten()
                .find(|d| d.name == *name)
                .and_then(|d| d.license.as_deref());
            if let Some(issue) = self.licenses.check(name, declared) {
                resolution.license_issues.push(issue);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::dependency::{
        AllowListLicenseDatabase, InMemoryMetadataSource, InMemoryVulnerabilityDatabase, Severity,
    };

    fn resolver_with(
        metadata: InMemoryMetadataSource,
    ) -> (DependencyResolver, Arc<InMemoryVulnerabilityDatabase>) {
        let vulns = Arc::new(InMemoryVulnerabilityDatabase::new());
        let resolver = DependencyResolver::new(
            Arc::new(metadata),
            Arc::clone(&vulns) as Arc<dyn VulnerabilityDatabase>,
            Arc::new(AllowListLicenseDatabase::default()),
        );
        (resolver, vulns)
    }

    #[tokio::test]
    async fn test_transitive_resolution_picks_greatest_satisfying() {
        let metadata = InMemoryMetadataSource::new();
        metadata.add_package(
            "app",
            Version::new(1, 0, 0),
            vec![Dependency::runtime("lib", "^1.0.0").unwrap()],
        );
        metadata.add_package("lib", Version::new(1, 0, 0), vec![]);
        metadata.add_package("lib", Version::new(1, 4, 2), vec![]);
        metadata.add_package("lib", Version::new(2, 0, 0), vec![]);

        let (resolver, _) = resolver_with(metadata);
        let roots = vec![Dependency::runtime("app", "1.0.0").unwrap()];
        let resolution = resolver
            .resolve(&roots, &CancellationToken::new())
            .await
            .unwrap();

        assert!(resolution.is_clean());
        assert_eq!(resolution.resolved["app"], Version::new(1, 0, 0));
        // ^1.0.0 admits 1.4.2 but not 2.0.0.
        assert_eq!(resolution.resolved["lib"], Version::new(1, 4, 2));
    }

    #[tokio::test]
    async fn test_conflicting_constraints_are_reported() {
        let metadata = InMemoryMetadataSource::new();
        metadata.add_package(
            "a",
            Version::new(1, 0, 0),
            vec![Dependency::runtime("shared", "^1.0.0").unwrap()],
        );
        metadata.add_package(
            "b",
            Version::new(1, 0, 0),
            vec![Dependency::runtime("shared", "^2.0.0").unwrap()],
        );
        metadata.add_package("shared", Version::new(1, 5, 0), vec![]);
        metadata.add_package("shared", Version::new(2, 1, 0), vec![]);

        let (resolver, _) = resolver_with(metadata);
        let roots = vec![
            Dependency::runtime("a", "1.0.0").unwrap(),
            Dependency::runtime("b", "1.0.0").unwrap(),
        ];
        let resolution = resolver
            .resolve(&roots, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!resolution.is_clean());
        let conflict = resolution
            .conflicts
            .iter()
            .find(|c| c.name == "shared")
            .expect("shared conflicts");
        assert_eq!(conflict.sources.len(), 2);
    }

    #[tokio::test]
    async fn test_resolved_versions_satisfy_all_gathered_constraints() {
        let metadata = InMemoryMetadataSource::new();
        metadata.add_package(
            "a",
            Version::new(1, 0, 0),
            vec![Dependency::runtime("shared", ">=1.2.0").unwrap()],
        );
        metadata.add_package(
            "b",
            Version::new(1, 0, 0),
            vec![Dependency::runtime("shared", "<1.5.0").unwrap()],
        );
        metadata.add_package("shared", Version::new(1, 2, 0), vec![]);
        metadata.add_package("shared", Version::new(1, 4, 0), vec![]);
        metadata.add_package("shared", Version::new(1, 6, 0), vec![]);

        let (resolver, _) = resolver_with(metadata);
        let roots = vec![
            Dependency::runtime("a", "1.0.0").unwrap(),
            Dependency::runtime("b", "1.0.0").unwrap(),
        ];
        let resolution = resolver
            .resolve(&roots, &CancellationToken::new())
            .await
            .unwrap();

        assert!(resolution.is_clean(), "{:?}", resolution.conflicts);
        assert_eq!(resolution.resolved["shared"], Version::new(1, 4, 0));
    }

    #[tokio::test]
    async fn test_cycle_is_reported_not_retried() {
        let metadata = InMemoryMetadataSource::new();
        metadata.add_package(
            "a",
            Version::new(1, 0, 0),
            vec![Dependency::runtime("b", "1.0.0").unwrap()],
        );
        metadata.add_package(
            "b",
            Version::new(1, 0, 0),
            vec![Dependency::runtime("a", "1.0.0").unwrap()],
        );

        let (resolver, _) = resolver_with(metadata);
        let roots = vec![Dependency::runtime("a", "1.0.0").unwrap()];
        let resolution = resolver
            .resolve(&roots, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resolution.resolved.len(), 2);
        assert_eq!(resolution.cycles.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_package_becomes_conflict() {
        let metadata = InMemoryMetadataSource::new();
        let (resolver, _) = resolver_with(metadata);
        let roots = vec![Dependency::runtime("ghost", "*").unwrap()];
        let resolution = resolver
            .resolve(&roots, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resolution.conflicts.len(), 1);
    }

    #[tokio::test]
    async fn test_vulnerability_findings_do_not_block() {
        let metadata = InMemoryMetadataSource::new();
        metadata.add_package("app", Version::new(1, 0, 0), vec![]);

        let (resolver, vulns) = resolver_with(metadata);
        vulns.add_advisory(VulnerabilityReport {
            package: "app".to_string(),
            version: Version::new(1, 0, 0),
            id: "ADV-0001".to_string(),
            severity: Severity::High,
            description: "example advisory".to_string(),
        });

        let roots = vec![Dependency::runtime("app", "1.0.0").unwrap()];
        let resolution = resolver
            .resolve(&roots, &CancellationToken::new())
            .await
            .unwrap();

        assert!(resolution.is_clean());
        assert_eq!(resolution.vulnerabilities.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let metadata = InMemoryMetadataSource::new();
        metadata.add_package("app", Version::new(1, 0, 0), vec![]);
        let (resolver, _) = resolver_with(metadata);

        let token = CancellationToken::new();
        token.cancel();
        let roots = vec![Dependency::runtime("app", "1.0.0").unwrap()];
        let result = resolver.resolve(&roots, &token).await;
        assert!(matches!(result, Err(ResolverError::Cancelled)));
    }
}
