//! Resolve command
//!
//! Resolves a root template (optionally `name@constraint`) against the
//! local registry, prints the resolved map and any conflicts, and maps
//! the outcome to an exit code: `0` for a clean resolution, `2` when
//! conflicts remain.

use super::{EXIT_CONFLICTS, EXIT_SUCCESS};
use crate::registry::{RegistryMetadataSource, TemplateRegistry};
use crate::resolver::dependency::{
    AllowListLicenseDatabase, InMemoryVulnerabilityDatabase,
};
use crate::resolver::{Dependency, DependencyResolver, Resolution, ResolverResult};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Parse a `name` or `name@constraint` root specification.
pub fn parse_root(spec: &str) -> ResolverResult<Dependency> {
    match spec.split_once('@') {
        Some((name, constraint)) => Dependency::runtime(name, constraint),
        None => Dependency::runtime(spec, "*"),
    }
}

/// Resolve a root against the registry.
pub async fn run(
    spec: &str,
    registry: Arc<TemplateRegistry>,
    token: &CancellationToken,
) -> ResolverResult<(Resolution, i32)> {
    let root = parse_root(spec)?;
    let resolver = DependencyResolver::new(
        Arc::new(RegistryMetadataSource::new(registry)),
        Arc::new(InMemoryVulnerabilityDatabase::new()),
        Arc::new(AllowListLicenseDatabase::default()),
    );
    let resolution = resolver.resolve(&[root], token).await?;

    print_resolution(&resolution);
    let code = if resolution.is_clean() {
        EXIT_SUCCESS
    } else {
        EXIT_CONFLICTS
    };
    Ok((resolution, code))
}

fn print_resolution(resolution: &Resolution) {
    for (name, version) in &resolution.resolved {
        println!("{} {}", name, version);
    }
    for conflict in &resolution.conflicts {
        eprintln!("conflict: {} ({})", conflict.name, conflict.reason);
        for (requirer, constraint) in &conflict.sources {
            eprintln!("  {} requires {}", requirer, constraint);
        }
    }
    for cycle in &resolution.cycles {
        eprintln!("cycle: {}", cycle.join(" -> "));
    }
    for advisory in &resolution.vulnerabilities {
        eprintln!(
            "advisory {}: {} {} ({:?})",
            advisory.id, advisory.package, advisory.version, advisory.severity
        );
    }
    for issue in &resolution.license_issues {
        eprintln!("license: {} ({})", issue.package, issue.reason);
    }
}
