//! End-to-end resolver and lifecycle scenarios: constraint grammar,
//! update classification, approval-gated releases, and snapshot-backed
//! rollback.

use std::sync::Arc;
use templar::lifecycle::{
    ApprovalStatus, LifecycleError, LifecycleManager, LifecycleState, StateChangeOutcome,
};
use templar::resolver::dependency::{
    AllowListLicenseDatabase, InMemoryMetadataSource, InMemoryVulnerabilityDatabase,
    MetadataSource, VulnerabilityDatabase,
};
use templar::resolver::snapshot::SnapshotManager;
use templar::resolver::update::{UpdateController, UpdateOptions};
use templar::resolver::{Dependency, DependencyResolver, Version, VersionConstraint};
use tokio_util::sync::CancellationToken;

fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
}

#[test]
fn version_comparison_scenarios() {
    assert!(v("3.2.0") >= v("3.0.0"));
    assert!(v("3.2.0-beta") < v("3.2.0"));
    assert!(v("10.0.0") > v("9.9.9"));
}

#[test]
fn caret_constraint_scenario() {
    let c = VersionConstraint::parse("^1.2.3").unwrap();
    assert!(c.allows(&v("1.2.3")));
    assert!(c.allows(&v("1.9.9")));
    assert!(!c.allows(&v("2.0.0")));
    assert!(!c.allows(&v("1.2.2")));
}

#[tokio::test]
async fn diamond_dependency_resolves_once() {
    let metadata = InMemoryMetadataSource::new();
    metadata.add_package(
        "app",
        v("1.0.0"),
        vec![
            Dependency::runtime("left", "*").unwrap(),
            Dependency::runtime("right", "*").unwrap(),
        ],
    );
    metadata.add_package(
        "left",
        v("1.0.0"),
        vec![Dependency::runtime("shared", "^1.0.0").unwrap()],
    );
    metadata.add_package(
        "right",
        v("1.0.0"),
        vec![Dependency::runtime("shared", ">=1.2.0").unwrap()],
    );
    metadata.add_package("shared", v("1.1.0"), vec![]);
    metadata.add_package("shared", v("1.3.0"), vec![]);

    let resolver = DependencyResolver::new(
        Arc::new(metadata),
        Arc::new(InMemoryVulnerabilityDatabase::new()),
        Arc::new(AllowListLicenseDatabase::default()),
    );
    let resolution = resolver
        .resolve(
            &[Dependency::runtime("app", "1.0.0").unwrap()],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(resolution.is_clean(), "{:?}", resolution.conflicts);
    assert_eq!(resolution.resolved.len(), 4);
    // Both branches' constraints hold for the single chosen version.
    assert_eq!(resolution.resolved["shared"], v("1.3.0"));
}

#[tokio::test]
async fn full_release_flow_with_approvals() {
    let manager = LifecycleManager::new();
    let record = manager.create_version("web-starter", v("1.0.0"));

    // Jumping straight to Released is illegal from Development.
    assert!(matches!(
        manager.request_state_change(&record.id, LifecycleState::Released, "dev", None, None),
        Err(LifecycleError::IllegalTransition { .. })
    ));

    // Development -> Testing -> Prerelease need no approvals.
    manager
        .request_state_change(&record.id, LifecycleState::Testing, "dev", None, None)
        .unwrap();
    manager
        .request_state_change(&record.id, LifecycleState::Prerelease, "dev", None, None)
        .unwrap();

    // Prerelease -> Released is approval-gated.
    let request = match manager
        .request_state_change(&record.id, LifecycleState::Released, "dev", None, None)
        .unwrap()
    {
        StateChangeOutcome::PendingApproval(request) => request,
        other => panic!("expected a pending request, got {:?}", other),
    };

    // An outsider cannot decide it.
    assert!(matches!(
        manager.approve(request.id, "stranger", None),
        Err(LifecycleError::NotAuthorized(_))
    ));

    manager
        .approve(request.id, "release_manager", Some("lgtm".to_string()))
        .unwrap();
    let partial = manager.get_request(request.id).unwrap();
    assert_eq!(partial.status, ApprovalStatus::Pending);

    manager.approve(request.id, "tech_lead", None).unwrap();
    let released = manager.get_version(&record.id).unwrap();
    assert_eq!(released.state, LifecycleState::Released);
    assert!(released.released_at.is_some());
}

#[tokio::test]
async fn update_check_classify_apply_and_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let lifecycle = Arc::new(LifecycleManager::new());
    let metadata = Arc::new(InMemoryMetadataSource::new());
    let snapshots = Arc::new(SnapshotManager::new(dir.path(), 5).unwrap());

    lifecycle.create_version("web", v("1.0.0"));
    lifecycle.create_version("api", v("2.1.0"));
    metadata.add_package("web", v("1.1.0"), vec![]);
    metadata.add_package("web", v("2.0.0"), vec![]);
    metadata.add_package("api", v("2.1.1"), vec![]);

    let controller = UpdateController::new(
        Arc::clone(&lifecycle),
        Arc::clone(&metadata) as Arc<dyn MetadataSource>,
        Arc::clone(&snapshots),
    );

    let updates = controller
        .check_for_updates(&UpdateOptions::default())
        .await
        .unwrap();
    assert_eq!(updates.len(), 2);
    let web = updates.iter().find(|u| u.name == "web").unwrap();
    // The greatest release wins: 2.0.0, a major jump.
    assert_eq!(web.available, v("2.0.0"));

    let token = CancellationToken::new();
    let report = controller.perform_update(&updates, false, &token).await.unwrap();
    assert_eq!(lifecycle.current_version("web").unwrap().version, v("2.0.0"));
    assert_eq!(lifecycle.current_version("api").unwrap().version, v("2.1.1"));

    // Rollback restores the snapshotted map.
    let snapshot_id = report.snapshot_id.unwrap();
    let restored = controller.rollback(snapshot_id).await.unwrap();
    assert_eq!(restored, 2);
    assert_eq!(lifecycle.current_version("web").unwrap().version, v("1.0.0"));
    assert_eq!(lifecycle.current_version("api").unwrap().version, v("2.1.0"));
}

#[tokio::test]
async fn vulnerabilities_surface_without_blocking() {
    use templar::resolver::dependency::{Severity, VulnerabilityReport};

    let metadata = InMemoryMetadataSource::new();
    metadata.add_package("risky", v("1.0.0"), vec![]);

    let vulns = Arc::new(InMemoryVulnerabilityDatabase::new());
    vulns.add_advisory(VulnerabilityReport {
        package: "risky".to_string(),
        version: v("1.0.0"),
        id: "ADV-2026-0042".to_string(),
        severity: Severity::Critical,
        description: "deserialization of untrusted manifests".to_string(),
    });

    let resolver = DependencyResolver::new(
        Arc::new(metadata),
        Arc::clone(&vulns) as Arc<dyn VulnerabilityDatabase>,
        Arc::new(AllowListLicenseDatabase::new(["MIT".to_string()])),
    );
    let resolution = resolver
        .resolve(
            &[Dependency::runtime("risky", "*").unwrap()],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(resolution.is_clean());
    assert_eq!(resolution.vulnerabilities.len(), 1);
    assert_eq!(resolution.vulnerabilities[0].id, "ADV-2026-0042");
    // The allow-list flags the undeclared license too.
    assert_eq!(resolution.license_issues.len(), 1);
}
