//! Update command
//!
//! Seeds the lifecycle book from the registry scan, checks the metadata
//! source for newer versions, prints the plan, and applies it unless
//! `--dry-run` was given. Application is snapshot-first, so a failed run
//! leaves the version map restorable.

use super::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::config::Config;
use crate::lifecycle::LifecycleManager;
use crate::registry::{RegistryMetadataSource, TemplateRegistry};
use crate::resolver::dependency::MetadataSource;
use crate::resolver::snapshot::SnapshotManager;
use crate::resolver::update::{UpdateController, UpdateOptions};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Check for updates and apply them.
pub async fn run(
    registry: Arc<TemplateRegistry>,
    config: &Config,
    dry_run: bool,
    token: &CancellationToken,
) -> i32 {
    let lifecycle = Arc::new(LifecycleManager::new());
    for entry in registry.list() {
        lifecycle.create_version(&entry.manifest.name, entry.manifest.version.clone());
    }

    let snapshots = match SnapshotManager::new(
        config.snapshots.directory(),
        config.snapshots.max_snapshots,
    ) {
        Ok(snapshots) => Arc::new(snapshots),
        Err(e) => {
            eprintln!("cannot open snapshot store: {}", e);
            return EXIT_FAILURE;
        }
    };

    let metadata: Arc<dyn MetadataSource> = Arc::new(RegistryMetadataSource::new(registry));
    let controller = UpdateController::new(lifecycle, metadata, snapshots);

    let options = UpdateOptions {
        templates: None,
        include_prerelease: config.updates.include_prerelease,
    };
    let updates = match controller.check_for_updates(&options).await {
        Ok(updates) => updates,
        Err(e) => {
            eprintln!("update check failed: {}", e);
            return EXIT_FAILURE;
        }
    };

    if updates.is_empty() {
        println!("everything is up to date");
        return EXIT_SUCCESS;
    }
    for update in &updates {
        println!(
            "{}: {} -> {} ({:?})",
            update.name, update.current, update.available, update.update_type
        );
    }

    match controller.perform_update(&updates, dry_run, token).await {
        Ok(report) if report.dry_run => {
            println!("dry run: {} update(s) not applied", report.applied.len());
            EXIT_SUCCESS
        }
        Ok(report) => {
            println!("applied {} update(s)", report.applied.len());
            if let Some(snapshot_id) = report.snapshot_id {
                println!("snapshot {} records the previous state", snapshot_id);
            }
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("update failed: {}", e);
            EXIT_FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnapshotSettings;
    use crate::registry::TemplateManifest;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_up_to_date_registry_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(TemplateRegistry::new());
        let manifest: TemplateManifest =
            serde_yaml::from_str("name: app\nversion: 1.0.0\n").unwrap();
        registry.register(manifest, PathBuf::from("/templates"));

        let config = Config {
            snapshots: SnapshotSettings {
                directory: Some(dir.path().to_path_buf()),
                ..Default::default()
            },
            ..Default::default()
        };

        let code = run(registry, &config, true, &CancellationToken::new()).await;
        assert_eq!(code, EXIT_SUCCESS);
    }
}
