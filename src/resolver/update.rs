//! Update checking, classification, and application
//!
//! The controller reads the currently tracked template versions from the
//! lifecycle manager, asks the metadata source what is available, and
//! classifies each candidate. Application is snapshot-first: the current
//! version map is recorded before anything changes, and a failure or
//! cancellation mid-apply rolls the map back through the snapshot.

use super::dependency::MetadataSource;
use super::snapshot::{SnapshotError, SnapshotManager};
use super::version::Version;
use super::{ResolverError, ResolverResult};
use crate::lifecycle::{LifecycleError, LifecycleManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Classification of an available update relative to the current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateType {
    /// Breaking: the major component grew.
    Major,
    /// Feature: the minor component grew.
    Minor,
    /// Fix: only the patch component grew.
    Patch,
    /// The candidate carries a prerelease identifier.
    Prerelease,
}

/// Classify a candidate against the current version. A prerelease
/// candidate is always `Prerelease`, regardless of distance.
pub fn determine_update_type(current: &Version, available: &Version) -> UpdateType {
    if available.is_prerelease() {
        UpdateType::Prerelease
    } else if available.major > current.major {
        UpdateType::Major
    } else if available.minor > current.minor {
        UpdateType::Minor
    } else {
        UpdateType::Patch
    }
}

/// An available update for one template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateInfo {
    /// Template name.
    pub name: String,
    /// The currently tracked version.
    pub current: Version,
    /// The best available candidate.
    pub available: Version,
    /// Classification of the jump.
    pub update_type: UpdateType,
}

/// Options for an update check.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Restrict the check to these template names.
    pub templates: Option<Vec<String>>,
    /// Consider prerelease candidates.
    pub include_prerelease: bool,
}

/// Outcome of an update application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateReport {
    /// Updates applied (or that would be applied, in a dry run).
    pub applied: Vec<UpdateInfo>,
    /// The snapshot taken before application, when one was taken.
    pub snapshot_id: Option<Uuid>,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

/// Errors from update application.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Resolution or metadata failure.
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    /// Snapshot persistence failure.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    /// Lifecycle transition failure.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// The update controller.
pub struct UpdateController {
    lifecycle: Arc<LifecycleManager>,
    metadata: Arc<dyn MetadataSource>,
    snapshots: Arc<SnapshotManager>,
}

impl UpdateController {
    /// Controller over the lifecycle book, a metadata source, and a
    /// snapshot store.
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        metadata: Arc<dyn MetadataSource>,
        snapshots: Arc<SnapshotManager>,
    ) -> Self {
        Self {
            lifecycle,
            metadata,
            snapshots,
        }
    }

    /// Find the best available update per tracked template.
    pub async fn check_for_updates(
        &self,
        options: &UpdateOptions,
    ) -> ResolverResult<Vec<UpdateInfo>> {
        let mut updates = Vec::new();

        for (name, current) in self.lifecycle.current_versions() {
            if let Some(filter) = &options.templates {
                if !filter.iter().any(|t| *t == name) {
                    continue;
                }
            }

            let available = match self.metadata.available_versions(&name).await {
                Ok(available) => available,
                Err(ResolverError::MetadataUnavailable(_, reason)) => {
                    log::warn!("skipping update check for {}: {}", name, reason);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let best = available
                .into_iter()
                .filter(|v| options.include_prerelease || !v.is_prerelease())
                .filter(|v| *v > current)
                .max();

            if let Some(best) = best {
                let update_type = determine_update_type(&current, &best);
                log::info!(
                    "update available: {} {} -> {} ({:?})",
                    name,
                    current,
                    best,
                    update_type
                );
                updates.push(UpdateInfo {
                    name,
                    current,
                    available: best,
                    update_type,
                });
            }
        }

        Ok(updates)
    }

    /// Apply a set of updates. A snapshot of the current version map is
    /// taken first; cancellation mid-apply restores it.
    pub async fn perform_update(
        &self,
        updates: &[UpdateInfo],
        dry_run: bool,
        token: &CancellationToken,
    ) -> Result<UpdateReport, UpdateError> {
        if dry_run || updates.is_empty() {
            return Ok(UpdateReport {
                applied: updates.to_vec(),
                snapshot_id: None,
                dry_run,
            });
        }

        let snapshot = self
            .snapshots
            .create(
                self.lifecycle.current_versions(),
                &format!("before applying {} update(s)", updates.len()),
            )
            .await?;

        for update in updates {
            if token.is_cancelled() {
                log::warn!("update cancelled, rolling back to snapshot {}", snapshot.id);
                self.rollback(snapshot.id).await?;
                return Err(UpdateError::Resolver(ResolverError::Cancelled));
            }
            self.lifecycle
                .set_current_version(&update.name, &update.available, "updater");
        }

        Ok(UpdateReport {
            applied: updates.to_vec(),
            snapshot_id: Some(snapshot.id),
            dry_run: false,
        })
    }

    /// Drive every template back to the versions a snapshot recorded.
    pub async fn rollback(&self, snapshot_id: Uuid) -> Result<usize, UpdateError> {
        let snapshot = self.snapshots.load(snapshot_id).await?;
        let mut restored = 0;
        for (name, version) in &snapshot.template_versions {
            self.lifecycle.set_current_version(name, version, "rollback");
            restored += 1;
        }
        log::info!(
            "rolled back {} template(s) to snapshot {}",
            restored,
            snapshot_id
        );
        Ok(restored)
    }
}
