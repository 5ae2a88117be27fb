//! Snapshots of the resolved version map
//!
//! Each snapshot is one JSON document on disk, indexed in memory sorted
//! by creation time descending. Retention is bounded: creating a snapshot
//! past the limit evicts the oldest one and unlinks its file.

use super::version::Version;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Default snapshot retention.
pub const DEFAULT_MAX_SNAPSHOTS: usize = 5;

/// Snapshot errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// No snapshot with that id.
    #[error("snapshot not found: {0}")]
    NotFound(Uuid),

    /// Filesystem failure.
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot file did not deserialize.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// An immutable recorded state of the resolved version map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Snapshot identifier.
    pub id: Uuid,
    /// Human-oriented name.
    pub name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// The recorded `name -> version` map.
    pub template_versions: BTreeMap<String, Version>,
    /// Serialized size in bytes.
    pub size: u64,
    /// Why the snapshot was taken.
    pub description: String,
}

/// Disk-backed snapshot store with bounded retention.
pub struct SnapshotManager {
    dir: PathBuf,
    max_snapshots: usize,
    /// Sorted by `created_at` descending; the oldest snapshot is last.
    index: RwLock<Vec<Snapshot>>,
}

impl SnapshotManager {
    /// Open (or create) a snapshot directory and load its index.
    pub fn new<P: AsRef<Path>>(dir: P, max_snapshots: usize) -> SnapshotResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut index = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read(&path)
                .map_err(SnapshotError::from)
                .and_then(|bytes| serde_json::from_slice::<Snapshot>(&bytes).map_err(Into::into))
            {
                Ok(snapshot) => index.push(snapshot),
                Err(e) => {
                    log::warn!("skipping unreadable snapshot {}: {}", path.display(), e);
                }
            }
        }
        index.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(Self {
            dir,
            max_snapshots: max_snapshots.max(1),
            index: RwLock::new(index),
        })
    }

    /// Record a snapshot of the given version map.
    pub async fn create(
        &self,
        template_versions: BTreeMap<String, Version>,
        description: &str,
    ) -> SnapshotResult<Snapshot> {
        let id = Uuid::new_v4();
        let mut snapshot = Snapshot {
            id,
            name: format!("snapshot-{}", id.simple()),
            created_at: Utc::now(),
            template_versions,
            size: 0,
            description: description.to_string(),
        };
        // The recorded size covers the serialized version map.
        snapshot.size = serde_json::to_vec(&snapshot.template_versions)?.len() as u64;
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        let path = self.path_for(id);
        tokio::fs::write(&path, &bytes).await?;
        log::info!(
            "snapshot {} recorded ({} template(s), {} bytes)",
            id,
            snapshot.template_versions.len(),
            snapshot.size
        );

        let evicted = {
            let mut index = self.index.write();
            index.insert(0, snapshot.clone());
            index.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let mut evicted = Vec::new();
            while index.len() > self.max_snapshots {
                if let Some(oldest) = index.pop() {
                    evicted.push(oldest);
                }
            }
            evicted
        };
        for old in evicted {
            let path = self.path_for(old.id);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                log::warn!("failed to unlink evicted snapshot {}: {}", old.id, e);
            } else {
                log::debug!("evicted snapshot {}", old.id);
            }
        }

        Ok(snapshot)
    }

    /// Load a snapshot by id, falling back to disk when the index was
    /// built before the file appeared.
    pub async fn load(&self, id: Uuid) -> SnapshotResult<Snapshot> {
        if let Some(snapshot) = self.index.read().iter().find(|s| s.id == id) {
            return Ok(snapshot.clone());
        }
        let path = self.path_for(id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| SnapshotError::NotFound(id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// All snapshots, newest first.
    pub fn list(&self) -> Vec<Snapshot> {
        self.index.read().clone()
    }

    /// Remove a snapshot and its file.
    pub async fn delete(&self, id: Uuid) -> SnapshotResult<()> {
        let existed = {
            let mut index = self.index.write();
            let before = index.len();
            index.retain(|s| s.id != id);
            index.len() != before
        };
        if !existed {
            return Err(SnapshotError::NotFound(id));
        }
        tokio::fs::remove_file(self.path_for(id)).await?;
        Ok(())
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}
