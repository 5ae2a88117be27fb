//! Template registry and discovery
//!
//! Scans a directory tree for template manifests (`template.yaml`,
//! `brick.yaml`, or a `pubspec.yaml` carrying a version), parses them,
//! and indexes templates by name. The registry also adapts installed
//! manifests into a resolver metadata source so updates can be checked
//! against what is actually on disk.

use crate::resolver::dependency::{Dependency, DependencyKind, MetadataSource};
use crate::resolver::version::Version;
use crate::resolver::{ResolverError, ResolverResult, VersionConstraint};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Manifest file names recognized by the scan, in probe order.
pub const MANIFEST_FILES: [&str; 3] = ["template.yaml", "brick.yaml", "pubspec.yaml"];

/// Directory names never descended into.
const SKIP_DIRS: [&str; 6] = ["node_modules", "target", "build", "dist", "out", "vendor"];

/// Default scan depth.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Filesystem failure during a scan.
    #[error("registry io error: {0}")]
    Io(#[from] std::io::Error),

    /// A manifest failed to parse.
    #[error("invalid manifest {path}: {message}")]
    InvalidManifest {
        /// The offending file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// No template with that name.
    #[error("template not found: {0}")]
    NotFound(String),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// A dependency declaration inside a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDependency {
    /// Depended-on template name.
    pub name: String,
    /// Constraint text; empty means any version.
    #[serde(default)]
    pub version: String,
}

/// A parsed template manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateManifest {
    /// Template name.
    pub name: String,
    /// Template version.
    pub version: Version,
    /// Author, when declared.
    #[serde(default)]
    pub author: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// Template type (e.g. `app`, `package`).
    #[serde(rename = "type", default)]
    pub template_type: String,
    /// Target platform.
    #[serde(default)]
    pub platform: Option<String>,
    /// Target framework.
    #[serde(default)]
    pub framework: Option<String>,
    /// Complexity tier.
    #[serde(default)]
    pub complexity: Option<String>,
    /// Maturity label.
    #[serde(default)]
    pub maturity: Option<String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Declared dependencies.
    #[serde(default)]
    pub dependencies: Vec<ManifestDependency>,
}

/// A registered template.
#[derive(Debug, Clone)]
pub struct TemplateEntry {
    /// The parsed manifest.
    pub manifest: TemplateManifest,
    /// Directory the manifest was found in.
    pub path: PathBuf,
    /// When the template was registered.
    pub registered_at: DateTime<Utc>,
}

/// The template registry.
pub struct TemplateRegistry {
    entries: RwLock<HashMap<String, TemplateEntry>>,
    max_depth: usize,
}

impl TemplateRegistry {
    /// Registry with the default scan depth.
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    /// Registry with an explicit scan depth.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_depth,
        }
    }

    /// Scan a directory tree for manifests; returns how many templates
    /// were registered. Unparseable manifests are skipped with a warning.
    pub fn scan<P: AsRef<Path>>(&self, root: P) -> RegistryResult<usize> {
        let mut found = 0;
        self.scan_dir(root.as_ref(), 0, &mut found)?;
        log::info!("registry scan found {} template(s)", found);
        Ok(found)
    }

    fn scan_dir(&self, dir: &Path, depth: usize, found: &mut usize) -> RegistryResult<()> {
        if depth > self.max_depth {
            return Ok(());
        }

        for name in MANIFEST_FILES {
            let candidate = dir.join(name);
            if !candidate.is_file() {
                continue;
            }
            match parse_manifest(&candidate) {
                Ok(manifest) => {
                    self.register(manifest, dir.to_path_buf());
                    *found += 1;
                }
                Err(e) => log::warn!("{}", e),
            }
            // One manifest per directory; the first recognized file wins.
            break;
        }

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let dir_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if dir_name.starts_with('.') || SKIP_DIRS.contains(&dir_name) {
                continue;
            }
            self.scan_dir(&path, depth + 1, found)?;
        }
        Ok(())
    }

    /// Register a manifest directly.
    pub fn register(&self, manifest: TemplateManifest, path: PathBuf) {
        log::debug!("registered template {} {}", manifest.name, manifest.version);
        self.entries.write().insert(
            manifest.name.clone(),
            TemplateEntry {
                manifest,
                path,
                registered_at: Utc::now(),
            },
        );
    }

    /// Look up a template by name.
    pub fn get(&self, name: &str) -> Option<TemplateEntry> {
        self.entries.read().get(name).cloned()
    }

    /// Every registered template, sorted by name.
    pub fn list(&self) -> Vec<TemplateEntry> {
        let mut entries: Vec<TemplateEntry> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.manifest.name.cmp(&b.manifest.name));
        entries
    }

    /// Case-insensitive substring search over names, descriptions, and
    /// tags.
    pub fn search(&self, query: &str) -> Vec<TemplateEntry> {
        let needle = query.to_lowercase();
        self.list()
            .into_iter()
            .filter(|entry| {
                let m = &entry.manifest;
                m.name.to_lowercase().contains(&needle)
                    || m.description.to_lowercase().contains(&needle)
                    || m.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Number of registered templates.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_manifest(path: &Path) -> RegistryResult<TemplateManifest> {
    let raw = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&raw).map_err(|e| RegistryError::InvalidManifest {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Adapts the registry into a resolver metadata source: each installed
/// manifest contributes its single version and declared dependencies.
pub struct RegistryMetadataSource {
    registry: Arc<TemplateRegistry>,
}

impl RegistryMetadataSource {
    /// Source over a registry.
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl MetadataSource for RegistryMetadataSource {
    async fn available_versions(&self, name: &str) -> ResolverResult<Vec<Version>> {
        match self.registry.get(name) {
            Some(entry) => Ok(vec![entry.manifest.version]),
            None => Err(ResolverError::MetadataUnavailable(
                name.to_string(),
                "not in the local registry".to_string(),
            )),
        }
    }

    async fn dependencies_of(
        &self,
        name: &str,
        _version: &Version,
    ) -> ResolverResult<Vec<Dependency>> {
        let entry = self.registry.get(name).ok_or_else(|| {
            ResolverError::MetadataUnavailable(
                name.to_string(),
                "not in the local registry".to_string(),
            )
        })?;

        let mut dependencies = Vec::new();
        for declared in &entry.manifest.dependencies {
            dependencies.push(Dependency {
                name: declared.name.clone(),
                constraint: VersionConstraint::parse(&declared.version)?,
                kind: DependencyKind::Runtime,
                optional: false,
                condition: None,
                license: None,
                security_rating: None,
            });
        }
        Ok(dependencies)
    }
}
