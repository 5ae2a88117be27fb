//! Engine configuration
//!
//! One serde-backed `Config` covers every component: cache bounds and
//! policy, renderer limits, update behavior, snapshot retention, approval
//! deadlines, and network settings. A `templar.yaml` next to the working
//! directory overrides the defaults; locations fall back to the
//! platform cache and data directories.

use crate::cache::{CacheConfig, CompressionKind, EvictionPolicy};
use crate::transport::{CircuitBreakerConfig, NetworkType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration file name probed in the working directory.
pub const CONFIG_FILE: &str = "templar.yaml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    /// The file could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),
}

/// Cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Memory tier bound in bytes.
    pub max_memory_size: u64,
    /// Memory tier bound in entries.
    pub max_entries: usize,
    /// Disk tier bound in bytes.
    pub max_disk_size: u64,
    /// Default entry lifetime in seconds; absent means unbounded.
    pub default_ttl_secs: Option<u64>,
    /// Memory eviction policy.
    pub eviction_policy: EvictionPolicy,
    /// Disk payload codec.
    pub compression: CompressionKind,
    /// Disk payloads at or above this size are compressed.
    pub compression_threshold: usize,
    /// Expiry sweep period in seconds.
    pub sweep_interval_secs: u64,
    /// Fail puts instead of evicting.
    pub fail_when_full: bool,
    /// Disk tier directory; the platform cache directory when absent.
    pub directory: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            max_memory_size: defaults.max_memory_size,
            max_entries: defaults.max_entries,
            max_disk_size: defaults.max_disk_size,
            default_ttl_secs: defaults.default_ttl.map(|t| t.as_secs()),
            eviction_policy: defaults.eviction_policy,
            compression: defaults.compression,
            compression_threshold: defaults.compression_threshold,
            sweep_interval_secs: defaults.sweep_interval.as_secs(),
            fail_when_full: defaults.fail_when_full,
            directory: None,
        }
    }
}

impl CacheSettings {
    /// The engine-facing cache configuration.
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_memory_size: self.max_memory_size,
            max_entries: self.max_entries,
            max_disk_size: self.max_disk_size,
            default_ttl: self.default_ttl_secs.map(Duration::from_secs),
            eviction_policy: self.eviction_policy,
            compression: self.compression,
            compression_threshold: self.compression_threshold,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            fail_when_full: self.fail_when_full,
        }
    }

    /// The disk tier directory.
    pub fn directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("templar")
        })
    }
}

/// Renderer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Maximum block nesting depth.
    pub max_nesting: u32,
    /// Bound for the compile and result caches.
    pub max_cache_size: usize,
    /// Whether rendered results are cached.
    pub cache_enabled: bool,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            max_nesting: crate::engine::renderer::DEFAULT_MAX_NESTING,
            max_cache_size: crate::engine::renderer::DEFAULT_MAX_CACHE_SIZE,
            cache_enabled: true,
        }
    }
}

/// Update settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
    /// Consider prerelease candidates when checking for updates.
    pub include_prerelease: bool,
}

/// Snapshot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    /// How many snapshots to retain.
    pub max_snapshots: usize,
    /// Snapshot directory; the platform data directory when absent.
    pub directory: Option<PathBuf>,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            max_snapshots: crate::resolver::snapshot::DEFAULT_MAX_SNAPSHOTS,
            directory: None,
        }
    }
}

impl SnapshotSettings {
    /// The snapshot directory.
    pub fn directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("templar")
                .join("snapshots")
        })
    }
}

/// Approval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSettings {
    /// Days before a pending request expires.
    pub expiry_days: i64,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            expiry_days: crate::lifecycle::manager::DEFAULT_APPROVAL_TTL_DAYS,
        }
    }
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Network classification (`wifi|mobile|ethernet|unknown`).
    pub network_type: String,
    /// Consecutive failures that open the circuit breaker.
    pub circuit_failure_threshold: u32,
    /// Half-open successes that close it again.
    pub circuit_success_threshold: u32,
    /// Seconds the circuit stays open before probing.
    pub circuit_timeout_secs: u64,
    /// Remote registry base URL, when one is configured.
    pub remote_url: Option<String>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            network_type: "unknown".to_string(),
            circuit_failure_threshold: defaults.failure_threshold,
            circuit_success_threshold: defaults.success_threshold,
            circuit_timeout_secs: defaults.timeout.as_secs(),
            remote_url: None,
        }
    }
}

impl NetworkSettings {
    /// The parsed network type.
    pub fn network_type(&self) -> NetworkType {
        NetworkType::parse(&self.network_type)
    }

    /// The circuit breaker configuration.
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_failure_threshold,
            success_threshold: self.circuit_success_threshold,
            timeout: Duration::from_secs(self.circuit_timeout_secs),
        }
    }
}

/// The whole configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache engine settings.
    pub cache: CacheSettings,
    /// Renderer settings.
    pub renderer: RendererSettings,
    /// Update behavior.
    pub updates: UpdateSettings,
    /// Snapshot retention.
    pub snapshots: SnapshotSettings,
    /// Approval deadlines.
    pub approvals: ApprovalSettings,
    /// Network and circuit breaker settings.
    pub network: NetworkSettings,
}

impl Config {
    /// Parse a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load `templar.yaml` from a directory when present, else defaults.
    pub fn load_or_default<P: AsRef<Path>>(dir: P) -> Self {
        let path = dir.as_ref().join(CONFIG_FILE);
        if path.is_file() {
            match Self::load(&path) {
                Ok(config) => {
                    log::info!("loaded configuration from {}", path.display());
                    return config;
                }
                Err(e) => log::warn!("ignoring {}: {}", path.display(), e),
            }
        }
        Self::default()
    }
}
