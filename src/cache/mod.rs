//! Multi-tier content cache
//!
//! Three tiers: a bounded in-memory tier with pluggable eviction, a disk
//! tier of content-addressed JSON files, and an optional injected remote
//! source consulted read-through. Reads promote lower-tier hits upward;
//! writes land in memory and disk. Expiry, integrity verification, and
//! per-tier statistics are handled by the engine.

pub mod disk;
pub mod engine;
pub mod entry;
pub mod memory;
pub mod remote;

pub use engine::{CacheEngine, CacheStatistics, CacheTier, OverallStats, TierStats};
pub use entry::{CacheEntry, PutOptions};
pub use memory::MemoryTier;
pub use remote::{HttpRemoteSource, NoRelatedKeys, RelatedKeys, RemoteSource, StaticRemoteSource};

use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::time::Duration;
use thiserror::Error;

/// Cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Stored content no longer matches its recorded hash.
    #[error("integrity mismatch for key `{0}`")]
    IntegrityMismatch(String),

    /// The memory tier is full and configured to fail rather than evict.
    #[error("cache full, cannot store key `{0}`")]
    CacheFull(String),

    /// An entry failed to serialize or deserialize.
    #[error("cache serialization error: {0}")]
    Serialization(String),

    /// Filesystem failure in the disk tier.
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote tier failure that could not be recovered locally.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The operation was cancelled.
    #[error("cache operation cancelled")]
    Cancelled,
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Eviction policy for the memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the least-recently-accessed entry.
    Lru,
    /// Evict the entry with the lowest access count; ties break by LRU.
    Lfu,
    /// Evict the first-inserted entry.
    Fifo,
    /// Evict the earliest-expired entry, falling back to LRU.
    Ttl,
    /// Evict a uniformly chosen entry.
    Random,
}

/// Payload compression codec recorded in disk-tier metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    /// Stored verbatim.
    None,
    /// DEFLATE in a gzip wrapper.
    Gzip,
    /// LZ4 block format.
    Lz4,
    /// Brotli.
    Brotli,
}

impl CompressionKind {
    /// Compress a payload with this codec.
    pub fn compress(&self, data: &[u8]) -> CacheResult<Vec<u8>> {
        match self {
            CompressionKind::None => Ok(data.to_vec()),
            CompressionKind::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            CompressionKind::Lz4 => lz4::block::compress(data, None, false)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            CompressionKind::Brotli => {
                let mut out = Vec::new();
                {
                    let mut writer = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
                    writer.write_all(data)?;
                }
                Ok(out)
            }
        }
    }

    /// Decompress a payload; `original_size` is the uncompressed length
    /// recorded in the entry metadata.
    pub fn decompress(&self, data: &[u8], original_size: usize) -> CacheResult<Vec<u8>> {
        match self {
            CompressionKind::None => Ok(data.to_vec()),
            CompressionKind::Gzip => {
                let mut decoder = flate2::read::GzDecoder::new(data);
                let mut out = Vec::with_capacity(original_size);
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
            CompressionKind::Lz4 => lz4::block::decompress(data, Some(original_size as i32))
                .map_err(|e| CacheError::Serialization(e.to_string())),
            CompressionKind::Brotli => {
                let mut decoder = brotli::Decompressor::new(data, 4096);
                let mut out = Vec::with_capacity(original_size);
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

/// Cache engine configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Memory tier bound in bytes.
    pub max_memory_size: u64,

    /// Memory tier bound in entry count.
    pub max_entries: usize,

    /// Disk tier bound in bytes.
    pub max_disk_size: u64,

    /// TTL applied when a put or a remote fill names none.
    pub default_ttl: Option<Duration>,

    /// Memory-tier eviction policy.
    pub eviction_policy: EvictionPolicy,

    /// Codec used for disk payloads above the threshold.
    pub compression: CompressionKind,

    /// Payloads at or above this size are compressed on disk.
    pub compression_threshold: usize,

    /// How often the expiry sweep runs.
    pub sweep_interval: Duration,

    /// Fail `put` with `CacheFull` instead of evicting.
    pub fail_when_full: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_size: 64 * 1024 * 1024,
            max_entries: 10_000,
            max_disk_size: 512 * 1024 * 1024,
            default_ttl: Some(Duration::from_secs(3600)),
            eviction_policy: EvictionPolicy::Lru,
            compression: CompressionKind::Lz4,
            compression_threshold: 1024,
            sweep_interval: Duration::from_secs(3600),
            fail_when_full: false,
        }
    }
}
