//! Tiered cache engine
//!
//! Read path: memory, then disk (promoting a hit into memory), then the
//! injected remote source (filling both local tiers with the default
//! TTL). Write path: memory and disk. Per-tier hit/miss counters feed the
//! statistics surface; a periodic sweep clears expired entries from both
//! local tiers.

use super::disk::DiskTier;
use super::entry::{CacheEntry, PutOptions};
use super::memory::MemoryTier;
use super::remote::{NoRelatedKeys, RelatedKeys, RemoteSource};
use super::{CacheConfig, CacheError, CacheResult};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The three logical tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// L1, in memory.
    Memory,
    /// L2, on disk.
    Disk,
    /// L3, the injected remote source.
    Remote,
}

/// Statistics for one tier.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TierStats {
    /// Reads answered by this tier.
    pub hits: u64,
    /// Reads this tier could not answer.
    pub misses: u64,
    /// `hits / (hits + misses)`.
    pub hit_rate: f64,
    /// Bytes currently held.
    pub size: u64,
    /// Entries currently held.
    pub entries: usize,
}

/// Aggregate statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OverallStats {
    /// Reads answered by any tier.
    pub total_hits: u64,
    /// Reads no tier answered.
    pub total_misses: u64,
    /// `total_hits / (total_hits + total_misses)`.
    pub overall_hit_rate: f64,
}

/// The full statistics surface.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Memory tier.
    pub memory: TierStats,
    /// Disk tier.
    pub disk: TierStats,
    /// Remote tier.
    pub cdn: TierStats,
    /// Aggregates.
    pub overall: OverallStats,
}

#[derive(Default, Clone)]
struct Counters {
    memory_hits: u64,
    memory_misses: u64,
    disk_hits: u64,
    disk_misses: u64,
    remote_hits: u64,
    remote_misses: u64,
}

/// The multi-tier cache engine.
pub struct CacheEngine {
    config: CacheConfig,
    memory: RwLock<MemoryTier>,
    disk: DiskTier,
    remote: Option<Arc<dyn RemoteSource>>,
    related: Arc<dyn RelatedKeys>,
    counters: RwLock<Counters>,
}

impl CacheEngine {
    /// Engine over a disk directory with no remote tier and the no-op
    /// prefetch hook.
    pub fn new<P: AsRef<Path>>(config: CacheConfig, disk_dir: P) -> CacheResult<Self> {
        let memory = MemoryTier::new(
            config.max_memory_size,
            config.max_entries,
            config.eviction_policy,
        );
        let disk = DiskTier::new(
            disk_dir,
            config.max_disk_size,
            config.compression,
            config.compression_threshold,
        )?;
        Ok(Self {
            config,
            memory: RwLock::new(memory),
            disk,
            remote: None,
            related: Arc::new(NoRelatedKeys),
            counters: RwLock::new(Counters::default()),
        })
    }

    /// Attach a remote tier.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteSource>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Replace the prefetch hook.
    pub fn with_related_keys(mut self, related: Arc<dyn RelatedKeys>) -> Self {
        self.related = related;
        self
    }

    /// Read through the tiers.
    pub async fn get(&self, key: &str, token: &CancellationToken) -> CacheResult<Option<Vec<u8>>> {
        if token.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        let now = Utc::now();

        // L1.
        if let Some(entry) = self.memory.write().get(key, now) {
            self.counters.write().memory_hits += 1;
            return Ok(Some(entry.bytes));
        }
        self.counters.write().memory_misses += 1;

        // L2; a hit is promoted into L1, subject to its bounds.
        if token.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        match self.disk.read(key, now).await? {
            Some(mut entry) => {
                self.counters.write().disk_hits += 1;
                entry.touch(now);
                let bytes = entry.bytes.clone();
                self.insert_memory(entry)?;
                return Ok(Some(bytes));
            }
            None => {
                self.counters.write().disk_misses += 1;
            }
        }

        // L3, read-through; a hit fills both local tiers with the
        // default TTL.
        let remote = match &self.remote {
            Some(remote) => Arc::clone(remote),
            None => {
                self.counters.write().remote_misses += 1;
                return Ok(None);
            }
        };
        if token.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        match remote.fetch(key).await {
            Ok(Some(bytes)) => {
                self.counters.write().remote_hits += 1;
                let entry = CacheEntry::new(key.to_string(), bytes.clone(), self.config.default_ttl);
                self.disk.write(&entry).await?;
                self.insert_memory(entry)?;
                Ok(Some(bytes))
            }
            Ok(None) => {
                self.counters.write().remote_misses += 1;
                Ok(None)
            }
            Err(e) => {
                // A remote failure after both local tiers missed reads as
                // a miss; only the failure itself is logged.
                log::warn!("remote tier failed for `{}`: {}", key, e);
                self.counters.write().remote_misses += 1;
                Ok(None)
            }
        }
    }

    /// Store into the memory and disk tiers, then run the prefetch hook.
    pub async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        options: PutOptions,
        token: &CancellationToken,
    ) -> CacheResult<()> {
        if token.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let entry = CacheEntry::new(key.to_string(), bytes, None)
            .with_options(options, self.config.default_ttl);

        self.insert_memory(entry.clone())?;

        if token.is_cancelled() {
            // Roll the in-progress insert back.
            self.memory.write().remove(key);
            return Err(CacheError::Cancelled);
        }
        self.disk.write(&entry).await?;
        if token.is_cancelled() {
            self.memory.write().remove(key);
            let _ = self.disk.remove(key).await;
            return Err(CacheError::Cancelled);
        }

        let related = self.related.related(key);
        if !related.is_empty() {
            self.prefetch(&related, token).await;
        }
        Ok(())
    }

    /// Pull a set of keys into the local tiers through the normal read
    /// path. Failures are logged, not surfaced.
    pub async fn prewarm(&self, keys: &[String], token: &CancellationToken) {
        for key in keys {
            if token.is_cancelled() {
                return;
            }
            if let Err(e) = self.get(key, token).await {
                log::debug!("prewarm of `{}` failed: {}", key, e);
            }
        }
    }

    /// Fetch related keys that are not already cached locally.
    async fn prefetch(&self, keys: &[String], token: &CancellationToken) {
        for key in keys {
            if token.is_cancelled() {
                return;
            }
            if self.memory.write().get(key, Utc::now()).is_some() {
                continue;
            }
            if let Err(e) = self.get(key, token).await {
                log::debug!("prefetch of `{}` failed: {}", key, e);
            }
        }
    }

    /// Remove a key from the local tiers.
    pub async fn remove(&self, key: &str) -> CacheResult<bool> {
        let in_memory = self.memory.write().remove(key).is_some();
        let on_disk = self.disk.remove(key).await?;
        Ok(in_memory || on_disk)
    }

    /// Drop every entry from the local tiers.
    pub async fn clear(&self) -> CacheResult<()> {
        self.memory.write().clear();
        self.disk.clear().await
    }

    /// Keys held by a tier, or by both local tiers when none is named.
    pub async fn keys(&self, tier: Option<CacheTier>) -> CacheResult<Vec<String>> {
        match tier {
            Some(CacheTier::Memory) => Ok(self.memory.read().keys()),
            Some(CacheTier::Disk) => self.disk.keys().await,
            Some(CacheTier::Remote) => Ok(Vec::new()),
            None => {
                let mut keys = self.memory.read().keys();
                for key in self.disk.keys().await? {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
                Ok(keys)
            }
        }
    }

    /// Remove expired entries from both local tiers.
    pub async fn sweep_expired(&self) -> CacheResult<(usize, usize)> {
        let now = Utc::now();
        let from_memory = self.memory.write().sweep_expired(now);
        let from_disk = self.disk.sweep_expired(now).await?;
        if from_memory + from_disk > 0 {
            log::info!(
                "expiry sweep removed {} memory and {} disk entr(ies)",
                from_memory,
                from_disk
            );
        }
        Ok((from_memory, from_disk))
    }

    /// Start the periodic expiry sweep.
    pub fn start_sweeper(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let interval = engine.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = engine.sweep_expired().await {
                            log::warn!("expiry sweep failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    /// The statistics surface.
    pub async fn stats(&self) -> CacheResult<CacheStatistics> {
        let disk_entries = self.disk.len().await?;
        let disk_bytes = self.disk.bytes_used().await?;
        let (memory_bytes, memory_entries) = {
            let memory = self.memory.read();
            (memory.bytes_used(), memory.len())
        };
        let counters = self.counters.read().clone();

        let tier = |hits: u64, misses: u64, size: u64, entries: usize| TierStats {
            hits,
            misses,
            hit_rate: rate(hits, misses),
            size,
            entries,
        };

        let total_hits = counters.memory_hits + counters.disk_hits + counters.remote_hits;
        // A read only counts as an overall miss once it has fallen
        // through every tier, which is exactly a remote-tier miss.
        let total_misses = counters.remote_misses;

        Ok(CacheStatistics {
            memory: tier(
                counters.memory_hits,
                counters.memory_misses,
                memory_bytes,
                memory_entries,
            ),
            disk: tier(counters.disk_hits, counters.disk_misses, disk_bytes, disk_entries),
            cdn: tier(counters.remote_hits, counters.remote_misses, 0, 0),
            overall: OverallStats {
                total_hits,
                total_misses,
                overall_hit_rate: rate(total_hits, total_misses),
            },
        })
    }

    /// Evictions performed by the memory tier.
    pub fn memory_evictions(&self) -> u64 {
        self.memory.read().evictions()
    }

    fn insert_memory(&self, entry: CacheEntry) -> CacheResult<()> {
        self.memory
            .write()
            .insert(entry, self.config.fail_when_full)
    }
}

fn rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::disk::content_hash;
    use crate::cache::remote::StaticRemoteSource;

    fn engine(dir: &Path, config: CacheConfig) -> CacheEngine {
        CacheEngine::new(config, dir).unwrap()
    }

    fn small_config(max_entries: usize) -> CacheConfig {
        CacheConfig {
            max_entries,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = engine(dir.path(), CacheConfig::default());
        let token = CancellationToken::new();

        cache
            .put("k", b"value".to_vec(), PutOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(
            cache.get("k", &token).await.unwrap(),
            Some(b"value".to_vec())
        );
    }

    #[tokio::test]
    async fn test_lru_scenario() {
        // max_entries=2: put a, put b, get a, put c => b evicted.
        let dir = tempfile::tempdir().unwrap();
        let cache = engine(dir.path(), small_config(2));
        let token = CancellationToken::new();

        cache.put("a", vec![1], PutOptions::default(), &token).await.unwrap();
        cache.put("b", vec![2], PutOptions::default(), &token).await.unwrap();
        cache.get("a", &token).await.unwrap();
        cache.put("c", vec![3], PutOptions::default(), &token).await.unwrap();

        let memory_keys = cache.keys(Some(CacheTier::Memory)).await.unwrap();
        assert!(!memory_keys.contains(&"b".to_string()));
        assert!(memory_keys.contains(&"a".to_string()));
        assert!(memory_keys.contains(&"c".to_string()));
        assert_eq!(cache.memory_evictions(), 1);

        // `b` still lives on disk, so a full get finds it again.
        assert_eq!(cache.get("b", &token).await.unwrap(), Some(vec![2]));
    }

    #[tokio::test]
    async fn test_disk_hit_promotes_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();

        // Write through one engine, read through a fresh one whose
        // memory tier is empty.
        {
            let cache = engine(dir.path(), CacheConfig::default());
            cache
                .put("k", b"persisted".to_vec(), PutOptions::default(), &token)
                .await
                .unwrap();
        }
        let cache = engine(dir.path(), CacheConfig::default());

        assert_eq!(
            cache.get("k", &token).await.unwrap(),
            Some(b"persisted".to_vec())
        );
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.disk.hits, 1);
        assert_eq!(stats.memory.misses, 1);

        // Promotion: the second read is a memory hit.
        cache.get("k", &token).await.unwrap();
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.memory.hits, 1);
        assert_eq!(stats.disk.hits, 1);
    }

    #[tokio::test]
    async fn test_remote_fill_lands_in_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(StaticRemoteSource::new());
        remote.insert("far", b"from the cdn".to_vec());

        let cache = engine(dir.path(), CacheConfig::default())
            .with_remote(Arc::clone(&remote) as Arc<dyn RemoteSource>);
        let token = CancellationToken::new();

        assert_eq!(
            cache.get("far", &token).await.unwrap(),
            Some(b"from the cdn".to_vec())
        );
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.cdn.hits, 1);

        // Now local: memory answers, and the disk file exists.
        cache.get("far", &token).await.unwrap();
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.memory.hits, 1);
        assert!(cache
            .keys(Some(CacheTier::Disk))
            .await
            .unwrap()
            .contains(&"far".to_string()));
    }

    #[tokio::test]
    async fn test_full_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = engine(dir.path(), CacheConfig::default());
        let token = CancellationToken::new();

        assert_eq!(cache.get("nothing", &token).await.unwrap(), None);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.overall.total_misses, 1);
        assert_eq!(stats.overall.total_hits, 0);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = engine(dir.path(), CacheConfig::default());
        let token = CancellationToken::new();

        cache.put("a", vec![1], PutOptions::default(), &token).await.unwrap();
        cache.put("b", vec![2], PutOptions::default(), &token).await.unwrap();

        assert!(cache.remove("a").await.unwrap());
        assert_eq!(cache.get("a", &token).await.unwrap(), None);

        cache.clear().await.unwrap();
        assert!(cache.keys(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prewarm_pulls_remote_content_local() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(StaticRemoteSource::new());
        remote.insert("warm-me", b"toasty".to_vec());

        let cache = engine(dir.path(), CacheConfig::default())
            .with_remote(Arc::clone(&remote) as Arc<dyn RemoteSource>);
        let token = CancellationToken::new();

        cache.prewarm(&["warm-me".to_string()], &token).await;
        assert!(cache
            .keys(Some(CacheTier::Memory))
            .await
            .unwrap()
            .contains(&"warm-me".to_string()));
    }

    struct SuffixRelated;
    impl RelatedKeys for SuffixRelated {
        fn related(&self, key: &str) -> Vec<String> {
            vec![format!("{}-companion", key)]
        }
    }

    #[tokio::test]
    async fn test_prefetch_hook_fills_related_keys() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(StaticRemoteSource::new());
        remote.insert("doc-companion", b"fetched alongside".to_vec());

        let cache = engine(dir.path(), CacheConfig::default())
            .with_remote(Arc::clone(&remote) as Arc<dyn RemoteSource>)
            .with_related_keys(Arc::new(SuffixRelated));
        let token = CancellationToken::new();

        cache
            .put("doc", b"main".to_vec(), PutOptions::default(), &token)
            .await
            .unwrap();
        assert!(cache
            .keys(Some(CacheTier::Memory))
            .await
            .unwrap()
            .contains(&"doc-companion".to_string()));
    }

    #[tokio::test]
    async fn test_cancelled_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = engine(dir.path(), CacheConfig::default());
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            cache.get("k", &token).await,
            Err(CacheError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_integrity_protected_put() {
        let dir = tempfile::tempdir().unwrap();
        let cache = engine(dir.path(), CacheConfig::default());
        let token = CancellationToken::new();

        let options = PutOptions {
            etag: Some(content_hash(b"payload")),
            ..Default::default()
        };
        cache
            .put("k", b"payload".to_vec(), options, &token)
            .await
            .unwrap();

        // A fresh engine reads through disk, which verifies the hash.
        let fresh = engine(dir.path(), CacheConfig::default());
        assert_eq!(
            fresh.get("k", &token).await.unwrap(),
            Some(b"payload".to_vec())
        );
    }
}
