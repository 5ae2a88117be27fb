//! In-memory cache tier
//!
//! Bounded by total bytes and entry count. Before an insert, entries are
//! evicted under the configured policy until the newcomer fits; at
//! exactly the byte bound nothing is evicted. The tier is not itself
//! synchronized; the engine owns it behind a lock.

use super::entry::CacheEntry;
use super::{CacheError, CacheResult, EvictionPolicy};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::{HashMap, VecDeque};

/// The L1 tier.
pub struct MemoryTier {
    entries: HashMap<String, CacheEntry>,
    /// Access recency; front is least recently used.
    access_order: VecDeque<String>,
    /// Insertion recency; front is first inserted.
    insertion_order: VecDeque<String>,
    current_bytes: u64,
    max_bytes: u64,
    max_entries: usize,
    policy: EvictionPolicy,
    evictions: u64,
}

impl MemoryTier {
    /// Empty tier with the given bounds and policy.
    pub fn new(max_bytes: u64, max_entries: usize, policy: EvictionPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            access_order: VecDeque::new(),
            insertion_order: VecDeque::new(),
            current_bytes: 0,
            max_bytes,
            max_entries: max_entries.max(1),
            policy,
            evictions: 0,
        }
    }

    /// Read an entry; refreshes recency and access count. An expired
    /// entry is removed and reads as a miss.
    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return None,
        };
        if expired {
            self.remove(key);
            return None;
        }

        let entry = self.entries.get_mut(key)?;
        entry.touch(now);
        promote(&mut self.access_order, key);
        Some(entry.clone())
    }

    /// Read without touching recency or counters.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Insert an entry, evicting under the policy until it fits. With
    /// `fail_when_full`, a necessary eviction becomes a `CacheFull` error
    /// instead.
    pub fn insert(&mut self, entry: CacheEntry, fail_when_full: bool) -> CacheResult<()> {
        let new_size = entry.size_bytes as u64;
        if new_size > self.max_bytes {
            log::debug!(
                "entry `{}` ({} bytes) exceeds the memory tier bound, not cached",
                entry.key,
                new_size
            );
            return Ok(());
        }

        // Replacing an existing entry frees its budget first.
        if self.entries.contains_key(&entry.key) {
            self.remove(&entry.key);
        }

        while self.current_bytes + new_size > self.max_bytes
            || self.entries.len() + 1 > self.max_entries
        {
            if fail_when_full {
                return Err(CacheError::CacheFull(entry.key));
            }
            match self.evict_one() {
                Some(victim) => log::trace!("evicted `{}`", victim),
                None => break,
            }
        }

        self.current_bytes += new_size;
        self.access_order.push_back(entry.key.clone());
        self.insertion_order.push_back(entry.key.clone());
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    /// Remove an entry.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes as u64);
        self.access_order.retain(|k| k != key);
        self.insertion_order.retain(|k| k != key);
        Some(entry)
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_order.clear();
        self.insertion_order.clear();
        self.current_bytes = 0;
    }

    /// Remove every expired entry; returns how many were dropped.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Current keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tier is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes currently held.
    pub fn bytes_used(&self) -> u64 {
        self.current_bytes
    }

    /// Total evictions so far.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    fn evict_one(&mut self) -> Option<String> {
        let victim = match self.policy {
            EvictionPolicy::Lru => self.access_order.front().cloned(),
            EvictionPolicy::Fifo => self.insertion_order.front().cloned(),
            EvictionPolicy::Lfu => {
                // Lowest access count; ties break by recency (LRU).
                self.access_order
                    .iter()
                    .min_by_key(|k| self.entries.get(*k).map(|e| e.access_count))
                    .cloned()
            }
            EvictionPolicy::Ttl => {
                let now = Utc::now();
                let earliest_expired = self
                    .entries
                    .values()
                    .filter(|e| e.is_expired(now))
                    .min_by_key(|e| e.expires_at())
                    .map(|e| e.key.clone());
                earliest_expired.or_else(|| self.access_order.front().cloned())
            }
            EvictionPolicy::Random => {
                if self.entries.is_empty() {
                    None
                } else {
                    let index = rand::thread_rng().gen_range(0..self.access_order.len());
                    self.access_order.get(index).cloned()
                }
            }
        }?;

        self.remove(&victim);
        self.evictions += 1;
        Some(victim)
    }
}

/// Move a key to the most-recently-used end.
fn promote(order: &mut VecDeque<String>, key: &str) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        order.remove(pos);
        order.push_back(key.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, size: usize) -> CacheEntry {
        CacheEntry::new(key.to_string(), vec![0u8; size], None)
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut tier = MemoryTier::new(1024, 2, EvictionPolicy::Lru);
        tier.insert(entry("a", 1), false).unwrap();
        tier.insert(entry("b", 1), false).unwrap();
        // Touch `a` so `b` becomes the LRU victim.
        tier.get("a", Utc::now()).unwrap();
        tier.insert(entry("c", 1), false).unwrap();

        assert!(tier.peek("b").is_none());
        assert!(tier.peek("a").is_some());
        assert!(tier.peek("c").is_some());
        assert_eq!(tier.evictions(), 1);
    }

    #[test]
    fn test_fifo_eviction_ignores_access() {
        let mut tier = MemoryTier::new(1024, 2, EvictionPolicy::Fifo);
        tier.insert(entry("a", 1), false).unwrap();
        tier.insert(entry("b", 1), false).unwrap();
        tier.get("a", Utc::now()).unwrap();
        tier.insert(entry("c", 1), false).unwrap();

        // `a` was inserted first, so it goes despite the recent read.
        assert!(tier.peek("a").is_none());
        assert!(tier.peek("b").is_some());
    }

    #[test]
    fn test_lfu_evicts_least_used() {
        let mut tier = MemoryTier::new(1024, 2, EvictionPolicy::Lfu);
        tier.insert(entry("a", 1), false).unwrap();
        tier.insert(entry("b", 1), false).unwrap();
        let now = Utc::now();
        tier.get("a", now).unwrap();
        tier.get("a", now).unwrap();
        tier.get("b", now).unwrap();
        tier.insert(entry("c", 1), false).unwrap();

        assert!(tier.peek("b").is_none());
        assert!(tier.peek("a").is_some());
    }

    #[test]
    fn test_byte_bound_boundary() {
        let mut tier = MemoryTier::new(10, 100, EvictionPolicy::Lru);
        tier.insert(entry("a", 4), false).unwrap();
        // Exactly at the bound: nothing evicts.
        tier.insert(entry("b", 6), false).unwrap();
        assert_eq!(tier.len(), 2);
        assert_eq!(tier.evictions(), 0);

        // One byte over: the LRU entry goes.
        tier.insert(entry("c", 1), false).unwrap();
        assert_eq!(tier.evictions(), 1);
        assert!(tier.peek("a").is_none());
    }

    #[test]
    fn test_fail_when_full() {
        let mut tier = MemoryTier::new(1024, 1, EvictionPolicy::Lru);
        tier.insert(entry("a", 1), true).unwrap();
        let result = tier.insert(entry("b", 1), true);
        assert!(matches!(result, Err(CacheError::CacheFull(_))));
    }

    #[test]
    fn test_expired_entry_reads_as_miss() {
        let mut tier = MemoryTier::new(1024, 10, EvictionPolicy::Lru);
        let mut e = entry("a", 1);
        e.ttl = Some(std::time::Duration::from_secs(1));
        tier.insert(e, false).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(2);
        assert!(tier.get("a", later).is_none());
        assert!(tier.peek("a").is_none(), "expired entry was removed");
    }

    #[test]
    fn test_replacement_adjusts_byte_budget() {
        let mut tier = MemoryTier::new(10, 10, EvictionPolicy::Lru);
        tier.insert(entry("a", 8), false).unwrap();
        tier.insert(entry("a", 2), false).unwrap();
        assert_eq!(tier.bytes_used(), 2);
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_access_count_after_first_read() {
        let mut tier = MemoryTier::new(1024, 10, EvictionPolicy::Lru);
        tier.insert(entry("a", 1), false).unwrap();
        let read = tier.get("a", Utc::now()).unwrap();
        assert!(read.access_count >= 1);
    }
}
