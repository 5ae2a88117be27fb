//! Cache entries
//!
//! An entry owns its bytes exclusively within a tier; promotion between
//! tiers copies them. `bytes` always holds the uncompressed content;
//! the `compression` field records how the disk tier stored it.

use super::CompressionKind;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Options accepted by `put`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Entry lifetime; the engine default applies when absent.
    pub ttl: Option<Duration>,
    /// Expected SHA-256 of the content, verified on disk reads.
    pub etag: Option<String>,
    /// MIME type, carried as metadata.
    pub content_type: Option<String>,
}

/// A cached entry with its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The cache key.
    pub key: String,
    /// Uncompressed content.
    pub bytes: Vec<u8>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last read time; never earlier than `created_at`.
    pub last_access: DateTime<Utc>,
    /// Number of reads.
    pub access_count: u64,
    /// Lifetime, when bounded.
    pub ttl: Option<Duration>,
    /// Content length; always equals `bytes.len()`.
    pub size_bytes: usize,
    /// How the disk tier stored the payload.
    pub compression: CompressionKind,
    /// Expected content hash, when integrity is verified.
    pub etag: Option<String>,
    /// MIME type metadata.
    pub content_type: Option<String>,
    /// Whether the payload is encrypted at rest.
    pub encrypted: bool,
}

impl CacheEntry {
    /// A fresh entry created now.
    pub fn new(key: String, bytes: Vec<u8>, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        let size_bytes = bytes.len();
        Self {
            key,
            bytes,
            created_at: now,
            last_access: now,
            access_count: 0,
            ttl,
            size_bytes,
            compression: CompressionKind::None,
            etag: None,
            content_type: None,
            encrypted: false,
        }
    }

    /// Apply put options.
    pub fn with_options(mut self, options: PutOptions, default_ttl: Option<Duration>) -> Self {
        self.ttl = options.ttl.or(default_ttl);
        self.etag = options.etag;
        self.content_type = options.content_type;
        self
    }

    /// Whether the entry has expired. An entry is expired exactly at
    /// `created_at + ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => match ChronoDuration::from_std(ttl) {
                Ok(ttl) => now - self.created_at >= ttl,
                Err(_) => false,
            },
            None => false,
        }
    }

    /// When the entry expires, if it does.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = ChronoDuration::from_std(self.ttl?).ok()?;
        Some(self.created_at + ttl)
    }

    /// Record a read.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_access = now;
        self.access_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_matches_bytes() {
        let entry = CacheEntry::new("k".into(), vec![1, 2, 3], None);
        assert_eq!(entry.size_bytes, entry.bytes.len());
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let mut entry = CacheEntry::new("k".into(), vec![0], Some(Duration::from_secs(60)));
        let created = entry.created_at;
        entry.last_access = created;

        let just_before = created + ChronoDuration::seconds(59);
        let exactly = created + ChronoDuration::seconds(60);
        assert!(!entry.is_expired(just_before));
        assert!(entry.is_expired(exactly));
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let entry = CacheEntry::new("k".into(), vec![0], None);
        assert!(!entry.is_expired(Utc::now() + ChronoDuration::days(3650)));
    }

    #[test]
    fn test_touch_maintains_invariants() {
        let mut entry = CacheEntry::new("k".into(), vec![0], None);
        let later = Utc::now() + ChronoDuration::seconds(5);
        entry.touch(later);
        assert_eq!(entry.access_count, 1);
        assert!(entry.last_access >= entry.created_at);
    }
}
