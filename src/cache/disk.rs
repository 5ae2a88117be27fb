//! Disk cache tier
//!
//! Each entry is one file named by the SHA-256 of its key with a
//! `.cache` extension, holding a JSON document: a metadata object and the
//! base64 payload. Corrupt files, expired entries, and integrity
//! mismatches are deleted on read and report as misses. Writes are
//! atomic (temp file + rename) so a cancelled put never leaves a partial
//! entry behind.

use super::entry::CacheEntry;
use super::{CacheError, CacheResult, CompressionKind};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiskMetadata {
    key: String,
    created_at: DateTime<Utc>,
    /// TTL in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<u64>,
    /// Uncompressed content length in bytes.
    size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    compression: CompressionKind,
    encrypted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct DiskDocument {
    metadata: DiskMetadata,
    /// Base64 of the (possibly compressed) payload.
    data: String,
}

/// The L2 tier.
pub struct DiskTier {
    dir: PathBuf,
    max_bytes: u64,
    compression: CompressionKind,
    compression_threshold: usize,
}

impl DiskTier {
    /// Open (or create) the cache directory.
    pub fn new<P: AsRef<Path>>(
        dir: P,
        max_bytes: u64,
        compression: CompressionKind,
        compression_threshold: usize,
    ) -> CacheResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_bytes,
            compression,
            compression_threshold,
        })
    }

    /// Read an entry. Anything unreadable is deleted and reads as a miss.
    pub async fn read(&self, key: &str, now: DateTime<Utc>) -> CacheResult<Option<CacheEntry>> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let document: DiskDocument = match serde_json::from_slice(&raw) {
            Ok(document) => document,
            Err(e) => {
                log::warn!("corrupt cache file {}: {}", path.display(), e);
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
        };

        let meta = document.metadata;
        let packed = match BASE64.decode(document.data.as_bytes()) {
            Ok(packed) => packed,
            Err(e) => {
                log::warn!("undecodable cache payload {}: {}", path.display(), e);
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
        };
        let bytes = match meta.compression.decompress(&packed, meta.size) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("undecompressable cache payload {}: {}", path.display(), e);
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
        };

        let entry = CacheEntry {
            key: meta.key,
            created_at: meta.created_at,
            last_access: now,
            access_count: 0,
            ttl: meta.ttl.map(Duration::from_millis),
            size_bytes: bytes.len(),
            compression: meta.compression,
            etag: meta.etag,
            content_type: meta.content_type,
            encrypted: meta.encrypted,
            bytes,
        };

        if entry.is_expired(now) {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }

        // Integrity: recompute against the recorded hash when present.
        if let Some(expected) = &entry.etag {
            let actual = content_hash(&entry.bytes);
            if actual != *expected {
                log::warn!(
                    "integrity mismatch for `{}`: expected {}, got {}",
                    entry.key,
                    expected,
                    actual
                );
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
        }

        Ok(Some(entry))
    }

    /// Write an entry, compressing payloads above the threshold and
    /// evicting the oldest files until the tier fits its byte bound.
    pub async fn write(&self, entry: &CacheEntry) -> CacheResult<()> {
        let compression = if entry.bytes.len() >= self.compression_threshold {
            self.compression
        } else {
            CompressionKind::None
        };
        let packed = compression.compress(&entry.bytes)?;

        let document = DiskDocument {
            metadata: DiskMetadata {
                key: entry.key.clone(),
                created_at: entry.created_at,
                ttl: entry.ttl.map(|t| t.as_millis() as u64),
                size: entry.bytes.len(),
                etag: entry.etag.clone(),
                content_type: entry.content_type.clone(),
                compression,
                encrypted: entry.encrypted,
            },
            data: BASE64.encode(&packed),
        };
        let raw = serde_json::to_vec(&document)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        self.make_room(raw.len() as u64).await?;

        let path = self.path_for(&entry.key);
        let tmp = path.with_extension("cache.tmp");
        tokio::fs::write(&tmp, &raw).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Remove an entry; returns whether it existed.
    pub async fn remove(&self, key: &str) -> CacheResult<bool> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every entry.
    pub async fn clear(&self) -> CacheResult<()> {
        for path in self.cache_files().await? {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    /// The keys of every entry currently on disk.
    pub async fn keys(&self) -> CacheResult<Vec<String>> {
        let mut keys = Vec::new();
        for path in self.cache_files().await? {
            if let Ok(raw) = tokio::fs::read(&path).await {
                if let Ok(document) = serde_json::from_slice::<DiskDocument>(&raw) {
                    keys.push(document.metadata.key);
                }
            }
        }
        Ok(keys)
    }

    /// Number of entries on disk.
    pub async fn len(&self) -> CacheResult<usize> {
        Ok(self.cache_files().await?.len())
    }

    /// Total bytes on disk.
    pub async fn bytes_used(&self) -> CacheResult<u64> {
        let mut total = 0;
        for path in self.cache_files().await? {
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                total += meta.len();
            }
        }
        Ok(total)
    }

    /// Delete expired entries; returns how many were removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> CacheResult<usize> {
        let mut removed = 0;
        for path in self.cache_files().await? {
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            let expired = match serde_json::from_slice::<DiskDocument>(&raw) {
                Ok(document) => {
                    let meta = document.metadata;
                    match meta.ttl.map(Duration::from_millis) {
                        Some(ttl) => match chrono::Duration::from_std(ttl) {
                            Ok(ttl) => now - meta.created_at >= ttl,
                            Err(_) => false,
                        },
                        None => false,
                    }
                }
                // Corrupt files go too.
                Err(_) => true,
            };
            if expired {
                let _ = tokio::fs::remove_file(&path).await;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.dir
            .join(format!("{}.cache", hex::encode(hasher.finalize())))
    }

    async fn cache_files(&self) -> CacheResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("cache") {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Evict oldest files (by modification time) until `incoming` fits.
    async fn make_room(&self, incoming: u64) -> CacheResult<()> {
        if incoming > self.max_bytes {
            return Ok(());
        }
        let mut files = Vec::new();
        let mut total = 0u64;
        for path in self.cache_files().await? {
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                total += meta.len();
                files.push((path, meta.len(), meta.modified().ok()));
            }
        }
        if total + incoming <= self.max_bytes {
            return Ok(());
        }

        files.sort_by_key(|(_, _, modified)| *modified);
        for (path, len, _) in files {
            if total + incoming <= self.max_bytes {
                break;
            }
            if tokio::fs::remove_file(&path).await.is_ok() {
                log::debug!("disk tier evicted {}", path.display());
                total = total.saturating_sub(len);
            }
        }
        Ok(())
    }
}

/// SHA-256 of content, hex encoded; the form `etag` carries.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(dir: &Path) -> DiskTier {
        DiskTier::new(dir, 1024 * 1024, CompressionKind::Lz4, 64).unwrap()
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(dir.path());

        let entry = CacheEntry::new("greeting".into(), b"hello disk".to_vec(), None);
        tier.write(&entry).await.unwrap();

        let read = tier.read("greeting", Utc::now()).await.unwrap().unwrap();
        assert_eq!(read.bytes, b"hello disk");
        assert_eq!(read.size_bytes, 10);
    }

    #[tokio::test]
    async fn test_large_payload_is_compressed_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(dir.path());

        let payload = b"repetitive payload ".repeat(100);
        let entry = CacheEntry::new("big".into(), payload.clone(), None);
        tier.write(&entry).await.unwrap();

        let read = tier.read("big", Utc::now()).await.unwrap().unwrap();
        assert_eq!(read.bytes, payload);
        assert_eq!(read.compression, CompressionKind::Lz4);
    }

    #[tokio::test]
    async fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(dir.path());
        let entry = CacheEntry::new("layout".into(), b"x".to_vec(), Some(Duration::from_secs(60)));
        tier.write(&entry).await.unwrap();

        let mut hasher = Sha256::new();
        hasher.update(b"layout");
        let expected = dir
            .path()
            .join(format!("{}.cache", hex::encode(hasher.finalize())));
        assert!(expected.exists());

        let raw = std::fs::read_to_string(&expected).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["metadata"]["key"], "layout");
        assert_eq!(value["metadata"]["ttl"], 60_000);
        assert_eq!(value["metadata"]["compression"], "none");
        assert_eq!(value["metadata"]["encrypted"], false);
        assert!(value["metadata"]["createdAt"].is_string());
        assert!(value["data"].is_string());
    }

    #[tokio::test]
    async fn test_corrupt_file_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(dir.path());
        let entry = CacheEntry::new("victim".into(), b"data".to_vec(), None);
        tier.write(&entry).await.unwrap();

        // Clobber the file with invalid JSON.
        let path = dir.path().join(format!("{}.cache", content_hash(b"victim")));
        std::fs::write(&path, b"not json").unwrap();

        assert!(tier.read("victim", Utc::now()).await.unwrap().is_none());
        assert!(!path.exists(), "corrupt file was deleted");
    }

    #[tokio::test]
    async fn test_integrity_mismatch_deletes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(dir.path());

        let mut entry = CacheEntry::new("etagged".into(), b"payload".to_vec(), None);
        entry.etag = Some(content_hash(b"different payload"));
        tier.write(&entry).await.unwrap();

        assert!(tier.read("etagged", Utc::now()).await.unwrap().is_none());
        assert_eq!(tier.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_matching_etag_passes() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(dir.path());

        let mut entry = CacheEntry::new("etagged".into(), b"payload".to_vec(), None);
        entry.etag = Some(content_hash(b"payload"));
        tier.write(&entry).await.unwrap();

        assert!(tier.read("etagged", Utc::now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(dir.path());
        let entry = CacheEntry::new("stale".into(), b"x".to_vec(), Some(Duration::from_secs(30)));
        tier.write(&entry).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(31);
        assert!(tier.read("stale", later).await.unwrap().is_none());
        assert_eq!(tier.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired() {
        let dir = tempfile::tempdir().unwrap();
        let tier = tier(dir.path());
        tier.write(&CacheEntry::new(
            "short".into(),
            b"x".to_vec(),
            Some(Duration::from_secs(10)),
        ))
        .await
        .unwrap();
        tier.write(&CacheEntry::new("forever".into(), b"y".to_vec(), None))
            .await
            .unwrap();

        let later = Utc::now() + chrono::Duration::seconds(60);
        assert_eq!(tier.sweep_expired(later).await.unwrap(), 1);
        assert_eq!(tier.len().await.unwrap(), 1);
    }
}
