use crate::cache::key::storage_key_for;
use crate::cache::{CacheEntry, CacheKey, CacheStats, ResponseCache};
use crate::{EdgeError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionResult;
use sled::Db;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default maximum cache size: 10GB
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

const META_PREFIX: &str = "meta:";
const DATA_PREFIX: &str = "data:";

/// Metadata stored alongside cached bodies
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheMetadata {
    pub key: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub size: usize,
    pub created_at: i64,
    pub accessed_at: i64,
}

/// Sled-based response cache with LRU eviction
///
/// Body and metadata of an entry are written and removed in one transaction,
/// so a reader either finds both or neither and only the first writer of a
/// key is ever stored. Entries are evicted least recently used first once
/// the byte budget is exceeded, down to 90% of the budget.
pub struct SledCache {
    db: Db,
    max_size: u64,
    size: AtomicU64,
}

impl SledCache {
    /// Open (or create) a cache at `path`.
    ///
    /// # Arguments
    /// * `path` - Directory to store the Sled database
    /// * `max_size` - Optional maximum size in bytes (default: 10GB)
    pub fn new(path: impl AsRef<Path>, max_size: Option<u64>) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| EdgeError::Internal(format!("Failed to open Sled database: {}", e)))?;
        Ok(Self::with_db(db, max_size))
    }

    /// A throwaway cache removed when dropped.
    pub fn temporary(max_size: Option<u64>) -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| EdgeError::Internal(format!("Failed to open Sled database: {}", e)))?;
        Ok(Self::with_db(db, max_size))
    }

    fn with_db(db: Db, max_size: Option<u64>) -> Self {
        let cache = Self {
            db,
            max_size: max_size.unwrap_or(DEFAULT_MAX_CACHE_SIZE),
            size: AtomicU64::new(0),
        };
        let existing: u64 = cache.all_metadata().iter().map(|m| m.size as u64).sum();
        cache.size.store(existing, Ordering::Relaxed);
        cache
    }

    fn metadata_key(storage_key: &str) -> String {
        format!("{}{}", META_PREFIX, storage_key)
    }

    fn data_key(storage_key: &str) -> String {
        format!("{}{}", DATA_PREFIX, storage_key)
    }

    fn now() -> i64 {
        time::OffsetDateTime::now_utc().unix_timestamp()
    }

    fn all_metadata(&self) -> Vec<CacheMetadata> {
        self.db
            .scan_prefix(META_PREFIX.as_bytes())
            .filter_map(|item| item.ok())
            .filter_map(|(_, value)| serde_json::from_slice::<CacheMetadata>(&value).ok())
            .collect()
    }

    /// Evict least recently used entries until under size limit
    fn evict_if_needed(&self) -> Result<()> {
        let current = self.size.load(Ordering::Relaxed);
        if current <= self.max_size {
            return Ok(());
        }

        tracing::info!("Cache size {} exceeds limit {}, starting eviction", current, self.max_size);

        let mut entries = self.all_metadata();
        entries.sort_by_key(|e| e.accessed_at);

        let target_to_free = current.saturating_sub(self.max_size * 90 / 100);
        let mut freed = 0u64;
        let mut evicted_count = 0;

        for entry in entries {
            if freed >= target_to_free {
                break;
            }

            let storage_key = storage_key_for(&entry.key);
            let meta_key = Self::metadata_key(&storage_key);
            let data_key = Self::data_key(&storage_key);
            let removed = self
                .db
                .transaction(|tx| -> ConflictableTransactionResult<bool, ()> {
                    let existed = tx.remove(meta_key.as_bytes())?.is_some();
                    tx.remove(data_key.as_bytes())?;
                    Ok(existed)
                })
                .map_err(|e| EdgeError::Internal(format!("Failed to evict cache entry: {:?}", e)))?;
            // Already gone through a concurrent eviction
            if !removed {
                continue;
            }

            freed += entry.size as u64;
            evicted_count += 1;
            self.size.fetch_sub(entry.size as u64, Ordering::Relaxed);

            tracing::debug!(
                "Evicted cache entry: key={}, size={}, idle={}s",
                entry.key,
                entry.size,
                Self::now() - entry.accessed_at
            );
        }

        self.db.flush().map_err(|e| EdgeError::Internal(e.to_string()))?;

        tracing::info!("Eviction complete: freed {} bytes by removing {} entries", freed, evicted_count);

        Ok(())
    }
}

/// Stored metadata with `accessed_at` moved to `now`. Unreadable bytes are
/// left as they are.
fn touch(bytes: &[u8], now: i64) -> Vec<u8> {
    match serde_json::from_slice::<CacheMetadata>(bytes) {
        Ok(mut meta) => {
            meta.accessed_at = now;
            serde_json::to_vec(&meta).unwrap_or_else(|_| bytes.to_vec())
        }
        Err(_) => bytes.to_vec(),
    }
}

#[async_trait::async_trait]
impl ResponseCache for SledCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let storage_key = key.storage_key();
        let meta_key = Self::metadata_key(&storage_key);

        // Touch only an entry that still exists, never recreate an evicted one
        let now = Self::now();
        let touched = self
            .db
            .update_and_fetch(meta_key.as_bytes(), |old| old.map(|bytes| touch(bytes, now)))
            .map_err(|e| EdgeError::Internal(e.to_string()))?;
        let Some(meta_bytes) = touched else {
            return Ok(None);
        };
        let meta: CacheMetadata = serde_json::from_slice(&meta_bytes)
            .map_err(|e| EdgeError::Internal(format!("corrupt cache metadata: {}", e)))?;

        // Evicted between the two reads
        let Some(data) = self.db.get(Self::data_key(&storage_key).as_bytes()).map_err(|e| EdgeError::Internal(e.to_string()))? else {
            return Ok(None);
        };

        Ok(Some(CacheEntry {
            key: meta.key,
            body: Bytes::copy_from_slice(&data),
            headers: meta.headers,
            status: meta.status,
        }))
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let storage_key = storage_key_for(&entry.key);
        let meta_key = Self::metadata_key(&storage_key);

        let now = Self::now();
        let metadata = CacheMetadata {
            key: entry.key.clone(),
            status: entry.status,
            headers: entry.headers.clone(),
            size: entry.body.len(),
            created_at: now,
            accessed_at: now,
        };
        let meta_bytes = serde_json::to_vec(&metadata)
            .map_err(|e| EdgeError::Internal(format!("Failed to encode cache metadata: {}", e)))?;

        let data_key = Self::data_key(&storage_key);
        let inserted = self
            .db
            .transaction(|tx| -> ConflictableTransactionResult<bool, ()> {
                if tx.get(meta_key.as_bytes())?.is_some() {
                    return Ok(false);
                }
                tx.insert(data_key.as_bytes(), entry.body.as_ref())?;
                tx.insert(meta_key.as_bytes(), meta_bytes.as_slice())?;
                Ok(true)
            })
            .map_err(|e| EdgeError::Internal(format!("Failed to write cache entry: {:?}", e)))?;
        if !inserted {
            return Ok(());
        }
        self.size.fetch_add(entry.body.len() as u64, Ordering::Relaxed);

        self.db.flush_async().await.map_err(|e| EdgeError::Internal(e.to_string()))?;

        self.evict_if_needed()
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            total_size_bytes: self.size.load(Ordering::Relaxed),
            entry_count: self.db.scan_prefix(META_PREFIX.as_bytes()).count(),
            max_size_bytes: self.max_size,
        }
    }
}
