use crate::cache::{CacheEntry, CacheKey, CacheStats, ResponseCache};
use crate::cache::key::storage_key_for;
use crate::Result;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Default in-memory budget: 512MB
pub const DEFAULT_MAX_MEMORY_SIZE: u64 = 512 * 1024 * 1024;

/// In-process response cache.
///
/// Whole entries are swapped in under the write lock, so readers never see a
/// partial entry. When the byte budget is exceeded the oldest insertions are
/// dropped first.
pub struct MemoryCache {
    inner: RwLock<Inner>,
    max_size: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
    total_size: u64,
}

impl MemoryCache {
    pub fn new(max_size: Option<u64>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_size: max_size.unwrap_or(DEFAULT_MAX_MEMORY_SIZE),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait::async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let inner = self.inner.read().await;
        Ok(inner.entries.get(&key.storage_key()).cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let storage_key = storage_key_for(&entry.key);
        let size = entry.body.len() as u64;

        if size > self.max_size {
            tracing::warn!("Not caching {}: {} bytes exceeds budget {}", entry.key, size, self.max_size);
            return Ok(());
        }

        let mut inner = self.inner.write().await;
        if inner.entries.contains_key(&storage_key) {
            return Ok(());
        }

        while inner.total_size + size > self.max_size {
            let Some(oldest) = inner.order.pop_front() else { break };
            if let Some(evicted) = inner.entries.remove(&oldest) {
                inner.total_size -= evicted.body.len() as u64;
                tracing::debug!("Evicted cache entry: key={}", evicted.key);
            }
        }

        inner.entries.insert(storage_key.clone(), entry.clone());
        inner.order.push_back(storage_key);
        inner.total_size += size;
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;
        CacheStats {
            total_size_bytes: inner.total_size,
            entry_count: inner.entries.len(),
            max_size_bytes: self.max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Route;
    use bytes::Bytes;

    fn entry(resource: &str, body: &'static [u8]) -> (CacheKey, CacheEntry) {
        let key = CacheKey::new(Route::PublicFile, resource, &[]).unwrap();
        let entry = CacheEntry::ok(&key, Bytes::from_static(body), None);
        (key, entry)
    }

    #[tokio::test]
    async fn get_after_put() {
        let cache = MemoryCache::default();
        let (key, e) = entry("a", b"abc");
        assert_eq!(cache.get(&key).await.unwrap(), None);

        cache.put(&e).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(e));
    }

    #[tokio::test]
    async fn first_writer_wins() {
        let cache = MemoryCache::default();
        let (key, first) = entry("a", b"first");
        let mut second = first.clone();
        second.body = Bytes::from_static(b"second");

        cache.put(&first).await.unwrap();
        cache.put(&second).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap().unwrap().body, Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn evicts_oldest_over_budget() {
        let cache = MemoryCache::new(Some(8));
        let (a, ea) = entry("a", b"aaaa");
        let (b, eb) = entry("b", b"bbbb");
        let (c, ec) = entry("c", b"cccc");

        cache.put(&ea).await.unwrap();
        cache.put(&eb).await.unwrap();
        cache.put(&ec).await.unwrap();

        assert!(cache.get(&a).await.unwrap().is_none());
        assert!(cache.get(&b).await.unwrap().is_some());
        assert!(cache.get(&c).await.unwrap().is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.total_size_bytes, 8);
    }

    #[tokio::test]
    async fn oversized_entry_is_skipped() {
        let cache = MemoryCache::new(Some(2));
        let (key, e) = entry("big", b"too big");
        cache.put(&e).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
    }
}
