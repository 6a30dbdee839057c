pub mod key;
pub mod memory;
pub mod policy;
pub mod sled_cache;

pub use key::{CacheKey, Route};
pub use memory::MemoryCache;
pub use policy::CachePolicy;
pub use sled_cache::SledCache;

use crate::Result;
use axum::http::header;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;

/// A complete stored response. Never mutated once created: a different
/// parameter combination gets a different key instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Canonical cache key this entry was computed for.
    pub key: String,
    pub body: Bytes,
    /// Lowercase header names.
    pub headers: BTreeMap<String, String>,
    pub status: u16,
}

impl CacheEntry {
    /// A 200 entry carrying the immutable cache policy and an ETag derived
    /// from the key. `content_type` is omitted from the headers when `None`.
    pub fn ok(key: &CacheKey, body: Bytes, content_type: Option<&str>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(
            header::CACHE_CONTROL.as_str().to_string(),
            CachePolicy::immutable().header_value(),
        );
        headers.insert(header::ETAG.as_str().to_string(), etag_for_key(&key.storage_key()));
        if let Some(ct) = content_type {
            headers.insert(header::CONTENT_TYPE.as_str().to_string(), ct.to_string());
        }
        Self { key: key.canonical().to_string(), body, headers, status: 200 }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    pub total_size_bytes: u64,
    pub entry_count: usize,
    pub max_size_bytes: u64,
}

/// Storage for complete responses keyed by canonical cache key.
///
/// `put` must be atomic per key: a concurrent `get` sees either nothing or
/// the whole entry. When two writers race on a cold key the first stored
/// entry wins; both computed identical bytes anyway.
#[async_trait::async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    async fn put(&self, entry: &CacheEntry) -> Result<()>;

    async fn stats(&self) -> CacheStats;
}

/// Generate an ETag from a storage key
pub fn etag_for_key(key: &str) -> String {
    format!("\"{}\"", key)
}
