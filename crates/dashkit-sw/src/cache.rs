//! Cache storage abstraction and the in-memory store.
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache (one generation, e.g. "trading-dashboard-v1.0.0")
//!             └── RequestKey → CacheEntry
//! ```
//!
//! Every operation is atomic for a single entry. Concurrent `put`s to the same
//! key leave whichever write landed last.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::Result;
use crate::request::{CacheEntry, FetchResponse, RequestKey};

/// One named cache generation.
#[async_trait]
pub trait Cache: Send + Sync + fmt::Debug {
    /// Cache name.
    fn name(&self) -> &str;

    /// Look up a stored snapshot.
    async fn match_request(&self, key: &RequestKey) -> Result<Option<CacheEntry>>;

    /// Store a snapshot of `response`, replacing any previous entry for `key`.
    async fn put(&self, key: RequestKey, response: &FetchResponse) -> Result<()>;

    /// Store several snapshots at once. Stores that persist may write them in
    /// one batch.
    async fn put_all(&self, entries: Vec<(RequestKey, FetchResponse)>) -> Result<()> {
        for (key, response) in entries {
            self.put(key, &response).await?;
        }
        Ok(())
    }

    /// Remove an entry. Returns whether it existed.
    async fn delete(&self, key: &RequestKey) -> Result<bool>;

    /// All stored keys, sorted.
    async fn keys(&self) -> Result<Vec<RequestKey>>;
}

/// The set of named cache generations.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>>;

    /// Look up an existing cache without creating it.
    async fn get(&self, name: &str) -> Result<Option<Arc<dyn Cache>>>;

    /// Check if a cache exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Delete a cache. Handles already opened stay usable but are detached.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// All cache names, sorted.
    async fn keys(&self) -> Result<Vec<String>>;
}

// ==================== Memory ====================

/// In-memory cache generation.
#[derive(Debug)]
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<RequestKey, CacheEntry>>,
}

impl MemoryCache {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, key: &RequestKey) -> Result<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: RequestKey, response: &FetchResponse) -> Result<()> {
        trace!(cache = %self.name, %key, status = response.status, "put");
        let entry = CacheEntry::snapshot(&key, response);
        self.entries.write().await.insert(key, entry);
        Ok(())
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<RequestKey>> {
        let mut keys: Vec<RequestKey> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// In-memory cache storage.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Arc<MemoryCache>>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>> {
        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCache::new(name)));
        Ok(Arc::clone(cache) as Arc<dyn Cache>)
    }

    async fn get(&self, name: &str) -> Result<Option<Arc<dyn Cache>>> {
        Ok(self
            .caches
            .read()
            .await
            .get(name)
            .map(|cache| Arc::clone(cache) as Arc<dyn Cache>))
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn key(path: &str) -> RequestKey {
        RequestKey::get(&Url::parse("https://example.com").unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn test_put_and_match() {
        let cache = MemoryCache::new("v1");
        cache
            .put(key("/style.css"), &FetchResponse::new(200, "body{}"))
            .await
            .unwrap();

        let hit = cache.match_request(&key("/style.css")).await.unwrap();
        assert_eq!(hit.unwrap().body.as_ref(), b"body{}");
        assert!(cache.match_request(&key("/other.css")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let cache = MemoryCache::new("v1");
        cache.put(key("/app.js"), &FetchResponse::new(200, "old")).await.unwrap();
        cache.put(key("/app.js"), &FetchResponse::new(200, "new")).await.unwrap();

        assert_eq!(cache.keys().await.unwrap().len(), 1);
        let hit = cache.match_request(&key("/app.js")).await.unwrap().unwrap();
        assert_eq!(hit.body.as_ref(), b"new");
    }

    #[tokio::test]
    async fn test_cache_delete() {
        let cache = MemoryCache::new("v1");
        cache.put(key("/a.png"), &FetchResponse::new(200, "")).await.unwrap();
        assert!(cache.delete(&key("/a.png")).await.unwrap());
        assert!(!cache.delete(&key("/a.png")).await.unwrap());
    }

    #[tokio::test]
    async fn test_storage_open_has_delete() {
        let storage = MemoryCacheStorage::new();
        assert!(!storage.has("v1").await.unwrap());

        storage.open("v1").await.unwrap();
        storage.open("v2").await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["v1", "v2"]);

        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.has("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_returns_same_generation() {
        let storage = MemoryCacheStorage::new();
        let first = storage.open("v1").await.unwrap();
        first.put(key("/index.html"), &FetchResponse::new(200, "<html>")).await.unwrap();

        let second = storage.open("v1").await.unwrap();
        assert!(second.match_request(&key("/index.html")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_does_not_create() {
        let storage = MemoryCacheStorage::new();
        assert!(storage.get("v1").await.unwrap().is_none());
        assert!(storage.keys().await.unwrap().is_empty());

        storage.open("v1").await.unwrap();
        let cache = storage.get("v1").await.unwrap().unwrap();
        assert_eq!(cache.name(), "v1");
    }

    #[tokio::test]
    async fn test_put_all_stores_every_entry() {
        let cache = MemoryCache::new("v1");
        cache
            .put_all(vec![
                (key("/"), FetchResponse::new(200, "home")),
                (key("/app.js"), FetchResponse::new(200, "js")),
            ])
            .await
            .unwrap();
        assert_eq!(cache.keys().await.unwrap().len(), 2);
    }
}
