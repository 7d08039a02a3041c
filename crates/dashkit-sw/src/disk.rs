//! Persistent cache storage on the local filesystem.
//!
//! Each generation lives in `<root>/<url-encoded name>.json`. Writes go to a
//! temporary file first and are renamed into place, so a crash mid-write
//! leaves the previous snapshot intact.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::cache::{Cache, CacheStorage};
use crate::error::{Result, ServiceWorkerError};
use crate::request::{CacheEntry, FetchResponse, RequestKey};

const EXTENSION: &str = "json";

/// On-disk layout of one generation.
#[derive(Debug, Serialize, Deserialize)]
struct GenerationFile {
    name: String,
    entries: Vec<CacheEntry>,
}

#[derive(Debug)]
struct DiskState {
    entries: HashMap<RequestKey, CacheEntry>,
    /// Set once the generation has been deleted from storage.
    detached: bool,
}

/// A cache generation backed by one JSON file.
#[derive(Debug)]
pub struct DiskCache {
    name: String,
    path: PathBuf,
    state: Mutex<DiskState>,
}

impl DiskCache {
    fn with_entries(name: &str, path: PathBuf, entries: HashMap<RequestKey, CacheEntry>) -> Self {
        Self {
            name: name.to_string(),
            path,
            state: Mutex::new(DiskState {
                entries,
                detached: false,
            }),
        }
    }

    /// Read a stored generation. `None` when it has no file.
    async fn read(name: &str, path: PathBuf) -> Result<Option<Self>> {
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: GenerationFile = serde_json::from_slice(&bytes)?;
        let entries = file.entries.into_iter().map(|e| (e.key(), e)).collect();
        Ok(Some(Self::with_entries(name, path, entries)))
    }

    /// Start an empty generation and write its file.
    async fn create(name: &str, path: PathBuf) -> Result<Self> {
        let cache = Self::with_entries(name, path, HashMap::new());
        {
            let state = cache.state.lock().await;
            cache.persist(&state).await?;
        }
        debug!(cache = %name, "generation created");
        Ok(cache)
    }

    async fn persist(&self, state: &DiskState) -> Result<()> {
        if state.detached {
            return Ok(());
        }
        let mut entries: Vec<CacheEntry> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.url.cmp(&b.url).then_with(|| a.method.cmp(&b.method)));
        let file = GenerationFile {
            name: self.name.clone(),
            entries,
        };
        let json = serde_json::to_vec(&file)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json).await?;
        fs::rename(&tmp, &self.path).await?;
        trace!(cache = %self.name, bytes = json.len(), "generation persisted");
        Ok(())
    }

    async fn detach(&self) {
        self.state.lock().await.detached = true;
    }
}

#[async_trait]
impl Cache for DiskCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(&self, key: &RequestKey) -> Result<Option<CacheEntry>> {
        Ok(self.state.lock().await.entries.get(key).cloned())
    }

    async fn put(&self, key: RequestKey, response: &FetchResponse) -> Result<()> {
        let mut state = self.state.lock().await;
        let entry = CacheEntry::snapshot(&key, response);
        state.entries.insert(key, entry);
        self.persist(&state).await
    }

    async fn put_all(&self, entries: Vec<(RequestKey, FetchResponse)>) -> Result<()> {
        let mut state = self.state.lock().await;
        for (key, response) in entries {
            let entry = CacheEntry::snapshot(&key, &response);
            state.entries.insert(key, entry);
        }
        self.persist(&state).await
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool> {
        let mut state = self.state.lock().await;
        let removed = state.entries.remove(key).is_some();
        if removed {
            self.persist(&state).await?;
        }
        Ok(removed)
    }

    async fn keys(&self) -> Result<Vec<RequestKey>> {
        let mut keys: Vec<RequestKey> = self.state.lock().await.entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Cache storage rooted at a directory.
#[derive(Debug)]
pub struct DiskCacheStorage {
    root: PathBuf,
    open: Mutex<HashMap<String, Arc<DiskCache>>>,
}

impl DiskCacheStorage {
    /// Create storage under `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "disk cache storage ready");
        Ok(Self {
            root,
            open: Mutex::new(HashMap::new()),
        })
    }

    /// Storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(ServiceWorkerError::cache("cache name must not be empty"));
        }
        Ok(self
            .root
            .join(format!("{}.{}", urlencoding::encode(name), EXTENSION)))
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>> {
        let mut open = self.open.lock().await;
        if let Some(cache) = open.get(name) {
            return Ok(Arc::clone(cache) as Arc<dyn Cache>);
        }
        let path = self.path_for(name)?;
        let cache = match DiskCache::read(name, path.clone()).await? {
            Some(cache) => cache,
            None => DiskCache::create(name, path).await?,
        };
        let cache = Arc::new(cache);
        open.insert(name.to_string(), Arc::clone(&cache));
        Ok(cache as Arc<dyn Cache>)
    }

    async fn get(&self, name: &str) -> Result<Option<Arc<dyn Cache>>> {
        let mut open = self.open.lock().await;
        if let Some(cache) = open.get(name) {
            return Ok(Some(Arc::clone(cache) as Arc<dyn Cache>));
        }
        let Some(cache) = DiskCache::read(name, self.path_for(name)?).await? else {
            return Ok(None);
        };
        let cache = Arc::new(cache);
        open.insert(name.to_string(), Arc::clone(&cache));
        Ok(Some(cache as Arc<dyn Cache>))
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(fs::try_exists(self.path_for(name)?).await?)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut open = self.open.lock().await;
        if let Some(cache) = open.remove(name) {
            cache.detach().await;
        }
        match fs::remove_file(self.path_for(name)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match urlencoding::decode(stem) {
                Ok(name) => names.push(name.into_owned()),
                Err(e) => warn!(file = %path.display(), error = %e, "skipping undecodable cache file"),
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn key(path: &str) -> RequestKey {
        RequestKey::get(&Url::parse("http://localhost:3000").unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();

        assert!(!storage.has("dash-v1").await.unwrap());
        storage.open("dash-v1").await.unwrap();
        assert!(storage.has("dash-v1").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["dash-v1"]);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
            let cache = storage.open("dash-v1").await.unwrap();
            cache
                .put(key("/icon-192.png"), &FetchResponse::new(200, vec![1u8, 2, 3]))
                .await
                .unwrap();
        }

        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        let cache = storage.open("dash-v1").await.unwrap();
        let entry = cache.match_request(&key("/icon-192.png")).await.unwrap().unwrap();
        assert_eq!(entry.body.as_ref(), &[1u8, 2, 3]);
        assert_eq!(entry.status, 200);
    }

    #[tokio::test]
    async fn test_names_with_separators_are_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        storage.open("odd/name v1").await.unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["odd/name v1"]);
        assert!(storage.path_for("odd/name v1").unwrap().starts_with(dir.path()));
    }

    #[tokio::test]
    async fn test_delete_detaches_open_handle() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        let cache = storage.open("dash-v1").await.unwrap();

        assert!(storage.delete("dash-v1").await.unwrap());
        cache.put(key("/late.png"), &FetchResponse::new(200, "")).await.unwrap();

        assert!(!storage.has("dash-v1").await.unwrap());
        assert!(storage.keys().await.unwrap().is_empty());
        assert!(!storage.delete("dash-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();

        assert!(storage.get("dash-v1").await.unwrap().is_none());
        assert!(storage.keys().await.unwrap().is_empty());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_get_loads_existing_generation() {
        let dir = tempfile::tempdir().unwrap();
        DiskCacheStorage::new(dir.path())
            .await
            .unwrap()
            .open("dash-v1")
            .await
            .unwrap()
            .put(key("/"), &FetchResponse::new(200, "home"))
            .await
            .unwrap();

        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        let cache = storage.get("dash-v1").await.unwrap().unwrap();
        assert!(cache.match_request(&key("/")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_open_existing_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let file = GenerationFile {
            name: "dash-v1".to_string(),
            entries: vec![CacheEntry::snapshot(&key("/"), &FetchResponse::new(200, "home"))],
        };
        let pretty = serde_json::to_string_pretty(&file).unwrap();
        let path = dir.path().join("dash-v1.json");
        std::fs::write(&path, &pretty).unwrap();

        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        let cache = storage.open("dash-v1").await.unwrap();
        assert_eq!(cache.keys().await.unwrap().len(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), pretty);
    }

    #[tokio::test]
    async fn test_put_all_persists_batch() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
            let cache = storage.open("dash-v1").await.unwrap();
            cache
                .put_all(vec![
                    (key("/"), FetchResponse::new(200, "home")),
                    (key("/app.js"), FetchResponse::new(200, "js")),
                    (key("/icon-192.png"), FetchResponse::new(200, vec![0u8; 4])),
                ])
                .await
                .unwrap();
        }

        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        let cache = storage.get("dash-v1").await.unwrap().unwrap();
        assert_eq!(cache.keys().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();
        let storage = DiskCacheStorage::new(dir.path()).await.unwrap();
        storage.open("dash-v2").await.unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["dash-v2"]);
    }
}
