//! The offline cache router: install, activate, and fetch handling for one
//! worker version.

use std::fmt;
use std::sync::Arc;

use futures::future::try_join_all;
use http::Method;
use tracing::{debug, info, instrument, warn};

use crate::cache::{Cache, CacheStorage};
use crate::config::RouterConfig;
use crate::error::{Result, ServiceWorkerError};
use crate::fetch::Fetcher;
use crate::request::{FetchRequest, FetchResponse, RequestKey};
use crate::strategy::{CacheStrategy, ResourceKind};

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Generation that was populated.
    pub cache_name: String,
    /// Keys stored, in tracked-asset order.
    pub cached: Vec<RequestKey>,
    /// Activate without waiting for controlled pages to close.
    pub skip_waiting: bool,
}

/// Result of an activation sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
    /// Generation that is now current.
    pub cache_name: String,
    /// Generations removed by the sweep.
    pub deleted: Vec<String>,
    /// Take control of open pages now.
    pub claim_clients: bool,
}

/// What the router decided for a fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Not intercepted; the host performs the request natively.
    Passthrough,
    /// Respond with this response.
    Respond(FetchResponse),
    /// Network failed and nothing was cached; surfaces as a failed load.
    NoMatch,
}

impl FetchOutcome {
    /// The response, if the router produced one.
    pub fn response(&self) -> Option<&FetchResponse> {
        match self {
            Self::Respond(response) => Some(response),
            _ => None,
        }
    }
}

/// Request-interception policy for one cache generation.
pub struct CacheRouter {
    config: Arc<RouterConfig>,
    cache_name: String,
    caches: Arc<dyn CacheStorage>,
    network: Arc<dyn Fetcher>,
}

impl fmt::Debug for CacheRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRouter")
            .field("cache_name", &self.cache_name)
            .field("origin", &self.config.origin.as_str())
            .finish_non_exhaustive()
    }
}

impl CacheRouter {
    /// Create a router for `config`, storing into `caches` and fetching
    /// through `network`.
    pub fn new(
        config: RouterConfig,
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn Fetcher>,
    ) -> Self {
        let cache_name = config.cache_name();
        Self {
            config: Arc::new(config),
            cache_name,
            caches,
            network,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Name of the generation this router owns.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Pre-cache every tracked asset.
    ///
    /// All assets are fetched before any is stored. If one fetch is rejected
    /// or returns a non-2xx status the install fails, and a generation created
    /// by this install is removed again.
    #[instrument(skip(self), fields(cache = %self.cache_name))]
    pub async fn install(&self) -> Result<InstallReport> {
        let existed = self.caches.has(&self.cache_name).await?;
        let cache = self.caches.open(&self.cache_name).await?;

        match self.precache(cache.as_ref()).await {
            Ok(cached) => {
                info!(assets = cached.len(), "install complete");
                Ok(InstallReport {
                    cache_name: self.cache_name.clone(),
                    cached,
                    skip_waiting: self.config.skip_waiting,
                })
            }
            Err(e) => {
                warn!(error = %e, "install failed");
                if !existed {
                    if let Err(cleanup) = self.caches.delete(&self.cache_name).await {
                        warn!(error = %cleanup, "could not remove partial generation");
                    }
                }
                Err(e)
            }
        }
    }

    async fn precache(&self, cache: &dyn Cache) -> Result<Vec<RequestKey>> {
        let requests = self
            .config
            .tracked_asset_urls()?
            .into_iter()
            .map(FetchRequest::get);

        let fetched = try_join_all(requests.map(|request| async move {
            let response = self.network.fetch(&request).await.map_err(|e| {
                ServiceWorkerError::InstallFailed {
                    asset: request.url.to_string(),
                    reason: e.to_string(),
                }
            })?;
            if !response.ok() {
                return Err(ServiceWorkerError::InstallFailed {
                    asset: request.url.to_string(),
                    reason: format!("HTTP {}", response.status),
                });
            }
            Ok::<_, ServiceWorkerError>((request.key(), response))
        }))
        .await?;

        let cached = fetched.iter().map(|(key, _)| key.clone()).collect();
        cache.put_all(fetched).await?;
        Ok(cached)
    }

    /// Delete every generation except this router's.
    #[instrument(skip(self), fields(cache = %self.cache_name))]
    pub async fn activate(&self) -> Result<ActivateReport> {
        let mut deleted = Vec::new();
        for name in self.caches.keys().await? {
            if name != self.cache_name {
                self.caches.delete(&name).await?;
                info!(stale = %name, "deleted stale generation");
                deleted.push(name);
            }
        }

        Ok(ActivateReport {
            cache_name: self.cache_name.clone(),
            deleted,
            claim_clients: self.config.claim_clients,
        })
    }

    /// Route one request.
    ///
    /// Cross-origin and non-GET requests pass through untouched. HTML,
    /// scripts, and stylesheets are network-first; everything else is
    /// cache-first.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        if !self.config.is_same_origin(&request.url) {
            debug!(url = %request.url, "cross-origin, passing through");
            return Ok(FetchOutcome::Passthrough);
        }
        if request.method != Method::GET {
            debug!(url = %request.url, method = %request.method, "non-GET, passing through");
            return Ok(FetchOutcome::Passthrough);
        }

        let strategy = ResourceKind::classify(&request.url).strategy();
        debug!(url = %request.url, %strategy, "routing");
        match strategy {
            CacheStrategy::NetworkFirst => self.network_first(request).await,
            CacheStrategy::CacheFirst => self.cache_first(request).await,
        }
    }

    /// The installed generation, if any. Fetch handling never creates one:
    /// only `install` does, and a swept generation stays gone.
    async fn current(&self) -> Result<Option<Arc<dyn Cache>>> {
        self.caches.get(&self.cache_name).await
    }

    async fn lookup(&self, key: &RequestKey) -> Result<Option<FetchResponse>> {
        let Some(cache) = self.current().await? else {
            return Ok(None);
        };
        Ok(cache
            .match_request(key)
            .await?
            .map(|entry| FetchResponse::from_entry(&entry)))
    }

    /// Write-through that never fails the fetch it belongs to.
    async fn store(&self, key: RequestKey, response: &FetchResponse) {
        let cache = match self.current().await {
            Ok(Some(cache)) => cache,
            Ok(None) => {
                debug!(cache = %self.cache_name, %key, "generation not installed, not storing");
                return;
            }
            Err(e) => {
                warn!(cache = %self.cache_name, error = %e, "failed to open generation");
                return;
            }
        };
        if let Err(e) = cache.put(key, response).await {
            warn!(cache = cache.name(), error = %e, "failed to store response");
        }
    }

    async fn network_first(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        let key = request.key();

        let failure = match self.network.fetch(request).await {
            Ok(response) if response.ok() => {
                self.store(key, &response).await;
                return Ok(FetchOutcome::Respond(response));
            }
            Ok(response) => {
                debug!(%key, status = response.status, "network returned an error status");
                Some(response)
            }
            Err(e) => {
                debug!(%key, error = %e, "network failed, falling back to cache");
                None
            }
        };

        match self.lookup(&key).await? {
            Some(cached) => Ok(FetchOutcome::Respond(cached)),
            None => Ok(failure.map_or(FetchOutcome::NoMatch, FetchOutcome::Respond)),
        }
    }

    async fn cache_first(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        let key = request.key();

        if let Some(cached) = self.lookup(&key).await? {
            return Ok(FetchOutcome::Respond(cached));
        }

        let response = self.network.fetch(request).await?;
        if response.status != 200 {
            debug!(%key, status = response.status, "not caching non-200 response");
            return Ok(FetchOutcome::Respond(response));
        }
        self.store(key, &response).await;
        Ok(FetchOutcome::Respond(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    /// Serves fixed bodies by path; unknown paths are 404.
    #[derive(Default)]
    struct FakeNetwork {
        offline: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for FakeNetwork {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline {
                return Err(ServiceWorkerError::network("offline"));
            }
            Ok(match request.url.path() {
                "/missing.png" | "/broken.html" => FetchResponse::new(404, "not found"),
                path => FetchResponse::new(200, format!("network:{path}")),
            })
        }
    }

    fn config() -> RouterConfig {
        RouterConfig::new("dash", "1", Url::parse("http://localhost:3000").unwrap())
            .with_tracked_assets(["/", "/app.js", "/icon-192.png"])
    }

    fn router(storage: &Arc<MemoryCacheStorage>, network: FakeNetwork) -> (CacheRouter, Arc<FakeNetwork>) {
        let network = Arc::new(network);
        let router = CacheRouter::new(config(), storage.clone(), network.clone());
        (router, network)
    }

    fn get(path: &str) -> FetchRequest {
        FetchRequest::get(Url::parse("http://localhost:3000").unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn test_install_caches_tracked_assets() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let (router, network) = router(&storage, FakeNetwork::default());

        let report = router.install().await.unwrap();
        assert_eq!(report.cache_name, "dash-v1");
        assert_eq!(report.cached.len(), 3);
        assert!(report.skip_waiting);
        assert_eq!(network.calls.load(Ordering::SeqCst), 3);

        let cache = storage.open("dash-v1").await.unwrap();
        assert_eq!(cache.keys().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_install_failure_removes_new_generation() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let network = Arc::new(FakeNetwork::default());
        let config = config().with_tracked_assets(["/index.html", "/missing.png"]);
        let router = CacheRouter::new(config, storage.clone(), network);

        let err = router.install().await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::InstallFailed { ref asset, .. } if asset.ends_with("/missing.png")));
        assert!(!storage.has("dash-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_activate_deletes_other_generations() {
        let storage = Arc::new(MemoryCacheStorage::new());
        storage.open("dash-v0").await.unwrap();
        storage.open("unrelated").await.unwrap();
        let (router, _) = router(&storage, FakeNetwork::default());
        router.install().await.unwrap();

        let report = router.activate().await.unwrap();
        assert_eq!(report.deleted, vec!["dash-v0", "unrelated"]);
        assert_eq!(storage.keys().await.unwrap(), vec!["dash-v1"]);
    }

    #[tokio::test]
    async fn test_cross_origin_passes_through() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let (router, network) = router(&storage, FakeNetwork::default());
        let request = FetchRequest::get(Url::parse("https://api.example.com/quotes.png").unwrap());

        let outcome = router.handle_fetch(&request).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Passthrough);
        assert_eq!(network.calls.load(Ordering::SeqCst), 0);
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_post_passes_through() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let (router, _) = router(&storage, FakeNetwork::default());
        let request = get("/orders").method(Method::POST);

        assert_eq!(
            router.handle_fetch(&request).await.unwrap(),
            FetchOutcome::Passthrough
        );
    }

    #[tokio::test]
    async fn test_network_first_error_status_prefers_cache() {
        let storage = Arc::new(MemoryCacheStorage::new());
        storage
            .open("dash-v1")
            .await
            .unwrap()
            .put(get("/broken.html").key(), &FetchResponse::new(200, "cached"))
            .await
            .unwrap();
        let (router, _) = router(&storage, FakeNetwork::default());

        let outcome = router.handle_fetch(&get("/broken.html")).await.unwrap();
        let response = outcome.response().unwrap();
        assert!(response.from_cache);
        assert_eq!(response.body.as_ref(), b"cached");
    }

    #[tokio::test]
    async fn test_network_first_error_status_without_cache_is_returned() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let (router, _) = router(&storage, FakeNetwork::default());

        let outcome = router.handle_fetch(&get("/broken.html")).await.unwrap();
        assert_eq!(outcome.response().unwrap().status, 404);
        let cache = storage.open("dash-v1").await.unwrap();
        assert!(cache.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_network_first_offline_miss_is_no_match() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let (router, _) = router(
            &storage,
            FakeNetwork {
                offline: true,
                ..Default::default()
            },
        );

        let outcome = router.handle_fetch(&get("/index.html")).await.unwrap();
        assert_eq!(outcome, FetchOutcome::NoMatch);
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_before_install_creates_no_generation() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let (router, _) = router(&storage, FakeNetwork::default());

        let page = router.handle_fetch(&get("/index.html")).await.unwrap();
        assert_eq!(page.response().unwrap().status, 200);
        let icon = router.handle_fetch(&get("/logo.svg")).await.unwrap();
        assert!(!icon.response().unwrap().from_cache);

        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_first_network_failure_propagates() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let (router, _) = router(
            &storage,
            FakeNetwork {
                offline: true,
                ..Default::default()
            },
        );

        let err = router.handle_fetch(&get("/icon-512.png")).await.unwrap_err();
        assert!(err.is_network());
        assert!(storage.keys().await.unwrap().is_empty());
    }
}
