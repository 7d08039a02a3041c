//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use dashkit_net::{HttpFetcher, LoaderConfig, OfflineFetcher};
use dashkit_sw::{
    CacheRouter, CacheStorage, DiskCacheStorage, FetchOutcome, FetchRequest, Fetcher,
    RouterConfig, ServiceWorkerError,
};
use tracing::info;
use url::Url;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn network(offline: bool) -> CliResult<Arc<dyn Fetcher>> {
    if offline {
        Ok(Arc::new(OfflineFetcher))
    } else {
        Ok(Arc::new(HttpFetcher::new(LoaderConfig::default())?))
    }
}

async fn router(config: RouterConfig, cache_dir: &Path, offline: bool) -> CliResult<CacheRouter> {
    let storage = Arc::new(DiskCacheStorage::new(cache_dir).await?);
    Ok(CacheRouter::new(config, storage, network(offline)?))
}

/// Install then activate, the way a freshly deployed worker with
/// skip-waiting would.
pub async fn update(config_path: &Path, cache_dir: &Path) -> CliResult<()> {
    let config = RouterConfig::from_file(config_path).await?;
    let router = router(config, cache_dir, false).await?;

    let installed = router.install().await?;
    println!(
        "installed {} ({} assets)",
        installed.cache_name,
        installed.cached.len()
    );

    let activated = router.activate().await?;
    for name in &activated.deleted {
        println!("deleted {name}");
    }
    println!("active {}", activated.cache_name);
    Ok(())
}

fn target_url(config: &RouterConfig, target: &str) -> Result<Url, ServiceWorkerError> {
    match Url::parse(target) {
        Ok(url) => Ok(url),
        Err(_) => config.resolve(target),
    }
}

/// Route one request and describe the outcome.
pub async fn fetch(config_path: &Path, cache_dir: &Path, target: &str, offline: bool) -> CliResult<()> {
    let config = RouterConfig::from_file(config_path).await?;
    let request = FetchRequest::get(target_url(&config, target)?);
    let network = network(offline)?;
    let router = CacheRouter::new(
        config,
        Arc::new(DiskCacheStorage::new(cache_dir).await?),
        Arc::clone(&network),
    );

    let outcome = router.handle_fetch(&request).await?;
    let (source, response) = match outcome {
        FetchOutcome::Respond(response) if response.from_cache => ("cache", response),
        FetchOutcome::Respond(response) => ("network", response),
        FetchOutcome::Passthrough => ("passthrough", network.fetch(&request).await?),
        FetchOutcome::NoMatch => {
            return Err(ServiceWorkerError::LoadFailed(request.url.to_string()).into());
        }
    };
    info!(url = %request.url, source, status = response.status, "fetched");
    println!(
        "{} {} from {} ({} bytes)",
        response.status,
        request.url,
        source,
        response.body.len()
    );
    Ok(())
}

/// Print each stored generation with its entry count; `*` marks the one the
/// config points at.
pub async fn caches(config_path: &Path, cache_dir: &Path) -> CliResult<()> {
    let current = RouterConfig::from_file(config_path).await?.cache_name();
    for line in describe_caches(cache_dir, &current).await? {
        println!("{line}");
    }
    Ok(())
}

async fn describe_caches(cache_dir: &Path, current: &str) -> CliResult<Vec<String>> {
    let storage = DiskCacheStorage::new(cache_dir).await?;
    let mut lines = Vec::new();
    for name in storage.keys().await? {
        let entries = match storage.get(&name).await? {
            Some(cache) => cache.keys().await?.len(),
            None => 0,
        };
        let marker = if name == current { '*' } else { ' ' };
        lines.push(format!("{marker} {name} ({entries} entries)"));
    }
    Ok(lines)
}

/// Write the default config to `path`.
pub fn init_config(path: &Path, force: bool) -> CliResult<()> {
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force)", path.display()).into());
    }
    std::fs::write(path, RouterConfig::default().to_json_pretty()?)?;
    println!("wrote {}", path.display());
    Ok(())
}
