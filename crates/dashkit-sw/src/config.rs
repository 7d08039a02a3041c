//! Router configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ServiceWorkerError};

/// Immutable configuration for one worker version.
///
/// The cache generation name is derived from `app_name` and `version`, so
/// bumping `version` is the only way to invalidate previously cached assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Application name, the first half of the cache name.
    pub app_name: String,

    /// Version string, bumped on every deploy.
    pub version: String,

    /// Origin the worker serves. Requests to any other origin pass through.
    pub origin: Url,

    /// Registration scope path; pages under it are claimed on activation.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Paths pre-cached at install time, in order.
    #[serde(default)]
    pub tracked_assets: Vec<String>,

    /// Activate as soon as install completes instead of waiting for
    /// controlled pages to close.
    #[serde(default = "default_true")]
    pub skip_waiting: bool,

    /// Take control of open pages right after activation.
    #[serde(default = "default_true")]
    pub claim_clients: bool,
}

fn default_scope() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            app_name: "trading-dashboard".to_string(),
            version: "1.0.0".to_string(),
            origin: Url::parse("http://localhost:3000/").expect("static origin URL is valid"),
            scope: default_scope(),
            tracked_assets: [
                "/",
                "/index.html",
                "/app.js",
                "/manifest.json",
                "/icon-192.png",
                "/icon-512.png",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            skip_waiting: true,
            claim_clients: true,
        }
    }
}

impl RouterConfig {
    /// Create a configuration with no tracked assets.
    pub fn new(app_name: impl Into<String>, version: impl Into<String>, origin: Url) -> Self {
        Self {
            app_name: app_name.into(),
            version: version.into(),
            origin,
            scope: default_scope(),
            tracked_assets: Vec::new(),
            skip_waiting: true,
            claim_clients: true,
        }
    }

    /// Parse from JSON and validate.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file and validate.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&json)
    }

    /// Serialize as pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Set the version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Replace the tracked asset list.
    pub fn with_tracked_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracked_assets = assets.into_iter().map(Into::into).collect();
        self
    }

    /// Set the registration scope.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Toggle skip-waiting.
    pub fn with_skip_waiting(mut self, skip_waiting: bool) -> Self {
        self.skip_waiting = skip_waiting;
        self
    }

    /// Toggle client claiming.
    pub fn with_claim_clients(mut self, claim_clients: bool) -> Self {
        self.claim_clients = claim_clients;
        self
    }

    /// Name of this version's cache generation: `{app_name}-v{version}`.
    pub fn cache_name(&self) -> String {
        format!("{}-v{}", self.app_name, self.version)
    }

    /// Resolve a path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        Ok(self.origin.join(path)?)
    }

    /// Absolute URLs of the tracked assets.
    pub fn tracked_asset_urls(&self) -> Result<Vec<Url>> {
        self.tracked_assets.iter().map(|p| self.resolve(p)).collect()
    }

    /// Whether `url` shares this app's origin.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Whether `url` falls under the registration scope.
    pub fn in_scope(&self, url: &Url) -> bool {
        self.is_same_origin(url) && url.path().starts_with(&self.scope)
    }

    /// Check the configuration for values that would produce an unusable worker.
    pub fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(ServiceWorkerError::config("app_name must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(ServiceWorkerError::config("version must not be empty"));
        }
        if !self.origin.origin().is_tuple() {
            return Err(ServiceWorkerError::config(format!(
                "origin {} has no scheme/host/port tuple",
                self.origin
            )));
        }
        if !self.scope.starts_with('/') {
            return Err(ServiceWorkerError::config(format!(
                "scope '{}' must start with '/'",
                self.scope
            )));
        }
        for url in self.tracked_asset_urls()? {
            if !self.is_same_origin(&url) {
                return Err(ServiceWorkerError::config(format!(
                    "tracked asset {} is not on origin {}",
                    url, self.origin
                )));
            }
        }
        Ok(())
    }
}
