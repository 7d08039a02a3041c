//! Errors for the offline cache router.

use thiserror::Error;

/// Errors that can occur while installing, activating, or routing fetches.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Install failed for {asset}: {reason}")]
    InstallFailed { asset: String, reason: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Load failed: no network response and no cached entry for {0}")]
    LoadFailed(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServiceWorkerError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError(message.into())
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::CacheError(message.into())
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Whether the error came from the network layer rather than the cache.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::NetworkError(_))
    }
}

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
