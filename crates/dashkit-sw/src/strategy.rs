//! Request classification.

use std::fmt;

use url::Url;

/// Kind of resource a URL denotes, judged by its path extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// HTML document, including directory paths ending in `/`.
    Document,
    /// JavaScript.
    Script,
    /// CSS.
    Stylesheet,
    /// Images, icons, manifests, fonts, data.
    Other,
}

/// Caching strategy applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Network, falling back to the cache when the network fails.
    NetworkFirst,
    /// Cache, populating it from the network on a miss.
    CacheFirst,
}

impl ResourceKind {
    /// Classify a URL.
    pub fn classify(url: &Url) -> Self {
        let path = url.path();
        if path.ends_with('/') {
            return Self::Document;
        }
        let file = path.rsplit('/').next().unwrap_or(path);
        let Some((_, ext)) = file.rsplit_once('.') else {
            return Self::Other;
        };
        match ext.to_ascii_lowercase().as_str() {
            "html" | "htm" => Self::Document,
            "js" | "mjs" => Self::Script,
            "css" => Self::Stylesheet,
            _ => Self::Other,
        }
    }

    /// App logic must stay fresh; everything else prefers the cache.
    pub fn strategy(self) -> CacheStrategy {
        match self {
            Self::Document | Self::Script | Self::Stylesheet => CacheStrategy::NetworkFirst,
            Self::Other => CacheStrategy::CacheFirst,
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkFirst => write!(f, "network-first"),
            Self::CacheFirst => write!(f, "cache-first"),
        }
    }
}
