//! # DashKit Service Worker
//!
//! Offline cache router for the trading dashboard.
//!
//! ## Features
//!
//! - **Versioned generations**: one cache per `{app}-v{version}`, stale ones
//!   swept on activation
//! - **Pre-caching**: all-or-nothing install of the tracked asset list
//! - **Fetch routing**: network-first for HTML/JS/CSS, cache-first otherwise
//! - **Pluggable stores**: in-memory and on-disk [`CacheStorage`]
//! - **Lifecycle host**: registration, skip-waiting, client claiming
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerHost
//!     ├── registration: installing / waiting / active (ServiceWorker)
//!     │                                   └── CacheRouter
//!     │                                          ├── RouterConfig
//!     │                                          ├── CacheStorage ── Cache ── RequestKey → CacheEntry
//!     │                                          └── Fetcher (network)
//!     └── Clients (controlled pages)
//! ```

pub mod cache;
pub mod clients;
pub mod config;
pub mod disk;
pub mod error;
pub mod fetch;
pub mod host;
pub mod request;
pub mod router;
pub mod strategy;

pub use cache::{Cache, CacheStorage, MemoryCache, MemoryCacheStorage};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use config::RouterConfig;
pub use disk::{DiskCache, DiskCacheStorage};
pub use error::{Result, ServiceWorkerError};
pub use fetch::Fetcher;
pub use host::{
    ServiceWorker, ServiceWorkerEvent, ServiceWorkerHost, ServiceWorkerId,
    ServiceWorkerRegistration, ServiceWorkerState,
};
pub use request::{CacheEntry, FetchRequest, FetchResponse, RequestKey};
pub use router::{ActivateReport, CacheRouter, FetchOutcome, InstallReport};
pub use strategy::{CacheStrategy, ResourceKind};
