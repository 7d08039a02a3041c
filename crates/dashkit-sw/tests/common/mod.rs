//! Shared fixtures for the router integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashkit_sw::{FetchRequest, FetchResponse, Fetcher, RouterConfig, ServiceWorkerError};
use hashbrown::HashMap;
use url::Url;

pub const ORIGIN: &str = "http://localhost:3000";

/// Network double: fixed responses by path, 404 for anything else, and a
/// switch to go offline.
#[derive(Default)]
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, (u16, String)>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Network serving the default dashboard assets.
    pub fn dashboard() -> Arc<Self> {
        let network = Self::new();
        for path in RouterConfig::default().tracked_assets {
            network.serve(&path, 200, &format!("v1:{path}"));
        }
        network
    }

    pub fn serve(&self, path: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_string()));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Paths requested so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.calls().iter().filter(|p| p.as_str() == path).count()
    }
}

#[async_trait]
impl Fetcher for ScriptedNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ServiceWorkerError> {
        let path = request.url.path().to_string();
        self.calls.lock().unwrap().push(path.clone());
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServiceWorkerError::network("connection refused"));
        }
        let (status, body) = self
            .routes
            .lock()
            .unwrap()
            .get(&path)
            .cloned()
            .unwrap_or((404, "not found".to_string()));
        Ok(FetchResponse::new(status, body))
    }
}

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn get(path: &str) -> FetchRequest {
    FetchRequest::get(url(path))
}

pub fn config(version: &str) -> RouterConfig {
    RouterConfig::default().with_version(version)
}
