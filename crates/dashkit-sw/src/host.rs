//! Worker lifecycle host.
//!
//! Drives [`CacheRouter`] through `installing → installed → activating →
//! activated`, keeps the previous active worker serving until a newer one has
//! finished activating, and dispatches page fetches to whichever worker
//! controls the page.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::{Client, Clients};
use crate::config::RouterConfig;
use crate::error::{Result, ServiceWorkerError};
use crate::fetch::Fetcher;
use crate::request::{FetchRequest, FetchResponse};
use crate::router::{CacheRouter, FetchOutcome};

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

impl ServiceWorkerState {
    /// Only an activated worker intercepts fetches.
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, Self::Activated)
    }
}

impl fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

// ==================== Service Worker ====================

/// A service worker instance: one router plus its lifecycle state.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Policy this worker enforces.
    pub router: Arc<CacheRouter>,

    /// Error message if failed.
    pub error: Option<String>,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    pub fn new(router: Arc<CacheRouter>) -> Self {
        Self {
            id: ServiceWorkerId::next(),
            state: ServiceWorkerState::Parsed,
            router,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn cache_name(&self) -> &str {
        self.router.cache_name()
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

/// Worker slots of the single registration.
#[derive(Debug, Default)]
pub struct ServiceWorkerRegistration {
    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,
}

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceWorkerEvent {
    /// A new version started installing.
    UpdateFound {
        worker_id: ServiceWorkerId,
        cache_name: String,
    },
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        state: ServiceWorkerState,
    },
    /// Install failed; the worker is redundant.
    InstallFailed {
        worker_id: ServiceWorkerId,
        reason: String,
    },
    /// Activation removed stale generations.
    CachesDeleted { names: Vec<String> },
    /// A client got a new controller.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
}

// ==================== Host ====================

/// Bridges router lifecycle methods to registration, clients, and page
/// fetches.
pub struct ServiceWorkerHost {
    caches: Arc<dyn CacheStorage>,
    network: Arc<dyn Fetcher>,
    registration: RwLock<ServiceWorkerRegistration>,
    clients: RwLock<Clients>,
    /// Serializes activations so sweeps never interleave.
    activation: Mutex<()>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerHost {
    /// Create a host. `network` is also used for requests no worker handles.
    pub fn new(
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                caches,
                network,
                registration: RwLock::new(ServiceWorkerRegistration::default()),
                clients: RwLock::new(Clients::new()),
                activation: Mutex::new(()),
                event_tx,
            },
            event_rx,
        )
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn transition(&self, worker: &mut ServiceWorker, state: ServiceWorkerState) {
        debug!(worker = %worker.id, from = %worker.state, to = %state, "state change");
        worker.set_state(state);
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id: worker.id,
            state,
        });
    }

    /// Install a worker for `config`.
    ///
    /// On install failure the new worker turns redundant and the current
    /// active worker keeps serving. On success it waits, or activates at once
    /// when it asks to skip waiting, when nothing is active yet, or when the
    /// active worker controls no clients.
    pub async fn register(&self, config: RouterConfig) -> Result<ServiceWorkerId> {
        config.validate()?;
        let router = Arc::new(CacheRouter::new(
            config,
            Arc::clone(&self.caches),
            Arc::clone(&self.network),
        ));
        let mut worker = ServiceWorker::new(Arc::clone(&router));
        let id = worker.id;
        info!(worker = %id, cache = router.cache_name(), "registering worker");
        self.emit(ServiceWorkerEvent::UpdateFound {
            worker_id: id,
            cache_name: router.cache_name().to_string(),
        });

        self.transition(&mut worker, ServiceWorkerState::Installing);
        {
            let mut registration = self.registration.write().await;
            if let Some(mut previous) = registration.installing.replace(worker) {
                self.transition(&mut previous, ServiceWorkerState::Redundant);
            }
        }

        let installed = router.install().await;

        let mut registration = self.registration.write().await;
        let mut worker = match registration.installing.take() {
            Some(w) if w.id == id => w,
            other => {
                registration.installing = other;
                return Err(ServiceWorkerError::StateError(format!(
                    "worker {id} was superseded during install"
                )));
            }
        };

        let report = match installed {
            Ok(report) => report,
            Err(e) => {
                warn!(worker = %id, error = %e, "install failed, keeping current worker");
                worker.error = Some(e.to_string());
                self.transition(&mut worker, ServiceWorkerState::Redundant);
                self.emit(ServiceWorkerEvent::InstallFailed {
                    worker_id: id,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        self.transition(&mut worker, ServiceWorkerState::Installed);
        if let Some(mut stale) = registration.waiting.replace(worker) {
            self.transition(&mut stale, ServiceWorkerState::Redundant);
        }
        let nothing_active = registration.active.is_none();
        drop(registration);

        if report.skip_waiting || nothing_active || self.active_is_idle().await {
            self.activate().await?;
        } else {
            info!(worker = %id, "installed, waiting for controlled clients to close");
        }
        Ok(id)
    }

    /// Promote the waiting worker. Returns `false` when nothing is waiting.
    ///
    /// The old active worker serves until the stale-generation sweep has
    /// finished; clients are handed over and claimed only afterwards.
    pub async fn activate(&self) -> Result<bool> {
        let _serial = self.activation.lock().await;
        let Some(mut worker) = self.registration.write().await.waiting.take() else {
            return Ok(false);
        };

        self.transition(&mut worker, ServiceWorkerState::Activating);
        let router = Arc::clone(&worker.router);
        let report = match router.activate().await {
            Ok(report) => report,
            Err(e) => {
                warn!(worker = %worker.id, error = %e, "activation failed");
                worker.error = Some(e.to_string());
                self.transition(&mut worker, ServiceWorkerState::Redundant);
                return Err(e);
            }
        };
        if !report.deleted.is_empty() {
            self.emit(ServiceWorkerEvent::CachesDeleted {
                names: report.deleted.clone(),
            });
        }

        let id = worker.id;
        let old = {
            let mut registration = self.registration.write().await;
            let old = registration.active.take().map(|mut old| {
                self.transition(&mut old, ServiceWorkerState::Redundant);
                old.id
            });
            self.transition(&mut worker, ServiceWorkerState::Activated);
            registration.active = Some(worker);
            old
        };

        let mut changed = Vec::new();
        {
            let mut clients = self.clients.write().await;
            if let Some(old) = old {
                changed.extend(clients.replace_controller(old, id));
            }
            if report.claim_clients {
                changed.extend(clients.claim(id, router.config()));
            }
        }
        for client_id in changed {
            self.emit(ServiceWorkerEvent::ControllerChange {
                client_id,
                worker_id: id,
            });
        }

        info!(worker = %id, cache = %report.cache_name, "worker activated");
        Ok(true)
    }

    /// Force the waiting worker to activate.
    pub async fn skip_waiting(&self) -> Result<bool> {
        self.activate().await
    }

    async fn active_is_idle(&self) -> bool {
        let active = self.registration.read().await.active.as_ref().map(|w| w.id);
        match active {
            Some(id) => self.clients.read().await.controlled_by(id) == 0,
            None => true,
        }
    }

    /// Open a page. It is controlled by the active worker when in scope.
    pub async fn open_client(&self, url: Url) -> Client {
        let controller = self
            .registration
            .read()
            .await
            .active
            .as_ref()
            .filter(|w| w.router.config().in_scope(&url))
            .map(|w| w.id);
        self.clients.write().await.open_window(url, controller)
    }

    /// Close a page. Closing the last page of the active worker lets a
    /// waiting worker activate.
    pub async fn close_client(&self, id: &str) -> Result<bool> {
        if self.clients.write().await.remove(id).is_none() {
            return Ok(false);
        }
        let waiting = self.registration.read().await.waiting.is_some();
        if waiting && self.active_is_idle().await {
            self.activate().await?;
        }
        Ok(true)
    }

    /// Snapshot of a client.
    pub async fn client(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// Snapshot of the active worker.
    pub async fn active_worker(&self) -> Option<ServiceWorker> {
        self.registration.read().await.active.clone()
    }

    /// Snapshot of the waiting worker.
    pub async fn waiting_worker(&self) -> Option<ServiceWorker> {
        self.registration.read().await.waiting.clone()
    }

    async fn controller_for(
        &self,
        client_id: Option<&str>,
        request: &FetchRequest,
    ) -> Option<Arc<CacheRouter>> {
        let (active_id, router) = {
            let registration = self.registration.read().await;
            let active = registration
                .active
                .as_ref()
                .filter(|w| w.state.can_intercept_fetch())?;
            (active.id, Arc::clone(&active.router))
        };
        let controlled = match client_id {
            Some(id) => {
                self.clients.read().await.get(id).and_then(|c| c.controller) == Some(active_id)
            }
            None => request.is_navigation && router.config().in_scope(&request.url),
        };
        controlled.then_some(router)
    }

    /// Perform a page fetch.
    ///
    /// Requests from controlled clients, and in-scope navigations, go through
    /// the active worker; everything else goes straight to the network. A
    /// network-first miss with no cached entry is a [`ServiceWorkerError::LoadFailed`].
    pub async fn fetch(&self, client_id: Option<&str>, request: FetchRequest) -> Result<FetchResponse> {
        let Some(router) = self.controller_for(client_id, &request).await else {
            return self.network.fetch(&request).await;
        };

        match router.handle_fetch(&request).await? {
            FetchOutcome::Respond(response) => Ok(response),
            FetchOutcome::Passthrough => self.network.fetch(&request).await,
            FetchOutcome::NoMatch => Err(ServiceWorkerError::LoadFailed(request.url.to_string())),
        }
    }
}
