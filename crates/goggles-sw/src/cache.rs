//! The offline cache: install, activate and fetch interception.

use std::sync::Arc;
use std::time::Duration;

use goggles_common::{retry_when, with_timeout, RetryConfig};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::fetch::{FetchError, FetchPolicy, FetchRequest, FetchResponse, Fetcher};
use crate::generation::{CacheState, GenerationId, GenerationState, Lifecycle};
use crate::manifest::AssetManifest;
use crate::registration::CacheRegistration;
use crate::store::{CacheEntry, CacheStore};
use crate::ServiceWorkerError;

/// Tunables for an [`OfflineCache`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub policy: FetchPolicy,
    /// Store successful network GETs in the active bucket.
    pub refresh_on_network: bool,
    /// Per-asset timeout while installing. `None` waits forever.
    pub asset_timeout: Option<Duration>,
    /// Retry policy for asset fetches while installing.
    pub retry: RetryConfig,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            policy: FetchPolicy::CacheFirst,
            refresh_on_network: false,
            asset_timeout: None,
            retry: RetryConfig::none(),
        }
    }
}

/// Notifications published while the cache changes state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    StateChange {
        tag: String,
        generation: GenerationId,
        new_state: GenerationState,
    },
    InstallFailed {
        tag: String,
        url: String,
        reason: String,
    },
    BucketDeleted {
        name: String,
    },
    /// A live response was written back into the active bucket.
    Refreshed {
        tag: String,
        url: String,
    },
}

/// Named lifecycle events a host can dispatch.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Install(AssetManifest),
    Activate,
    Fetch(FetchRequest),
}

/// Result of a completed lifecycle event.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    Installed(GenerationId),
    Activated(ActivationReport),
    Response(Option<FetchResponse>),
}

/// What an activation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    /// Tag now serving requests.
    pub tag: String,
    /// Buckets removed, sorted.
    pub deleted: Vec<String>,
    /// Generation that stopped serving, if any.
    pub replaced: Option<GenerationId>,
}

/// Offline asset cache bound to one registration.
pub struct OfflineCache<S: CacheStore> {
    registration: CacheRegistration,
    store: Arc<RwLock<S>>,
    fetcher: Arc<dyn Fetcher>,
    options: CacheOptions,
    lifecycle: RwLock<Lifecycle>,
    event_tx: mpsc::UnboundedSender<CacheEvent>,
}

impl<S: CacheStore> OfflineCache<S> {
    /// Create a cache that owns `store`.
    pub fn new(
        registration: CacheRegistration,
        store: S,
        fetcher: Arc<dyn Fetcher>,
        options: CacheOptions,
    ) -> (Self, mpsc::UnboundedReceiver<CacheEvent>) {
        Self::with_shared_store(registration, Arc::new(RwLock::new(store)), fetcher, options)
    }

    /// Create a cache over a store shared with other handles.
    pub fn with_shared_store(
        registration: CacheRegistration,
        store: Arc<RwLock<S>>,
        fetcher: Arc<dyn Fetcher>,
        options: CacheOptions,
    ) -> (Self, mpsc::UnboundedReceiver<CacheEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                registration,
                store,
                fetcher,
                options,
                lifecycle: RwLock::new(Lifecycle::new()),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn registration(&self) -> &CacheRegistration {
        &self.registration
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn store(&self) -> Arc<RwLock<S>> {
        Arc::clone(&self.store)
    }

    pub async fn state(&self) -> CacheState {
        self.lifecycle.read().await.state()
    }

    /// Tag of the generation currently serving requests.
    pub async fn active_tag(&self) -> Option<String> {
        self.lifecycle.read().await.active().map(|g| g.tag.clone())
    }

    /// Names of all buckets in the store, sorted.
    pub async fn bucket_names(&self) -> Vec<String> {
        self.store.read().await.keys()
    }

    /// Run one lifecycle event to completion.
    pub async fn handle_event(
        &self,
        event: LifecycleEvent,
    ) -> Result<EventOutcome, ServiceWorkerError> {
        match event {
            LifecycleEvent::Install(manifest) => {
                self.install(&manifest).await.map(EventOutcome::Installed)
            }
            LifecycleEvent::Activate => self.activate().await.map(EventOutcome::Activated),
            LifecycleEvent::Fetch(request) => {
                Ok(EventOutcome::Response(self.handle_fetch(&request).await))
            }
        }
    }

    // ==================== Install ====================

    /// Fetch every asset of `manifest` and store them as one bucket.
    ///
    /// Assets are staged in memory and written with a single
    /// [`CacheStore::replace`], so a failed install writes nothing.
    #[instrument(skip(self, manifest), fields(tag = %manifest.tag))]
    pub async fn install(&self, manifest: &AssetManifest) -> Result<GenerationId, ServiceWorkerError> {
        let urls = manifest.resolve(&self.registration.scope)?;

        let id = {
            let mut lifecycle = self.lifecycle.write().await;
            let (id, superseded) = lifecycle.begin_install(&manifest.tag);
            if let Some(old) = superseded {
                self.emit_state(&old.tag, old.id, GenerationState::Redundant);
            }
            id
        };
        self.emit_state(&manifest.tag, id, GenerationState::Installing);
        info!(assets = urls.len(), "Installing generation");

        let mut staged = Vec::with_capacity(urls.len());
        for url in urls {
            match self.fetch_asset(&url).await {
                Ok(entry) => staged.push(entry),
                Err(source) => {
                    warn!(url = %url, error = %source, "Asset fetch failed, aborting install");
                    if self.lifecycle.write().await.install_failed(id).is_some() {
                        let _ = self.event_tx.send(CacheEvent::InstallFailed {
                            tag: manifest.tag.clone(),
                            url: url.to_string(),
                            reason: source.to_string(),
                        });
                        self.emit_state(&manifest.tag, id, GenerationState::Redundant);
                    }
                    return Err(ServiceWorkerError::InstallFailed {
                        url: url.to_string(),
                        source,
                    });
                }
            }
        }

        let mut lifecycle = self.lifecycle.write().await;
        if !lifecycle.is_installing(id) {
            return Err(ServiceWorkerError::StateError(format!(
                "install of '{}' was superseded",
                manifest.tag
            )));
        }

        let count = staged.len();
        if let Err(e) = self.store.write().await.replace(&manifest.tag, staged) {
            lifecycle.install_failed(id);
            self.emit_state(&manifest.tag, id, GenerationState::Redundant);
            return Err(e.into());
        }

        if let Some(old) = lifecycle.install_complete(id) {
            self.emit_state(&old.tag, old.id, GenerationState::Redundant);
        }
        self.emit_state(&manifest.tag, id, GenerationState::Installed);
        info!(entries = count, "Generation installed");
        Ok(id)
    }

    async fn fetch_asset(&self, url: &Url) -> Result<CacheEntry, FetchError> {
        let request = FetchRequest::get(url.clone());
        let response = retry_when(&self.options.retry, FetchError::is_transient, || {
            self.fetch_once(&request)
        })
        .await?;
        Ok(response.to_entry(&request))
    }

    async fn fetch_once(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let response = match self.options.asset_timeout {
            Some(limit) => with_timeout(limit, self.fetcher.fetch(request))
                .await
                .map_err(|_| FetchError::Timeout(limit))??,
            None => self.fetcher.fetch(request).await?,
        };

        if !response.ok() {
            return Err(FetchError::Status {
                url: request.url.to_string(),
                status: response.status,
            });
        }
        Ok(response)
    }

    // ==================== Activate ====================

    /// Make the installed generation the only one left in the store.
    ///
    /// Running it again without a new install deletes nothing.
    #[instrument(skip(self))]
    pub async fn activate(&self) -> Result<ActivationReport, ServiceWorkerError> {
        let mut lifecycle = self.lifecycle.write().await;

        let (activating, tag) = match lifecycle.begin_activation() {
            Some((id, tag)) => {
                self.emit_state(&tag, id, GenerationState::Activating);
                (Some(id), tag)
            }
            None => match lifecycle.active() {
                Some(active) => (None, active.tag.clone()),
                None => {
                    return Err(ServiceWorkerError::StateError(
                        "no installed generation to activate".to_string(),
                    ))
                }
            },
        };

        let deleted = match self.delete_stale(&tag).await {
            Ok(deleted) => deleted,
            Err(e) => {
                lifecycle.abort_activation();
                if let Some(id) = activating {
                    self.emit_state(&tag, id, GenerationState::Installed);
                }
                return Err(e);
            }
        };

        let mut replaced = None;
        if let Some(id) = activating {
            if let Some(old) = lifecycle.finish_activation() {
                self.emit_state(&old.tag, old.id, GenerationState::Redundant);
                replaced = Some(old.id);
            }
            self.emit_state(&tag, id, GenerationState::Activated);
        }

        info!(tag = %tag, deleted = deleted.len(), "Generation active");
        Ok(ActivationReport {
            tag,
            deleted,
            replaced,
        })
    }

    async fn delete_stale(&self, keep: &str) -> Result<Vec<String>, ServiceWorkerError> {
        let mut store = self.store.write().await;
        let stale: Vec<String> = store.keys().into_iter().filter(|name| name != keep).collect();
        for name in &stale {
            store.delete(name)?;
            debug!(bucket = %name, "Deleted stale bucket");
            let _ = self.event_tx.send(CacheEvent::BucketDeleted { name: name.clone() });
        }
        Ok(stale)
    }

    /// Serve an existing bucket for `tag` without reinstalling it.
    ///
    /// Used when a persistent store already holds the generation from an
    /// earlier run. Returns `None` when the bucket is missing or the
    /// lifecycle has already moved past uninstalled.
    pub async fn resume(&self, tag: &str) -> Option<GenerationId> {
        let mut lifecycle = self.lifecycle.write().await;
        if !self.store.read().await.has(tag) {
            return None;
        }
        let id = lifecycle.restore_active(tag)?;
        self.emit_state(tag, id, GenerationState::Activated);
        info!(tag, "Resumed stored generation");
        Some(id)
    }

    // ==================== Fetch ====================

    /// Answer a request from the active bucket and/or the network.
    ///
    /// Never fails: `None` means neither source had a response.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Option<FetchResponse> {
        let bucket = if request.is_get() && self.registration.controls(&request.url) {
            self.active_tag().await
        } else {
            None
        };

        let Some(tag) = bucket else {
            return self.network(request).await;
        };

        match self.options.policy {
            FetchPolicy::CacheFirst => {
                if let Some(hit) = self.lookup(&tag, request).await {
                    return Some(hit);
                }
                let response = self.network(request).await?;
                self.maybe_refresh(&tag, request, &response).await;
                Some(response)
            }
            FetchPolicy::NetworkFirst => match self.fetcher.fetch(request).await {
                Ok(response) => {
                    self.maybe_refresh(&tag, request, &response).await;
                    Some(response)
                }
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Network failed, falling back to cache");
                    self.lookup(&tag, request).await
                }
            },
        }
    }

    async fn lookup(&self, tag: &str, request: &FetchRequest) -> Option<FetchResponse> {
        let store = self.store.read().await;
        let entry = store.match_request(tag, &request.cache_key())?;
        debug!(url = %request.url, tag, "Cache hit");
        Some(FetchResponse::from_cache(&entry))
    }

    async fn network(&self, request: &FetchRequest) -> Option<FetchResponse> {
        match self.fetcher.fetch(request).await {
            Ok(response) => Some(response),
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network fetch failed");
                None
            }
        }
    }

    async fn maybe_refresh(&self, tag: &str, request: &FetchRequest, response: &FetchResponse) {
        if !self.options.refresh_on_network || !response.ok() {
            return;
        }
        let mut store = self.store.write().await;
        // The generation may have been replaced while the request was in flight.
        if !store.has(tag) {
            return;
        }
        match store.put(tag, response.to_entry(request)) {
            Ok(()) => {
                let _ = self.event_tx.send(CacheEvent::Refreshed {
                    tag: tag.to_string(),
                    url: request.url.to_string(),
                });
            }
            Err(e) => warn!(url = %request.url, error = %e, "Failed to refresh cache entry"),
        }
    }

    fn emit_state(&self, tag: &str, generation: GenerationId, new_state: GenerationState) {
        let _ = self.event_tx.send(CacheEvent::StateChange {
            tag: tag.to_string(),
            generation,
            new_state,
        });
    }
}
