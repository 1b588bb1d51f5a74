//! # Goggles Service Worker
//!
//! Offline asset cache for the Whisky Goggles client, modelled on the
//! service worker lifecycle.
//!
//! ## Features
//!
//! - **Registration**: script URL and controlled scope
//! - **Lifecycle**: install, activate, fetch as explicit, awaited transitions
//! - **Cache storage**: injected [`CacheStore`], in memory or on disk
//! - **Fetch interception**: cache-first or network-first
//!
//! ## Architecture
//!
//! ```text
//! OfflineCache
//!     ├── CacheRegistration (script URL, scope)
//!     ├── Lifecycle
//!     │       ├── installing (Generation)
//!     │       ├── waiting (Generation)
//!     │       └── active (Generation)
//!     ├── Fetcher (network)
//!     └── CacheStore
//!             └── Cache (one per generation tag)
//!                     └── URL → CacheEntry
//! ```
//!
//! Lifecycle: `uninstalled → installing → installed(tag) → activating → active(tag)`.

use thiserror::Error;

pub mod cache;
pub mod disk;
pub mod fetch;
pub mod generation;
pub mod manifest;
pub mod registration;
pub mod store;

pub use cache::{
    ActivationReport, CacheEvent, CacheOptions, EventOutcome, LifecycleEvent, OfflineCache,
};
pub use disk::DiskCacheStore;
pub use fetch::{FetchError, FetchPolicy, FetchRequest, FetchResponse, Fetcher};
pub use generation::{CacheState, Generation, GenerationId, GenerationState, Lifecycle};
pub use manifest::AssetManifest;
pub use registration::CacheRegistration;
pub use store::{Cache, CacheEntry, CacheStorage, CacheStore, StoreError};

/// Errors that can occur in offline cache operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Install failed fetching {url}: {source}")]
    InstallFailed {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),
}

impl From<ServiceWorkerError> for goggles_common::GogglesError {
    fn from(err: ServiceWorkerError) -> Self {
        goggles_common::GogglesError::cache_with_source("offline cache", err)
    }
}
