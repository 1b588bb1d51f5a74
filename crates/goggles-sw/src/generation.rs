//! Generations and the install/activate state machine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Unique identifier for a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerationId(u64);

impl GenerationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// State of a single generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationState {
    /// Assets are being fetched.
    Installing,
    /// Fully cached, waiting for activation.
    Installed,
    /// Stale buckets are being removed.
    Activating,
    /// Serving requests.
    Activated,
    /// Replaced, or its install failed.
    Redundant,
}

/// Overall state of the cache, as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Uninstalled,
    Installing,
    Installed,
    Activating,
    Active,
}

/// One deployed asset set.
#[derive(Debug, Clone)]
pub struct Generation {
    pub id: GenerationId,
    pub tag: String,
    pub state: GenerationState,
    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl Generation {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            id: GenerationId::new(),
            tag: tag.into(),
            state: GenerationState::Installing,
            state_changed_at: Instant::now(),
        }
    }

    pub fn set_state(&mut self, state: GenerationState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == GenerationState::Activated
    }
}

/// Installing, waiting and active slots.
///
/// Only the slot bookkeeping lives here; bucket I/O belongs to
/// [`crate::OfflineCache`].
#[derive(Debug, Default)]
pub struct Lifecycle {
    installing: Option<Generation>,
    waiting: Option<Generation>,
    active: Option<Generation>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waiting(&self) -> Option<&Generation> {
        self.waiting.as_ref()
    }

    pub fn active(&self) -> Option<&Generation> {
        self.active.as_ref()
    }

    pub fn state(&self) -> CacheState {
        if self.installing.is_some() {
            return CacheState::Installing;
        }
        match (&self.waiting, &self.active) {
            (Some(w), _) if w.state == GenerationState::Activating => CacheState::Activating,
            (Some(_), _) => CacheState::Installed,
            (None, Some(_)) => CacheState::Active,
            (None, None) => CacheState::Uninstalled,
        }
    }

    /// Tag that activation would keep: the waiting generation's, else the active one's.
    pub fn current_tag(&self) -> Option<&str> {
        self.waiting
            .as_ref()
            .or(self.active.as_ref())
            .map(|g| g.tag.as_str())
    }

    /// Start installing `tag`. An install already in flight is superseded
    /// and returned as redundant.
    pub fn begin_install(&mut self, tag: &str) -> (GenerationId, Option<Generation>) {
        let superseded = self.installing.take().map(|mut old| {
            old.set_state(GenerationState::Redundant);
            old
        });
        let generation = Generation::new(tag);
        let id = generation.id;
        self.installing = Some(generation);
        (id, superseded)
    }

    pub fn is_installing(&self, id: GenerationId) -> bool {
        self.installing.as_ref().is_some_and(|g| g.id == id)
    }

    /// Move the installing generation to waiting. Any generation already
    /// waiting becomes redundant and is returned.
    pub fn install_complete(&mut self, id: GenerationId) -> Option<Generation> {
        if !self.is_installing(id) {
            return None;
        }
        let mut generation = self.installing.take()?;
        generation.set_state(GenerationState::Installed);
        self.waiting.replace(generation).map(|mut old| {
            old.set_state(GenerationState::Redundant);
            old
        })
    }

    /// Drop a failed install. Returns the now-redundant generation.
    pub fn install_failed(&mut self, id: GenerationId) -> Option<Generation> {
        if !self.is_installing(id) {
            return None;
        }
        self.installing.take().map(|mut failed| {
            failed.set_state(GenerationState::Redundant);
            failed
        })
    }

    /// Mark the waiting generation as activating and return its tag.
    pub fn begin_activation(&mut self) -> Option<(GenerationId, String)> {
        let waiting = self.waiting.as_mut()?;
        waiting.set_state(GenerationState::Activating);
        Some((waiting.id, waiting.tag.clone()))
    }

    /// Put an activating generation back to waiting after a failed cleanup.
    pub fn abort_activation(&mut self) {
        if let Some(waiting) = self.waiting.as_mut() {
            if waiting.state == GenerationState::Activating {
                waiting.set_state(GenerationState::Installed);
            }
        }
    }

    /// Promote the waiting generation to active. The previous active
    /// generation becomes redundant and is returned.
    pub fn finish_activation(&mut self) -> Option<Generation> {
        let mut generation = self.waiting.take()?;
        generation.set_state(GenerationState::Activated);
        self.active.replace(generation).map(|mut old| {
            old.set_state(GenerationState::Redundant);
            old
        })
    }

    /// Adopt an already stored generation as active. Only valid before
    /// anything has been installed or activated.
    pub fn restore_active(&mut self, tag: &str) -> Option<GenerationId> {
        if self.installing.is_some() || self.waiting.is_some() || self.active.is_some() {
            return None;
        }
        let mut generation = Generation::new(tag);
        generation.set_state(GenerationState::Activated);
        let id = generation.id;
        self.active = Some(generation);
        Some(id)
    }
}
