//! Live backend pool for one logical service.
//!
//! The pool is the mutable meeting point between the discovery watcher
//! (exclusive mutator through `add` / `remove` / `mark_alive`) and request
//! forwarders (shared readers through `next`). Selection is round-robin over
//! a stable snapshot of the membership taken under the read lock, skipping
//! backends whose liveness flag is down.
use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use thiserror::Error;

use crate::core::backend::{Backend, BackendError, UpstreamUrl};

/// Errors surfaced by pool mutations. These are reported to the caller
/// (the discovery watcher logs them); they never reach a client response.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PoolError {
    #[error("Backend with id {0} already exists")]
    Duplicate(String),

    #[error(transparent)]
    InvalidUrl(#[from] BackendError),

    #[error("Pool lock poisoned")]
    Poisoned,
}

/// Round-robin pool of upstream backends keyed by discovery instance id.
///
/// The cursor is opaque and allowed to wrap; strict fairness across
/// concurrent selectors is not promised.
#[derive(Debug, Default)]
pub struct BackendPool {
    backends: RwLock<HashMap<String, Arc<Backend>>>,
    cursor: AtomicU64,
}

impl BackendPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new backend. Rejects duplicate ids without touching the
    /// existing entry.
    pub fn add(&self, id: &str, url: &str) -> Result<(), PoolError> {
        let url = UpstreamUrl::new(url)?;
        let mut backends = self.backends.write().map_err(|_| PoolError::Poisoned)?;
        if backends.contains_key(id) {
            return Err(PoolError::Duplicate(id.to_string()));
        }
        tracing::info!(backend_id = %id, %url, "added backend");
        backends.insert(id.to_string(), Arc::new(Backend::new(id, url)));
        Ok(())
    }

    /// Drop a backend from the pool. Requests already forwarding to it
    /// complete normally; it just stops being selectable.
    pub fn remove(&self, id: &str) -> bool {
        let Ok(mut backends) = self.backends.write() else {
            return false;
        };
        match backends.remove(id) {
            Some(backend) => {
                tracing::info!(backend_id = %id, url = %backend.url(), "removed backend");
                true
            }
            None => false,
        }
    }

    /// Flip the liveness flag of a backend if it is present.
    pub fn mark_alive(&self, id: &str, alive: bool) -> bool {
        let Ok(backends) = self.backends.read() else {
            return false;
        };
        match backends.get(id) {
            Some(backend) => {
                backend.set_alive(alive);
                true
            }
            None => false,
        }
    }

    /// Select the next live backend, or `None` when the pool is empty or
    /// fully dead.
    ///
    /// The probe order comes from a stable snapshot of the id set taken
    /// under the read lock, so concurrent `add` / `remove` cannot
    /// invalidate the iteration: read the length `N`, advance the cursor to
    /// obtain `c`, then probe positions `(c + i) % N` and return the first
    /// backend whose liveness flag reads true.
    pub fn next(&self) -> Option<Arc<Backend>> {
        let Ok(backends) = self.backends.read() else {
            tracing::error!("backend pool lock poisoned during selection");
            return None;
        };

        let total = backends.len();
        if total == 0 {
            return None;
        }

        let mut entries: Vec<&Arc<Backend>> = backends.values().collect();
        entries.sort_by(|a, b| a.id().cmp(b.id()));

        let cursor = self.cursor.fetch_add(1, Ordering::Relaxed);
        for i in 0..total {
            let idx = ((cursor.wrapping_add(i as u64)) % total as u64) as usize;
            let backend = entries[idx];
            if backend.is_alive() {
                return Some(Arc::clone(backend));
            }
        }
        None
    }

    /// Current membership (ids only), for reconciliation diffs.
    pub fn ids(&self) -> Vec<String> {
        match self.backends.read() {
            Ok(backends) => backends.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.backends.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
