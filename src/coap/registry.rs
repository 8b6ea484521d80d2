//! Observer registry - live observe relations keyed by endpoint and token.
//!
//! One registry-wide `RwLock` guards a two-level map
//! `endpoint -> token -> observer`. Mutations take the write lock, publish
//! fan-out takes a read-lock snapshot and delivers outside the lock.
//!
//! Every registered observer gets one waiter task (see [`ObserverRegistry::watch`])
//! that removes the entry when the observer's session ends. The waiter only
//! removes the exact observer it was spawned for: if the same token has been
//! re-registered in the meantime, the replacement stays.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::observer::Observer;
use crate::{Error, Result};

type Observers = HashMap<String, Arc<dyn Observer>>;

/// Endpoint → token → observer.
#[derive(Default)]
pub struct ObserverRegistry {
    endpoints: RwLock<HashMap<String, Observers>>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("endpoints", &self.endpoints.read().len())
            .finish()
    }
}

fn same_observer(a: &Arc<dyn Observer>, b: &Arc<dyn Observer>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

impl ObserverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer` under `(endpoint, token)`.
    ///
    /// An observer already registered under the same pair is cancelled and
    /// replaced. The new observer is stored even if that cancellation
    /// fails; the failure is returned as [`Error::Unsubscribe`].
    pub fn put(&self, endpoint: &str, token: &str, observer: Arc<dyn Observer>) -> Result<()> {
        let mut endpoints = self.endpoints.write();
        let observers = endpoints.entry(endpoint.to_string()).or_default();

        let result = match observers.insert(token.to_string(), observer) {
            Some(prior) => {
                debug!(endpoint = %endpoint, token = %token, "Replacing observer");
                prior.cancel().map_err(Error::Unsubscribe)
            }
            None => Ok(()),
        };

        debug!(endpoint = %endpoint, token = %token, "Registered observer");
        result
    }

    /// Remove and cancel the observer under `(endpoint, token)`.
    ///
    /// Missing endpoints and tokens are a no-op. A failed cancellation is
    /// returned, but the entry is removed regardless.
    pub fn remove(&self, endpoint: &str, token: &str) -> Result<()> {
        self.remove_if(endpoint, token, |_| true)
    }

    /// Remove `observer` from `endpoint`, but only if it is still the
    /// registered entry for its token.
    pub fn remove_observer(&self, endpoint: &str, observer: &Arc<dyn Observer>) -> Result<()> {
        self.remove_if(endpoint, observer.token(), |current| same_observer(current, observer))
    }

    fn remove_if(
        &self,
        endpoint: &str,
        token: &str,
        matches: impl FnOnce(&Arc<dyn Observer>) -> bool,
    ) -> Result<()> {
        let mut endpoints = self.endpoints.write();
        let Some(observers) = endpoints.get_mut(endpoint) else {
            return Ok(());
        };

        let result = match observers.get(token) {
            Some(current) if matches(current) => {
                let cancelled = current.cancel().map_err(Error::Unsubscribe);
                observers.remove(token);
                debug!(endpoint = %endpoint, token = %token, "Removed observer");
                cancelled
            }
            _ => Ok(()),
        };

        if observers.is_empty() {
            endpoints.remove(endpoint);
        }
        result
    }

    /// Snapshot of the observers registered on `endpoint`.
    #[must_use]
    pub fn observers(&self, endpoint: &str) -> Vec<Arc<dyn Observer>> {
        self.endpoints
            .read()
            .get(endpoint)
            .map(|observers| observers.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of endpoints with at least one observer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    /// Returns `true` if no observers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    /// Number of observers on `endpoint`.
    #[must_use]
    pub fn endpoint_count(&self, endpoint: &str) -> usize {
        self.endpoints.read().get(endpoint).map_or(0, HashMap::len)
    }

    /// Spawn the waiter that removes `observer` from `endpoint` once its
    /// session ends.
    pub fn watch(self: &Arc<Self>, endpoint: String, observer: Arc<dyn Observer>) {
        let registry = Arc::clone(self);
        let done = observer.done();
        tokio::spawn(async move {
            done.cancelled().await;
            if let Err(e) = registry.remove_observer(&endpoint, &observer) {
                warn!(endpoint = %endpoint, token = %observer.token(), error = %e, "Failed to clean up observer");
            }
        });
    }
}
