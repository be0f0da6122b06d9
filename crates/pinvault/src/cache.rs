//! In-memory credential cache.
//!
//! Holds the unlocked [`CredentialPair`] for the HTTP layer and broadcasts
//! changes to in-process observers. Delivery is synchronous and follows
//! subscription order: when [`CredentialCache::set`] or
//! [`CredentialCache::clear`] returns, every observer has seen the event.
//!
//! # Usage
//!
//! ```rust
//! # use pinvault::cache::{CredentialCache, CredentialEvent};
//! # use pinvault::CredentialPair;
//! let cache = CredentialCache::new();
//! let id = cache.subscribe(|event| {
//!     if let CredentialEvent::Cleared = event {
//!         // drop any derived state
//!     }
//! });
//!
//! cache.set(CredentialPair::new("access", "refresh"));
//! assert_eq!(cache.access_token().as_deref(), Some("access"));
//!
//! cache.clear();
//! assert!(cache.unsubscribe(id));
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::records::CredentialPair;

/// A change to the cached credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialEvent {
    /// New credentials were cached (unlock, PIN setup, or rotation).
    Updated(CredentialPair),
    /// The cache was emptied.
    Cleared,
}

/// Handle returned by [`CredentialCache::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Arc<dyn Fn(&CredentialEvent) + Send + Sync>;

/// Shared holder of the unlocked credentials.
#[derive(Default)]
pub struct CredentialCache {
    current: RwLock<Option<CredentialPair>>,
    observers: Mutex<Vec<(SubscriptionId, Observer)>>,
    next_id: AtomicU64,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the cached pair.
    pub fn current(&self) -> Option<CredentialPair> {
        self.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().as_ref().map(|pair| pair.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().as_ref().map(|pair| pair.refresh_token.clone())
    }

    pub fn is_populated(&self) -> bool {
        self.read().is_some()
    }

    /// Replace the cached pair and notify observers.
    pub fn set(&self, credentials: CredentialPair) {
        {
            let mut slot = self.current.write().unwrap_or_else(|e| e.into_inner());
            *slot = Some(credentials.clone());
        }
        self.publish(&CredentialEvent::Updated(credentials));
    }

    /// Empty the cache. Observers are only notified if something was cached.
    pub fn clear(&self) {
        let previous = self
            .current
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if previous.is_some() {
            self.publish(&CredentialEvent::Cleared);
        }
    }

    /// Register `observer`; it sees every later event, after all observers
    /// registered before it.
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&CredentialEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let observer: Observer = Arc::new(observer);
        self.observers().push((id, observer));
        tracing::trace!(id = id.0, "credential observer subscribed");
        id
    }

    /// Remove an observer. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        before != observers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.observers().len()
    }

    fn publish(&self, event: &CredentialEvent) {
        // Snapshot so observers may subscribe or unsubscribe re-entrantly.
        let snapshot: Vec<Observer> = self
            .observers()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in snapshot {
            observer(event);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<CredentialPair>> {
        self.current.read().unwrap_or_else(|e| e.into_inner())
    }

    fn observers(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Observer)>> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("populated", &self.is_populated())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
