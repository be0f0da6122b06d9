//! Plain local preferences seam.
//!
//! A [`PreferenceStore`] holds small, non-secret string values (attempt
//! counters, timestamps, the development fallback for secure entries). It
//! needs no hardware protection.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};

/// Abstraction over the application's plain key-value preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Read the value stored under `key`.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store (or overwrite) the value under `key`.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> StoreResult<()>;
}

/// Process-local [`PreferenceStore`].
#[derive(Default)]
pub struct MemoryPreferences {
    entries: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryPreferences {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of all stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend {
                reason: "in-memory preferences configured to fail".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferences {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check()?;
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.check()?;
        self.lock().remove(key);
        Ok(())
    }
}
