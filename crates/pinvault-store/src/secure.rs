//! Hardware-backed secret storage seam.
//!
//! A [`SecureStore`] is a small key-value store whose values are protected by
//! the operating system (Keychain, Credential Manager, Secret Service,
//! Android Keystore, ...). Implementations report a missing capability as
//! [`StoreError::Unavailable`] and everything else as a regular failure.
//!
//! [`MemorySecureStore`] keeps values in process memory. It backs tests and
//! embedders that provide their own protection, and it can simulate an
//! unavailable device or a flaky delete.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over platform-specific secure key-value storage.
///
/// Every operation is fallible and individually atomic per key. Deleting a
/// key that does not exist is not an error.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Read the value stored under `key`, or `None` on a clean miss.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store (or overwrite) the value under `key`.
    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove `key`.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Process-local [`SecureStore`].
#[derive(Default)]
pub struct MemorySecureStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
    failing_deletes: AtomicUsize,
}

impl MemorySecureStore {
    /// Create an empty, available store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that reports [`StoreError::Unavailable`] for every
    /// operation, like a build without the native secure-store module.
    pub fn unavailable() -> Self {
        let store = Self::default();
        store.unavailable.store(true, Ordering::SeqCst);
        store
    }

    /// Make the next `count` deletions fail with a backend error.
    pub fn fail_next_deletes(&self, count: usize) {
        self.failing_deletes.store(count, Ordering::SeqCst);
    }

    /// Whether `key` currently holds a value.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "in-memory secure store configured as unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.check_available()?;
        self.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_available()?;
        let pending = self.failing_deletes.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_deletes.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Backend {
                reason: format!("injected delete failure for {key}"),
            });
        }
        self.lock().remove(key);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
