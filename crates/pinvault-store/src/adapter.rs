//! Authenticated secret store adapter.
//!
//! [`SecretStoreAdapter`] sits in front of a [`SecureStore`] and a
//! [`PreferenceStore`]. The first operation probes the secure store and the
//! result is cached:
//!
//! ```text
//! Unknown ──ok──────────▶ Available
//!    │
//!    └──Unavailable──▶ Missing ──(development)──▶ mirror to preferences
//!                              └─(production)───▶ StoreError::Unavailable
//! ```
//!
//! While `Available`, every successful write or delete also scrubs the
//! fallback copy of that key, and a clean read miss scrubs any remnant, so a
//! device that gains a working secure store never reads stale plaintext.
//!
//! Fallback values are base64 strings stored under a namespaced prefix.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use base64::Engine;

use crate::error::{StoreError, StoreResult};
use crate::preferences::PreferenceStore;
use crate::secure::SecureStore;

/// Default namespace for fallback copies in the preferences store.
pub const DEFAULT_FALLBACK_PREFIX: &str = "securestore/fallback/";

/// Cached availability of the secure store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Not probed yet.
    Unknown,
    /// The secure store answered at least once.
    Available,
    /// The secure store reported the capability as unavailable.
    Missing,
}

impl Availability {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Available,
            2 => Self::Missing,
            _ => Self::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Available => 1,
            Self::Missing => 2,
        }
    }
}

/// Whether the adapter may degrade to the plaintext fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Development builds: mirror to the preferences store, warn once.
    AllowInsecure,
    /// Production builds: a missing secure store is fatal.
    Deny,
}

/// Secure store front with lazy availability detection and a development
/// fallback.
pub struct SecretStoreAdapter {
    secure: Arc<dyn SecureStore>,
    fallback: Arc<dyn PreferenceStore>,
    policy: FallbackPolicy,
    prefix: String,
    availability: AtomicU8,
    warned: AtomicBool,
}

impl SecretStoreAdapter {
    /// Create an adapter over `secure`, mirroring to `fallback` under
    /// [`DEFAULT_FALLBACK_PREFIX`] when `policy` allows it.
    pub fn new(
        secure: Arc<dyn SecureStore>,
        fallback: Arc<dyn PreferenceStore>,
        policy: FallbackPolicy,
    ) -> Self {
        Self {
            secure,
            fallback,
            policy,
            prefix: DEFAULT_FALLBACK_PREFIX.to_string(),
            availability: AtomicU8::new(Availability::Unknown.as_u8()),
            warned: AtomicBool::new(false),
        }
    }

    /// Use a custom fallback namespace.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Current cached availability.
    pub fn availability(&self) -> Availability {
        Availability::from_u8(self.availability.load(Ordering::SeqCst))
    }

    /// The configured fallback policy.
    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    /// The preferences key used for the fallback copy of `key`.
    pub fn fallback_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Read `key`.
    pub async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        if self.availability() == Availability::Missing {
            return self.fallback_get(key).await;
        }

        match self.secure.get(key).await {
            Ok(Some(value)) => {
                self.mark(Availability::Available);
                Ok(Some(value))
            }
            Ok(None) => {
                self.mark(Availability::Available);
                self.scrub_fallback(key).await;
                Ok(None)
            }
            Err(err) if err.is_unavailable() => {
                self.on_unavailable(err)?;
                self.fallback_get(key).await
            }
            Err(err) => Err(err),
        }
    }

    /// Store `value` under `key`.
    pub async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        if self.availability() == Availability::Missing {
            return self.fallback_set(key, value).await;
        }

        match self.secure.set(key, value).await {
            Ok(()) => {
                self.mark(Availability::Available);
                self.scrub_fallback(key).await;
                Ok(())
            }
            Err(err) if err.is_unavailable() => {
                self.on_unavailable(err)?;
                self.fallback_set(key, value).await
            }
            Err(err) => Err(err),
        }
    }

    /// Delete `key`. Idempotent.
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        if self.availability() == Availability::Missing {
            self.ensure_fallback_allowed()?;
            return self.fallback.remove(&self.fallback_key(key)).await;
        }

        match self.secure.delete(key).await {
            Ok(()) => {
                self.mark(Availability::Available);
                self.scrub_fallback(key).await;
                Ok(())
            }
            Err(err) if err.is_unavailable() => {
                self.on_unavailable(err)?;
                self.fallback.remove(&self.fallback_key(key)).await
            }
            Err(err) => Err(err),
        }
    }

    // -- internals ----------------------------------------------------------

    fn mark(&self, availability: Availability) {
        let previous = self
            .availability
            .swap(availability.as_u8(), Ordering::SeqCst);
        if previous != availability.as_u8() {
            tracing::debug!(
                backend = self.secure.backend_name(),
                state = ?availability,
                "secure store availability resolved"
            );
        }
    }

    fn ensure_fallback_allowed(&self) -> StoreResult<()> {
        match self.policy {
            FallbackPolicy::AllowInsecure => Ok(()),
            FallbackPolicy::Deny => Err(StoreError::Unavailable {
                reason: format!(
                    "secure store '{}' is missing and fallback is disabled",
                    self.secure.backend_name()
                ),
            }),
        }
    }

    /// Record a missing secure store and decide whether to continue.
    fn on_unavailable(&self, err: StoreError) -> StoreResult<()> {
        self.mark(Availability::Missing);
        match self.policy {
            FallbackPolicy::AllowInsecure => {
                if !self.warned.swap(true, Ordering::SeqCst) {
                    tracing::warn!(
                        backend = self.secure.backend_name(),
                        error = %err,
                        "secure store unavailable; using plaintext preferences fallback (development only)"
                    );
                }
                Ok(())
            }
            FallbackPolicy::Deny => {
                tracing::error!(
                    backend = self.secure.backend_name(),
                    error = %err,
                    "secure store unavailable in a production build"
                );
                Err(err)
            }
        }
    }

    async fn fallback_get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.ensure_fallback_allowed()?;
        let Some(encoded) = self.fallback.get(&self.fallback_key(key)).await? else {
            return Ok(None);
        };
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|e| StoreError::Encoding {
                reason: format!("fallback entry is not base64: {e}"),
            })
    }

    async fn fallback_set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.ensure_fallback_allowed()?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(value);
        self.fallback.set(&self.fallback_key(key), &encoded).await
    }

    async fn scrub_fallback(&self, key: &str) {
        if let Err(err) = self.fallback.remove(&self.fallback_key(key)).await {
            tracing::debug!(key, error = %err, "could not scrub fallback copy");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::MemoryPreferences;
    use crate::secure::MemorySecureStore;

    fn adapter(
        secure: MemorySecureStore,
        policy: FallbackPolicy,
    ) -> (SecretStoreAdapter, Arc<MemorySecureStore>, Arc<MemoryPreferences>) {
        let secure = Arc::new(secure);
        let prefs = Arc::new(MemoryPreferences::new());
        let adapter = SecretStoreAdapter::new(secure.clone(), prefs.clone(), policy);
        (adapter, secure, prefs)
    }

    #[tokio::test]
    async fn available_store_resolves_on_first_use() {
        let (adapter, secure, prefs) =
            adapter(MemorySecureStore::new(), FallbackPolicy::AllowInsecure);
        assert_eq!(adapter.availability(), Availability::Unknown);

        adapter.set("pin_record", b"{}").await.unwrap();
        assert_eq!(adapter.availability(), Availability::Available);
        assert!(secure.contains("pin_record"));
        assert!(prefs.keys().is_empty());
    }

    #[tokio::test]
    async fn write_clears_stale_fallback_copy() {
        let (adapter, _secure, prefs) =
            adapter(MemorySecureStore::new(), FallbackPolicy::AllowInsecure);
        prefs
            .set(&adapter.fallback_key("pin_record"), "c3RhbGU=")
            .await
            .unwrap();

        adapter.set("pin_record", b"fresh").await.unwrap();
        assert!(prefs.keys().is_empty());
    }

    #[tokio::test]
    async fn clean_miss_scrubs_fallback_remnant() {
        let (adapter, _secure, prefs) =
            adapter(MemorySecureStore::new(), FallbackPolicy::AllowInsecure);
        prefs
            .set(&adapter.fallback_key("pin_session"), "c3RhbGU=")
            .await
            .unwrap();

        assert!(adapter.get("pin_session").await.unwrap().is_none());
        assert!(prefs.keys().is_empty());
    }

    #[tokio::test]
    async fn missing_store_mirrors_to_fallback_in_development() {
        let (adapter, _secure, prefs) =
            adapter(MemorySecureStore::unavailable(), FallbackPolicy::AllowInsecure);

        adapter.set("pin_record", b"record").await.unwrap();
        assert_eq!(adapter.availability(), Availability::Missing);
        assert_eq!(prefs.keys(), vec!["securestore/fallback/pin_record".to_string()]);

        let value = adapter.get("pin_record").await.unwrap();
        assert_eq!(value.as_deref(), Some(&b"record"[..]));

        adapter.delete("pin_record").await.unwrap();
        assert!(adapter.get("pin_record").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_store_is_fatal_in_production() {
        let (adapter, _secure, prefs) =
            adapter(MemorySecureStore::unavailable(), FallbackPolicy::Deny);

        let err = adapter.set("pin_record", b"record").await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(adapter.availability(), Availability::Missing);
        assert!(prefs.keys().is_empty());

        // Cached: later reads fail without probing again.
        assert!(adapter.get("pin_record").await.unwrap_err().is_unavailable());
        assert!(adapter.delete("pin_record").await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn backend_errors_do_not_trigger_fallback() {
        let (adapter, secure, prefs) =
            adapter(MemorySecureStore::new(), FallbackPolicy::AllowInsecure);
        secure.set("k", b"v").await.unwrap();
        secure.fail_next_deletes(1);

        let err = adapter.delete("k").await.unwrap_err();
        assert!(!err.is_unavailable());
        assert_ne!(adapter.availability(), Availability::Missing);
        assert!(prefs.keys().is_empty());
    }

    #[tokio::test]
    async fn custom_prefix_is_used() {
        let secure: Arc<dyn SecureStore> = Arc::new(MemorySecureStore::unavailable());
        let prefs = Arc::new(MemoryPreferences::new());
        let adapter = SecretStoreAdapter::new(secure, prefs.clone(), FallbackPolicy::AllowInsecure)
            .with_prefix("dev/");

        adapter.set("k", b"v").await.unwrap();
        assert_eq!(prefs.keys(), vec!["dev/k".to_string()]);
    }
}
