//! Platform secure stores.
//!
//! - **macOS**: Keychain Services via `security-framework`
//! - **Linux**: Secret Service (GNOME Keyring, KWallet) via `keyring`
//! - **Windows**: Credential Manager via `keyring`
//! - **Other targets**: [`UnsupportedSecureStore`], which reports every
//!   operation as unavailable so the adapter can decide whether a fallback
//!   is acceptable.
//!
//! All native calls block, so they run on `tokio::task::spawn_blocking`.
//! Each backend maps its own native errors to [`StoreError`]; nothing above
//! this module inspects error messages.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::secure::SecureStore;

/// Default service name for keychain entries.
pub const DEFAULT_SERVICE: &str = "com.pinvault.session";

// ---------------------------------------------------------------------------
// Unsupported targets
// ---------------------------------------------------------------------------

/// Secure store for targets without a supported OS keychain.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSecureStore;

impl UnsupportedSecureStore {
    fn unavailable() -> StoreError {
        StoreError::Unavailable {
            reason: format!("no secure store backend for {}", std::env::consts::OS),
        }
    }
}

#[async_trait]
impl SecureStore for UnsupportedSecureStore {
    async fn get(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
        Err(Self::unavailable())
    }

    async fn set(&self, _key: &str, _value: &[u8]) -> StoreResult<()> {
        Err(Self::unavailable())
    }

    async fn delete(&self, _key: &str) -> StoreResult<()> {
        Err(Self::unavailable())
    }

    fn backend_name(&self) -> &'static str {
        "unsupported"
    }
}

// ---------------------------------------------------------------------------
// macOS Keychain Services
// ---------------------------------------------------------------------------

/// `errSecItemNotFound`.
#[cfg(target_os = "macos")]
const MACOS_ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;

/// `errSecNotAvailable`: no keychain is available.
#[cfg(target_os = "macos")]
const MACOS_ERR_SEC_NOT_AVAILABLE: i32 = -25291;

/// `errSecInteractionNotAllowed`: keychain locked and no UI allowed.
#[cfg(target_os = "macos")]
const MACOS_ERR_SEC_INTERACTION_NOT_ALLOWED: i32 = -25308;

/// macOS Keychain Services backend storing each key as a generic password
/// under one service name.
#[cfg(target_os = "macos")]
#[derive(Debug, Clone)]
pub struct MacOSKeychain {
    service_name: String,
}

#[cfg(target_os = "macos")]
impl MacOSKeychain {
    /// Create a keychain backend for `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service_name: service.into(),
        }
    }

    fn map_error(err: security_framework::base::Error, op: &str) -> StoreError {
        match err.code() {
            MACOS_ERR_SEC_NOT_AVAILABLE | MACOS_ERR_SEC_INTERACTION_NOT_ALLOWED => {
                StoreError::Unavailable {
                    reason: format!("macOS keychain {op} refused: {err}"),
                }
            }
            _ => StoreError::Backend {
                reason: format!("macOS keychain {op} failed: {err}"),
            },
        }
    }
}

#[cfg(target_os = "macos")]
#[async_trait]
impl SecureStore for MacOSKeychain {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        use security_framework::passwords::get_generic_password;

        let service = self.service_name.clone();
        let account = key.to_string();
        tokio::task::spawn_blocking(move || match get_generic_password(&service, &account) {
            Ok(data) => Ok(Some(data.to_vec())),
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => Ok(None),
            Err(e) => Err(Self::map_error(e, "read")),
        })
        .await?
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        use security_framework::passwords::set_generic_password;

        let service = self.service_name.clone();
        let account = key.to_string();
        let value = value.to_vec();
        tokio::task::spawn_blocking(move || {
            set_generic_password(&service, &account, &value)
                .map_err(|e| Self::map_error(e, "write"))?;
            tracing::debug!(service = %service, key = %account, "stored entry in macOS keychain");
            Ok(())
        })
        .await?
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        use security_framework::passwords::delete_generic_password;

        let service = self.service_name.clone();
        let account = key.to_string();
        tokio::task::spawn_blocking(move || match delete_generic_password(&service, &account) {
            Ok(()) => Ok(()),
            Err(e) if e.code() == MACOS_ERR_SEC_ITEM_NOT_FOUND => Ok(()),
            Err(e) => Err(Self::map_error(e, "delete")),
        })
        .await?
    }

    fn backend_name(&self) -> &'static str {
        "macos-keychain"
    }
}

// ---------------------------------------------------------------------------
// Secret Service / Credential Manager
// ---------------------------------------------------------------------------

/// OS keyring backend (Linux Secret Service, Windows Credential Manager).
///
/// Values are stored base64-encoded because keyring entries are strings.
#[cfg(any(target_os = "linux", target_os = "windows"))]
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service_name: String,
}

#[cfg(any(target_os = "linux", target_os = "windows"))]
impl KeyringStore {
    /// Create a keyring backend for `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service_name: service.into(),
        }
    }

    fn entry(service: &str, key: &str) -> StoreResult<keyring::Entry> {
        keyring::Entry::new(service, key).map_err(map_keyring_error)
    }
}

#[cfg(any(target_os = "linux", target_os = "windows"))]
fn map_keyring_error(err: keyring::Error) -> StoreError {
    match err {
        keyring::Error::NoStorageAccess(e) => StoreError::Unavailable {
            reason: format!("keyring access denied: {e}"),
        },
        keyring::Error::PlatformFailure(e) => StoreError::Unavailable {
            reason: format!("keyring platform failure: {e}"),
        },
        keyring::Error::BadEncoding(_) => StoreError::Encoding {
            reason: "keyring entry is not valid UTF-8".into(),
        },
        other => StoreError::Backend {
            reason: format!("keyring error: {other}"),
        },
    }
}

#[cfg(any(target_os = "linux", target_os = "windows"))]
#[async_trait]
impl SecureStore for KeyringStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        use base64::Engine;

        let service = self.service_name.clone();
        let account = key.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = Self::entry(&service, &account)?;
            match entry.get_password() {
                Ok(encoded) => base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map(Some)
                    .map_err(|e| StoreError::Encoding {
                        reason: format!("keyring entry is not base64: {e}"),
                    }),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(map_keyring_error(e)),
            }
        })
        .await?
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        use base64::Engine;

        let service = self.service_name.clone();
        let account = key.to_string();
        let encoded = base64::engine::general_purpose::STANDARD.encode(value);
        tokio::task::spawn_blocking(move || {
            let entry = Self::entry(&service, &account)?;
            entry.set_password(&encoded).map_err(map_keyring_error)?;
            tracing::debug!(service = %service, key = %account, "stored entry in OS keyring");
            Ok(())
        })
        .await?
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let service = self.service_name.clone();
        let account = key.to_string();
        tokio::task::spawn_blocking(move || {
            let entry = Self::entry(&service, &account)?;
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(map_keyring_error(e)),
            }
        })
        .await?
    }

    fn backend_name(&self) -> &'static str {
        "os-keyring"
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Returns the OS secure store for the current platform.
///
/// Targets without a backend get [`UnsupportedSecureStore`]; whether that is
/// fatal is decided by the adapter's build profile, not here.
pub fn platform_secure_store(service: &str) -> Arc<dyn SecureStore> {
    let _ = &service;

    #[cfg(target_os = "macos")]
    {
        tracing::info!(service, "using macOS Keychain Services for secure storage");
        Arc::new(MacOSKeychain::new(service))
    }
    #[cfg(any(target_os = "linux", target_os = "windows"))]
    {
        tracing::info!(service, "using OS keyring for secure storage");
        Arc::new(KeyringStore::new(service))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        tracing::warn!("no secure storage backend for this platform");
        Arc::new(UnsupportedSecureStore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unsupported_store_is_unavailable() {
        let store = UnsupportedSecureStore;
        assert!(store.get("k").await.unwrap_err().is_unavailable());
        assert!(store.set("k", b"v").await.unwrap_err().is_unavailable());
        assert!(store.delete("k").await.unwrap_err().is_unavailable());
    }

    #[test]
    fn platform_store_has_a_name() {
        let store = platform_secure_store(DEFAULT_SERVICE);
        assert!(!store.backend_name().is_empty());
    }

    /// Touches the real OS keychain; CI machines usually have none unlocked.
    #[tokio::test]
    #[ignore = "requires an unlocked OS keychain, run manually with --ignored"]
    async fn platform_store_roundtrip() {
        let service = format!("{DEFAULT_SERVICE}.test.{}", std::process::id());
        let store = platform_secure_store(&service);

        let _ = store.delete("pin_record").await;
        assert!(store.get("pin_record").await.unwrap().is_none());

        store.set("pin_record", b"{\"salt\":\"00\"}").await.unwrap();
        assert_eq!(
            store.get("pin_record").await.unwrap().as_deref(),
            Some(&b"{\"salt\":\"00\"}"[..])
        );

        store.delete("pin_record").await.unwrap();
        store.delete("pin_record").await.unwrap();
    }
}
