//! Storage seams for the pinvault session vault.
//!
//! The vault persists two kinds of state: secrets that belong in the OS
//! secure store (the PIN verifier and the encrypted session) and small
//! non-secret metadata that lives in plain local preferences. This crate
//! defines both seams, ships the platform and in-memory backends, and owns
//! the adapter that decides what happens when the secure store is missing.
//!
//! # Modules
//!
//! - [`secure`]: the [`SecureStore`] trait and an in-memory backend.
//! - [`keychain`]: macOS Keychain, OS keyring, and unsupported-platform backends.
//! - [`preferences`]: the [`PreferenceStore`] trait and an in-memory backend.
//! - [`sqlite`]: SQLite-backed preferences.
//! - [`adapter`]: availability detection and the development fallback.
//! - [`error`]: unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pinvault_store::{FallbackPolicy, SecretStoreAdapter, SqlitePreferences};
//! use pinvault_store::keychain::{DEFAULT_SERVICE, platform_secure_store};
//!
//! # async fn example() -> pinvault_store::StoreResult<()> {
//! let prefs = Arc::new(SqlitePreferences::open("data/prefs.db")?);
//! let secrets = SecretStoreAdapter::new(
//!     platform_secure_store(DEFAULT_SERVICE),
//!     prefs,
//!     FallbackPolicy::Deny,
//! );
//!
//! secrets.set("pin_record", b"{}").await?;
//! let value = secrets.get("pin_record").await?;
//! assert!(value.is_some());
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod error;
pub mod keychain;
pub mod preferences;
pub mod secure;
pub mod sqlite;

pub use adapter::{Availability, DEFAULT_FALLBACK_PREFIX, FallbackPolicy, SecretStoreAdapter};
pub use error::{StoreError, StoreResult};
pub use keychain::{UnsupportedSecureStore, platform_secure_store};
pub use preferences::{MemoryPreferences, PreferenceStore};
pub use secure::{MemorySecureStore, SecureStore};
pub use sqlite::SqlitePreferences;
