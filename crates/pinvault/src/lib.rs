//! Device-local, PIN-gated session vault.
//!
//! Stores an access/refresh token pair encrypted at rest, unlockable only
//! with a short numeric PIN. Failed attempts are throttled with exponential
//! lock windows, and a server-side epoch counter invalidates every device's
//! vault when PIN policy changes.
//!
//! # Architecture
//!
//! - [`kdf`]: PBKDF2-HMAC-SHA256 key derivation and constant-time compare.
//! - [`crypto`]: AES-256-GCM primitives.
//! - [`envelope`]: seals the credential pair into a [`SessionRecord`].
//! - [`lockout`]: pure lockout transitions over [`VaultMetadata`].
//! - [`manager`]: the [`PinVault`] lifecycle (create, unlock, rotate, wipe,
//!   reconcile).
//! - [`cache`]: the in-memory credential cache and its observers.
//! - [`config`]: TOML configuration.
//!
//! Storage backends live in the `pinvault-store` crate.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pinvault::{CredentialCache, CredentialPair, PinVault, SetPinRequest, VaultConfig};
//! use pinvault_store::SqlitePreferences;
//! use pinvault_store::keychain::{DEFAULT_SERVICE, platform_secure_store};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = VaultConfig::load("config/vault.toml")?;
//! let vault = PinVault::new(
//!     platform_secure_store(DEFAULT_SERVICE),
//!     Arc::new(SqlitePreferences::open("data/prefs.db")?),
//!     Arc::new(CredentialCache::new()),
//!     config,
//! )?;
//!
//! vault
//!     .set_pin_for_session(SetPinRequest::new(
//!         "123456",
//!         CredentialPair::new("access", "refresh"),
//!         7,
//!         1,
//!     ))
//!     .await?;
//!
//! let outcome = vault.unlock("123456").await?;
//! assert_eq!(outcome.credentials.access_token, "access");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod lockout;
pub mod manager;
pub mod records;

pub use cache::{CredentialCache, CredentialEvent, SubscriptionId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BuildProfile, ConfigError, VaultConfig};
pub use envelope::{DecryptFailure, SessionEnvelope};
pub use error::{Result, VaultError};
pub use kdf::{DerivedKey, KdfError};
pub use lockout::{LockState, LockoutPolicy};
pub use manager::{
    PinVault, Reconciliation, SetPinRequest, UnlockOutcome, UpdateSessionRequest, VaultState,
    WipeOptions, WipeOutcome,
};
pub use records::{CredentialPair, PinRecord, PinStatus, SessionRecord, VaultMetadata};
