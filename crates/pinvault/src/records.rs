//! Persisted record types.
//!
//! | Key           | Store        | Type             |
//! |---------------|--------------|------------------|
//! | `pin_record`  | secure       | [`PinRecord`]    |
//! | `pin_session` | secure       | [`SessionRecord`]|
//! | `pin_meta`    | preferences  | [`VaultMetadata`]|
//!
//! All three are JSON with camelCase field names. Key names are part of the
//! on-device format and must not change between releases.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::kdf::{self, KdfError};

/// Secure-store key of the PIN verifier.
pub const PIN_RECORD_KEY: &str = "pin_record";

/// Secure-store key of the encrypted session.
pub const SESSION_RECORD_KEY: &str = "pin_session";

/// Preferences key of the vault metadata.
pub const METADATA_KEY: &str = "pin_meta";

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// The access/refresh token pair issued by the identity service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PIN verifier
// ---------------------------------------------------------------------------

/// Proof used to verify a PIN without decrypting anything.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinRecord {
    pub salt: String,
    pub hash: String,
    pub iterations: u32,
    pub created_at: i64,
}

impl PinRecord {
    /// Build a verifier for `pin` with a fresh salt.
    ///
    /// CPU-bound; run on the blocking pool.
    pub fn create(pin: &str, iterations: u32, created_at: i64) -> crate::Result<Self> {
        let salt = kdf::random_salt_hex()?;
        let hash = kdf::derive(pin, &salt, iterations)
            .map_err(|e| crate::VaultError::Internal {
                reason: e.to_string(),
            })?
            .to_hex();
        Ok(Self {
            salt,
            hash,
            iterations,
            created_at,
        })
    }

    /// Recompute the verifier for `pin` and compare in constant time.
    ///
    /// `Ok(None)` means the stored hash is not hex, i.e. the record is
    /// corrupt.
    pub fn verify(&self, pin: &str) -> Result<Option<bool>, KdfError> {
        let key = kdf::derive(pin, &self.salt, self.iterations)?;
        Ok(key.matches_hex(&self.hash))
    }
}

impl std::fmt::Debug for PinRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinRecord")
            .field("iterations", &self.iterations)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Encrypted session
// ---------------------------------------------------------------------------

/// The encrypted credential payload. Produced by
/// [`SessionEnvelope::seal`](crate::envelope::SessionEnvelope::seal).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Hex salt of the session key derivation.
    pub salt: String,
    /// Hex AES-GCM nonce.
    pub iv: String,
    /// Base64 ciphertext with the authentication tag appended.
    pub cipher: String,
    pub iterations: u32,
    pub created_at: i64,
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("iterations", &self.iterations)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Non-secret lockout and identity state, stored in plain preferences.
///
/// Decoding is tolerant: missing fields take their defaults so older or
/// partially written documents still load.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VaultMetadata {
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub pin_enabled_local: bool,
    pub pin_epoch_local: i64,
    pub attempt_count: u32,
    pub last_attempt_ts: i64,
    pub lock_until_ts: Option<i64>,
    pub last_unlocked_at: Option<i64>,
}

impl VaultMetadata {
    /// Fresh metadata for a newly created vault.
    pub fn fresh(user_id: i64, pin_epoch: i64, now_ms: i64) -> Self {
        Self {
            user_id,
            pin_enabled_local: true,
            pin_epoch_local: pin_epoch,
            last_attempt_ts: now_ms,
            ..Self::default()
        }
    }

    /// Decode a stored document; malformed JSON yields `None`.
    pub fn decode(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed vault metadata");
                None
            }
        }
    }

    pub fn encode(&self) -> String {
        // Plain data with string keys cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Server status
// ---------------------------------------------------------------------------

/// PIN status as reported by the identity service.
///
/// Only `pin_enabled` and `pin_epoch` drive vault behavior; the remaining
/// fields are carried for display.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PinStatus {
    pub pin_enabled: bool,
    #[serde(default)]
    pub pin_set: bool,
    #[serde(default)]
    pub pin_epoch: i64,
    #[serde(default)]
    pub pin_failed_attempts: Option<u32>,
    #[serde(default)]
    pub pin_locked_until: Option<String>,
    #[serde(default)]
    pub pin_initialized_at: Option<String>,
}

impl PinStatus {
    pub fn new(pin_enabled: bool, pin_epoch: i64) -> Self {
        Self {
            pin_enabled,
            pin_set: pin_enabled,
            pin_epoch,
            ..Self::default()
        }
    }
}
