//! Key derivation unit.
//!
//! PBKDF2-HMAC-SHA256 turns a PIN plus a hex salt into a 256-bit key. The
//! iteration count is a parameter because every stored record carries the
//! count it was created with, so raising the default never strands an
//! existing vault.
//!
//! Derived keys live in [`DerivedKey`], which zeroizes on drop and never
//! prints its bytes.

use std::num::NonZeroU32;

use ring::pbkdf2;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, CryptoError};

/// Length of a derived key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of a freshly generated salt in bytes.
pub const SALT_LEN: usize = 16;

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// Invalid derivation inputs.
#[derive(Debug, thiserror::Error)]
pub enum KdfError {
    /// The stored salt is not valid hex.
    #[error("salt is not valid hex")]
    InvalidSalt,

    /// A work factor of zero was requested.
    #[error("iteration count must be non-zero")]
    ZeroIterations,
}

/// A 256-bit key derived from a PIN, erased from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_LEN],
}

impl DerivedKey {
    /// Raw key bytes for cryptographic operations.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Lowercase hex form, as persisted in a PIN verifier.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Constant-time comparison against a stored hex verifier.
    ///
    /// Returns `None` if `expected_hex` is not valid hex.
    pub fn matches_hex(&self, expected_hex: &str) -> Option<bool> {
        let expected = hex::decode(expected_hex).ok()?;
        Some(constant_time_eq(&self.bytes, &expected))
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a 256-bit key from `pin`, a hex `salt_hex`, and `iterations`.
///
/// Deterministic and side-effect free. Cost grows linearly with
/// `iterations`; callers on an async runtime should run this on the
/// blocking pool.
///
/// # Errors
///
/// Returns [`KdfError::InvalidSalt`] for non-hex salts and
/// [`KdfError::ZeroIterations`] for a zero work factor.
pub fn derive(pin: &str, salt_hex: &str, iterations: u32) -> Result<DerivedKey, KdfError> {
    let iterations = NonZeroU32::new(iterations).ok_or(KdfError::ZeroIterations)?;
    let salt = hex::decode(salt_hex).map_err(|_| KdfError::InvalidSalt)?;

    let mut bytes = [0u8; KEY_LEN];
    pbkdf2::derive(PBKDF2_ALG, iterations, &salt, pin.as_bytes(), &mut bytes);

    tracing::trace!(iterations = iterations.get(), "derived key via PBKDF2");
    Ok(DerivedKey { bytes })
}

/// A fresh [`SALT_LEN`]-byte salt, hex-encoded.
pub fn random_salt_hex() -> Result<String, CryptoError> {
    Ok(hex::encode(crypto::random_bytes(SALT_LEN)?))
}

/// Constant-time equality; slices of different length are unequal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
