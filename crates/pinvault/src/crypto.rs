//! AES-256-GCM primitives built on `ring`.
//!
//! Every call to [`encrypt`] draws a fresh random 96-bit nonce and binds the
//! key to exactly one nonce through [`SingleNonce`]. The ciphertext carries
//! the 128-bit authentication tag, so a wrong key or any tampering surfaces
//! as [`CryptoError::Decrypt`].

use ring::aead::{
    self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey,
};
use ring::rand::{SecureRandom, SystemRandom};

use crate::kdf::DerivedKey;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

/// Failures of the AEAD and randomness primitives.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The system CSPRNG failed.
    #[error("failed to generate random bytes")]
    Random,

    /// Sealing failed inside `ring`.
    #[error("encryption failed")]
    Encrypt,

    /// Authentication failed: wrong key, tampered ciphertext, or bad nonce.
    #[error("decryption failed")]
    Decrypt,
}

/// Yields exactly one nonce, so each bound key is used once.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

/// Encrypt `plaintext` under `key`.
///
/// Returns `(nonce, ciphertext)`; the ciphertext has the tag appended.
pub fn encrypt(
    plaintext: &[u8],
    key: &DerivedKey,
) -> Result<([u8; NONCE_LEN_BYTES], Vec<u8>), CryptoError> {
    let mut nonce_bytes = [0u8; NONCE_LEN_BYTES];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| CryptoError::Random)?;

    let unbound = UnboundKey::new(AEAD_ALG, key.as_bytes()).map_err(|_| CryptoError::Encrypt)?;
    let mut sealing_key = SealingKey::new(unbound, SingleNonce(Some(nonce_bytes)));

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::Encrypt)?;

    Ok((nonce_bytes, in_out))
}

/// Decrypt `ciphertext` (tag included) with `nonce` and `key`.
pub fn decrypt(
    nonce: &[u8; NONCE_LEN_BYTES],
    ciphertext: &[u8],
    key: &DerivedKey,
) -> Result<Vec<u8>, CryptoError> {
    let unbound = UnboundKey::new(AEAD_ALG, key.as_bytes()).map_err(|_| CryptoError::Decrypt)?;
    let mut opening_key = OpeningKey::new(unbound, SingleNonce(Some(*nonce)));

    let mut in_out = ciphertext.to_vec();
    let plaintext = opening_key
        .open_in_place(Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::Decrypt)?;

    Ok(plaintext.to_vec())
}

/// Generate `len` cryptographically secure random bytes.
pub fn random_bytes(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| CryptoError::Random)?;
    Ok(buf)
}
