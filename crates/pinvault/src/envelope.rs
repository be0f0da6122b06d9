//! Encrypted session envelope.
//!
//! Seals a [`CredentialPair`] under a key derived from the PIN with its own
//! salt and work factor, independent of the PIN verifier. Opening reports
//! every failure (bad encoding, wrong PIN, tampering, unparsable plaintext)
//! as the same [`DecryptFailure`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use zeroize::Zeroizing;

use crate::crypto::{self, CryptoError, NONCE_LEN_BYTES};
use crate::kdf;
use crate::records::{CredentialPair, SessionRecord};

/// Opening a [`SessionRecord`] failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session record could not be decrypted")]
pub struct DecryptFailure;

/// Seals and opens session records with a fixed work factor.
#[derive(Debug, Clone, Copy)]
pub struct SessionEnvelope {
    iterations: u32,
}

impl SessionEnvelope {
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Encrypt `credentials` under a fresh salt and nonce.
    pub fn seal(
        &self,
        pin: &str,
        credentials: &CredentialPair,
        created_at: i64,
    ) -> Result<SessionRecord, CryptoError> {
        let salt = kdf::random_salt_hex()?;
        let key = kdf::derive(pin, &salt, self.iterations).map_err(|_| CryptoError::Encrypt)?;

        let plaintext = Zeroizing::new(
            serde_json::to_vec(credentials).map_err(|_| CryptoError::Encrypt)?,
        );
        let (nonce, ciphertext) = crypto::encrypt(&plaintext, &key)?;

        Ok(SessionRecord {
            salt,
            iv: hex::encode(nonce),
            cipher: BASE64.encode(ciphertext),
            iterations: self.iterations,
            created_at,
        })
    }

    /// Decrypt `record` with `pin`, using the record's own salt and work
    /// factor.
    pub fn open(pin: &str, record: &SessionRecord) -> Result<CredentialPair, DecryptFailure> {
        let nonce: [u8; NONCE_LEN_BYTES] = hex::decode(&record.iv)
            .map_err(|_| DecryptFailure)?
            .try_into()
            .map_err(|_| DecryptFailure)?;
        let ciphertext = BASE64.decode(&record.cipher).map_err(|_| DecryptFailure)?;
        let key = kdf::derive(pin, &record.salt, record.iterations).map_err(|_| DecryptFailure)?;

        let plaintext =
            Zeroizing::new(crypto::decrypt(&nonce, &ciphertext, &key).map_err(|_| DecryptFailure)?);
        serde_json::from_slice(&plaintext).map_err(|_| DecryptFailure)
    }
}
