//! Vault error types.
//!
//! Every public operation of [`PinVault`](crate::PinVault) returns
//! [`VaultError`]. The variants are deliberately coarse: a wrong PIN and a
//! corrupted record are only distinguishable as far as the remedy differs
//! (retry vs. log in again), so the vault cannot be used as an oracle.
//!
//! Lower-level failures (key derivation, AEAD, storage backends) are
//! translated at the call site and never cross this boundary.

/// Unified error type for the PIN vault.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    /// The vault is absent, incomplete, or undecryptable.
    #[error("no stored session")]
    NoSession,

    /// Unlock attempts are throttled.
    #[error("vault locked for another {remaining_ms} ms")]
    Locked { remaining_ms: u64 },

    /// The PIN did not match. `remaining_ms` is set when this failure engaged
    /// a lock window.
    #[error("invalid PIN")]
    InvalidPin { remaining_ms: Option<u64> },

    /// The secure store is missing or failing in a build that may not fall
    /// back.
    #[error("secure storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    /// The CSPRNG or a background task failed.
    #[error("internal vault error: {reason}")]
    Internal { reason: String },
}

impl VaultError {
    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoSession => "NO_SESSION",
            Self::Locked { .. } => "LOCKED",
            Self::InvalidPin { .. } => "INVALID_PIN",
            Self::StorageUnavailable { .. } => "STORAGE_UNAVAILABLE",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// Whether the caller should prompt again rather than force a re-login.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Locked { .. } | Self::InvalidPin { .. })
    }

    /// Milliseconds until the next attempt is allowed, if throttled.
    pub fn remaining_ms(&self) -> Option<u64> {
        match self {
            Self::Locked { remaining_ms } => Some(*remaining_ms),
            Self::InvalidPin { remaining_ms } => *remaining_ms,
            _ => None,
        }
    }
}

impl From<pinvault_store::StoreError> for VaultError {
    fn from(err: pinvault_store::StoreError) -> Self {
        Self::StorageUnavailable {
            reason: err.to_string(),
        }
    }
}

impl From<crate::crypto::CryptoError> for VaultError {
    fn from(err: crate::crypto::CryptoError) -> Self {
        Self::Internal {
            reason: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal {
            reason: format!("background task failed: {err}"),
        }
    }
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(VaultError::NoSession.kind(), "NO_SESSION");
        assert_eq!(VaultError::Locked { remaining_ms: 1 }.kind(), "LOCKED");
        assert_eq!(
            VaultError::InvalidPin { remaining_ms: None }.kind(),
            "INVALID_PIN"
        );
        assert_eq!(
            VaultError::StorageUnavailable { reason: "x".into() }.kind(),
            "STORAGE_UNAVAILABLE"
        );
        assert_eq!(VaultError::Internal { reason: "x".into() }.kind(), "INTERNAL");
    }

    #[test]
    fn only_throttling_errors_are_retryable() {
        assert!(VaultError::Locked { remaining_ms: 5 }.is_retryable());
        assert!(VaultError::InvalidPin { remaining_ms: None }.is_retryable());
        assert!(!VaultError::NoSession.is_retryable());
        assert!(!VaultError::StorageUnavailable { reason: "x".into() }.is_retryable());
    }

    #[test]
    fn remaining_ms_is_exposed() {
        assert_eq!(VaultError::Locked { remaining_ms: 7 }.remaining_ms(), Some(7));
        assert_eq!(
            VaultError::InvalidPin { remaining_ms: Some(4) }.remaining_ms(),
            Some(4)
        );
        assert_eq!(VaultError::NoSession.remaining_ms(), None);
    }

    #[test]
    fn store_errors_become_storage_unavailable() {
        let err: VaultError = pinvault_store::StoreError::Unavailable {
            reason: "no keyring".into(),
        }
        .into();
        assert_eq!(err.kind(), "STORAGE_UNAVAILABLE");
        assert!(err.to_string().contains("no keyring"));
    }
}
