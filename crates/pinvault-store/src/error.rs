//! Storage error types.
//!
//! Every backend classifies its own native failures into [`StoreError`] so
//! that callers never have to inspect message strings to tell "the secure
//! store does not exist on this device" apart from "the write failed".

/// Unified error type for the pinvault storage seams.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing capability is not present on this device or build
    /// (missing native module, no Secret Service on the bus, locked-down
    /// keychain). This is the only variant that may trigger the development
    /// fallback.
    #[error("secure storage unavailable: {reason}")]
    Unavailable { reason: String },

    /// The backend exists but the operation failed.
    #[error("storage backend failed: {reason}")]
    Backend { reason: String },

    /// SQLite error from `rusqlite`.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored value could not be encoded or decoded.
    #[error("encoding error: {reason}")]
    Encoding { reason: String },

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl StoreError {
    /// Whether this error means the capability itself is missing.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_classified() {
        let err = StoreError::Unavailable {
            reason: "no keyring".into(),
        };
        assert!(err.is_unavailable());
        assert_eq!(err.to_string(), "secure storage unavailable: no keyring");

        let err = StoreError::Backend {
            reason: "write failed".into(),
        };
        assert!(!err.is_unavailable());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StoreError>();
    }
}
