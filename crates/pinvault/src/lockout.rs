//! Lockout state machine.
//!
//! Pure transitions over [`VaultMetadata`]; the machine keeps no state of
//! its own, so it is safe to recompute after a restart. Lock windows double
//! per failure:
//!
//! ```text
//! lock_duration_ms(n) = min(max_lock_ms, base_ms * 2^min(n, max_exponent))
//! ```
//!
//! A window is only written once the failure count reaches
//! `lock_after_attempts`; below that the counter grows without throttling.

use serde::{Deserialize, Serialize};

use crate::records::VaultMetadata;

/// Default base window (1 second).
pub const DEFAULT_BASE_MS: u64 = 1_000;

/// Default cap on a single lock window (15 minutes).
pub const DEFAULT_MAX_LOCK_MS: u64 = 15 * 60 * 1_000;

/// Default cap on the backoff exponent.
pub const DEFAULT_MAX_EXPONENT: u32 = 5;

/// Default number of consecutive failures before a window is enforced.
pub const DEFAULT_LOCK_AFTER_ATTEMPTS: u32 = 2;

/// Backoff parameters.
///
/// With `lock_after_attempts = 1` the very first failure opens a window of
/// `lock_duration_ms(1)`; the default of 2 lets one typo through unthrottled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutPolicy {
    pub base_ms: u64,
    pub max_lock_ms: u64,
    pub max_exponent: u32,
    pub lock_after_attempts: u32,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            base_ms: DEFAULT_BASE_MS,
            max_lock_ms: DEFAULT_MAX_LOCK_MS,
            max_exponent: DEFAULT_MAX_EXPONENT,
            lock_after_attempts: DEFAULT_LOCK_AFTER_ATTEMPTS,
        }
    }
}

/// Result of a lock check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockState {
    pub locked: bool,
    pub remaining_ms: u64,
}

impl LockState {
    pub const OPEN: Self = Self {
        locked: false,
        remaining_ms: 0,
    };
}

impl LockoutPolicy {
    /// Window length after `attempt_count` consecutive failures. Zero when
    /// there have been no failures.
    pub fn lock_duration_ms(&self, attempt_count: u32) -> u64 {
        if attempt_count == 0 {
            return 0;
        }
        let exponent = attempt_count.min(self.max_exponent);
        self.base_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.max_lock_ms)
    }

    /// Metadata after one more failed attempt at `now_ms`.
    pub fn record_failure(&self, meta: &VaultMetadata, now_ms: i64) -> VaultMetadata {
        let attempt_count = meta.attempt_count.saturating_add(1);
        let duration = self.lock_duration_ms(attempt_count);
        let lock_until_ts = (attempt_count >= self.lock_after_attempts && duration > 0)
            .then(|| now_ms.saturating_add(i64::try_from(duration).unwrap_or(i64::MAX)));

        VaultMetadata {
            attempt_count,
            last_attempt_ts: now_ms,
            lock_until_ts,
            ..meta.clone()
        }
    }

    /// Metadata after a successful unlock at `now_ms`.
    pub fn record_success(&self, meta: &VaultMetadata, now_ms: i64) -> VaultMetadata {
        VaultMetadata {
            attempt_count: 0,
            last_attempt_ts: now_ms,
            lock_until_ts: None,
            last_unlocked_at: Some(now_ms),
            ..meta.clone()
        }
    }

    /// Metadata with the counters cleared but no unlock recorded.
    pub fn clear_attempts(&self, meta: &VaultMetadata, now_ms: i64) -> VaultMetadata {
        VaultMetadata {
            attempt_count: 0,
            last_attempt_ts: now_ms,
            lock_until_ts: None,
            ..meta.clone()
        }
    }

    /// Whether `meta` refuses attempts at `now_ms`. Expired windows are open.
    pub fn check_lock(&self, meta: &VaultMetadata, now_ms: i64) -> LockState {
        match meta.lock_until_ts {
            Some(until) if until > now_ms => LockState {
                locked: true,
                remaining_ms: u64::try_from(until - now_ms).unwrap_or(u64::MAX),
            },
            _ => LockState::OPEN,
        }
    }
}
