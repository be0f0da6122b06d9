//! Integration tests for the pinvault crate.
//!
//! These tests drive the full vault lifecycle over SQLite preferences and
//! the in-memory secure store: setup, unlock with lockout, rotation, epoch
//! invalidation, wipe, and the credential observers.

use std::sync::{Arc, Mutex};

use pinvault::{
    BuildProfile, CredentialCache, CredentialEvent, CredentialPair, LockoutPolicy, ManualClock,
    PinStatus, PinVault, Reconciliation, SessionEnvelope, SetPinRequest, UpdateSessionRequest,
    VaultConfig, VaultError, WipeOptions,
};
use pinvault_store::{MemorySecureStore, SecureStore, SqlitePreferences};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config() -> VaultConfig {
    VaultConfig {
        profile: BuildProfile::Production,
        pin_iterations: 1_000,
        session_iterations: 1_500,
        ..VaultConfig::default()
    }
}

struct Fixture {
    vault: PinVault,
    clock: Arc<ManualClock>,
    secure: Arc<MemorySecureStore>,
}

fn fixture() -> Fixture {
    init_tracing();
    let secure = Arc::new(MemorySecureStore::new());
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let vault = PinVault::new(
        secure.clone(),
        Arc::new(SqlitePreferences::open_in_memory().unwrap()),
        Arc::new(CredentialCache::new()),
        test_config(),
    )
    .unwrap()
    .with_clock(clock.clone());
    Fixture {
        vault,
        clock,
        secure,
    }
}

async fn create(vault: &PinVault, pin: &str, epoch: i64) {
    vault
        .set_pin_for_session(SetPinRequest::new(pin, CredentialPair::new("A", "B"), 7, epoch))
        .await
        .unwrap();
}

// ═══════════════════════════════════════════════════════════════════════
//  Reference scenario
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn create_fail_unlock_then_epoch_invalidation() {
    let f = fixture();
    create(&f.vault, "123456", 1).await;

    let err = f.vault.unlock("000000").await.unwrap_err();
    assert_eq!(err, VaultError::InvalidPin { remaining_ms: None });
    let meta = f.vault.metadata().await.unwrap().unwrap();
    assert_eq!(meta.attempt_count, 1);
    assert_eq!(meta.lock_until_ts, None);

    let outcome = f.vault.unlock("123456").await.unwrap();
    assert_eq!(outcome.credentials, CredentialPair::new("A", "B"));
    assert_eq!(outcome.metadata.attempt_count, 0);

    let result = f.vault.reconcile(&PinStatus::new(true, 2)).await.unwrap();
    assert_eq!(result, Reconciliation::EpochChanged);
    assert!(!f.vault.inspect_state().await.unwrap().has_secure_session);
    assert!(f.vault.cache().current().is_none());
}

// ═══════════════════════════════════════════════════════════════════════
//  Envelope properties
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn envelope_roundtrips_and_rejects_other_pins() {
    let envelope = SessionEnvelope::new(1_000);
    let cases = [
        ("000000", CredentialPair::new("", "")),
        ("123456", CredentialPair::new("A", "B")),
        ("987654", CredentialPair::new("eyJhbGciOi.x.y", "r-\u{e9}\u{4e2d}")),
    ];

    for (pin, credentials) in &cases {
        let record = envelope.seal(pin, credentials, 0).unwrap();
        assert_eq!(&SessionEnvelope::open(pin, &record).unwrap(), credentials);

        for (other, _) in &cases {
            if other != pin {
                assert!(SessionEnvelope::open(other, &record).is_err());
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Lockout
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn lock_duration_is_monotonic_and_capped() {
    let policy = LockoutPolicy::default();
    for n in 0..100 {
        assert!(policy.lock_duration_ms(n) <= policy.lock_duration_ms(n + 1));
        assert!(policy.lock_duration_ms(n) <= policy.max_lock_ms);
    }
}

#[tokio::test]
async fn success_resets_after_long_failure_history() {
    let f = fixture();
    create(&f.vault, "123456", 1).await;

    for _ in 0..8 {
        let err = f.vault.unlock("111111").await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidPin { .. }));

        let lock = f.vault.lock_state().await.unwrap().unwrap();
        assert!(lock.remaining_ms <= 900_000);
        f.clock.advance(i64::try_from(lock.remaining_ms).unwrap());
    }
    assert_eq!(f.vault.metadata().await.unwrap().unwrap().attempt_count, 8);

    let outcome = f.vault.unlock("123456").await.unwrap();
    assert_eq!(outcome.metadata.attempt_count, 0);
    assert_eq!(outcome.metadata.lock_until_ts, None);
}

#[tokio::test]
async fn lock_is_enforced_before_pin_check() {
    let f = fixture();
    create(&f.vault, "123456", 1).await;
    f.vault.unlock("1").await.unwrap_err();
    f.vault.unlock("2").await.unwrap_err();

    // Even the correct PIN is refused, and the counter does not move.
    let err = f.vault.unlock("123456").await.unwrap_err();
    assert!(matches!(err, VaultError::Locked { .. }));
    assert!(err.is_retryable());
    assert_eq!(f.vault.metadata().await.unwrap().unwrap().attempt_count, 2);
}

#[tokio::test]
async fn lock_survives_a_new_vault_instance() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.db");
    let secure = Arc::new(MemorySecureStore::new());
    let clock = Arc::new(ManualClock::new(0));

    let open = || {
        PinVault::new(
            secure.clone(),
            Arc::new(SqlitePreferences::open(&path).unwrap()),
            Arc::new(CredentialCache::new()),
            test_config(),
        )
        .unwrap()
        .with_clock(clock.clone())
    };

    let first = open();
    create(&first, "123456", 1).await;
    first.unlock("1").await.unwrap_err();
    first.unlock("2").await.unwrap_err();
    drop(first);

    let second = open();
    assert!(matches!(
        second.unlock("123456").await,
        Err(VaultError::Locked { .. })
    ));
}

// ═══════════════════════════════════════════════════════════════════════
//  Wipe and reconciliation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn wipe_twice_never_fails() {
    let f = fixture();
    create(&f.vault, "123456", 1).await;

    for _ in 0..2 {
        let outcome = f.vault.wipe(WipeOptions::default()).await;
        assert!(outcome.is_complete());
        assert!(!f.vault.inspect_state().await.unwrap().has_secure_session);
    }
    assert!(f.secure.is_empty());
    assert_eq!(f.vault.unlock("123456").await, Err(VaultError::NoSession));
}

#[tokio::test]
async fn any_epoch_change_invalidates() {
    for server_epoch in [0, 2, 42, -1] {
        let f = fixture();
        create(&f.vault, "123456", 1).await;
        assert!(
            f.vault
                .wipe_if_epoch_changed(&PinStatus::new(true, server_epoch))
                .await
                .unwrap()
        );
        assert!(!f.vault.inspect_state().await.unwrap().has_secure_session);
    }
}

#[tokio::test]
async fn server_disable_wipes() {
    let f = fixture();
    create(&f.vault, "123456", 1).await;
    let status: PinStatus =
        serde_json::from_str(r#"{"pin_enabled":false,"pin_set":true,"pin_epoch":1}"#).unwrap();

    assert_eq!(
        f.vault.reconcile(&status).await.unwrap(),
        Reconciliation::Disabled
    );
    assert!(f.vault.metadata().await.unwrap().is_none());
}

#[tokio::test]
async fn account_switch_clears_everything() {
    let f = fixture();
    create(&f.vault, "123456", 1).await;

    f.vault.reset_for_user(99).await;
    assert!(f.vault.metadata().await.unwrap().is_none());
    assert!(f.secure.is_empty());
    assert!(f.vault.cache().current().is_none());
}

// ═══════════════════════════════════════════════════════════════════════
//  Rotation and observers
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn observers_follow_the_session_lifecycle() {
    let f = fixture();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    f.vault.cache().subscribe(move |event| {
        let label = match event {
            CredentialEvent::Updated(pair) => format!("updated:{}", pair.access_token),
            CredentialEvent::Cleared => "cleared".to_string(),
        };
        sink.lock().unwrap().push(label);
    });

    create(&f.vault, "123456", 1).await;
    f.vault.unlock("123456").await.unwrap();
    let status = PinStatus::new(true, 1);
    f.vault
        .update_session_after_unlock(
            UpdateSessionRequest::new("123456", CredentialPair::new("A2", "B2"), &status)
                .username("ada"),
        )
        .await
        .unwrap();
    f.vault.wipe(WipeOptions::default()).await;

    assert_eq!(*events.lock().unwrap(), vec![
        "updated:A",
        "updated:A",
        "updated:A2",
        "cleared"
    ]);
}

#[tokio::test]
async fn rotation_keeps_pin_record() {
    let f = fixture();
    create(&f.vault, "123456", 1).await;
    let before = f.secure.get("pin_record").await.unwrap();

    let status = PinStatus::new(true, 4);
    let meta = f
        .vault
        .update_session_after_unlock(UpdateSessionRequest::new(
            "123456",
            CredentialPair::new("A2", "B2"),
            &status,
        ))
        .await
        .unwrap();

    assert_eq!(meta.pin_epoch_local, 4);
    assert_eq!(f.secure.get("pin_record").await.unwrap(), before);
    f.vault.cache().clear();
    assert_eq!(
        f.vault.unlock("123456").await.unwrap().credentials,
        CredentialPair::new("A2", "B2")
    );
}
