//! Integration tests for the pinvault-store crate.
//!
//! These tests run the secret store adapter over real SQLite preferences and
//! the in-memory secure store, covering the fallback lifecycle end to end.

use std::sync::Arc;

use pinvault_store::{
    Availability, FallbackPolicy, MemorySecureStore, PreferenceStore, SecretStoreAdapter,
    SecureStore, SqlitePreferences,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ═══════════════════════════════════════════════════════════════════════
//  Fallback lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn development_fallback_survives_restart() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.db");

    {
        let prefs = Arc::new(SqlitePreferences::open(&path).unwrap());
        let adapter = SecretStoreAdapter::new(
            Arc::new(MemorySecureStore::unavailable()),
            prefs.clone(),
            FallbackPolicy::AllowInsecure,
        );
        adapter.set("pin_session", b"{\"cipher\":\"...\"}").await.unwrap();
        assert_eq!(adapter.availability(), Availability::Missing);

        // Stored as base64 under the namespaced key, never raw.
        let raw = prefs
            .get("securestore/fallback/pin_session")
            .await
            .unwrap()
            .unwrap();
        assert!(!raw.contains("cipher"));
    }

    let prefs = Arc::new(SqlitePreferences::open(&path).unwrap());
    let adapter = SecretStoreAdapter::new(
        Arc::new(MemorySecureStore::unavailable()),
        prefs,
        FallbackPolicy::AllowInsecure,
    );
    assert_eq!(
        adapter.get("pin_session").await.unwrap().as_deref(),
        Some(&b"{\"cipher\":\"...\"}"[..])
    );
}

#[tokio::test]
async fn secure_store_appearing_scrubs_old_fallback() {
    init_tracing();
    let prefs = Arc::new(SqlitePreferences::open_in_memory().unwrap());

    let degraded = SecretStoreAdapter::new(
        Arc::new(MemorySecureStore::unavailable()),
        prefs.clone(),
        FallbackPolicy::AllowInsecure,
    );
    degraded.set("pin_record", b"old").await.unwrap();
    assert!(
        prefs
            .get("securestore/fallback/pin_record")
            .await
            .unwrap()
            .is_some()
    );

    // Next launch: the secure store works again.
    let secure = Arc::new(MemorySecureStore::new());
    let healthy = SecretStoreAdapter::new(secure.clone(), prefs.clone(), FallbackPolicy::AllowInsecure);

    assert!(healthy.get("pin_record").await.unwrap().is_none());
    assert!(
        prefs
            .get("securestore/fallback/pin_record")
            .await
            .unwrap()
            .is_none()
    );

    healthy.set("pin_record", b"new").await.unwrap();
    assert_eq!(secure.get("pin_record").await.unwrap().as_deref(), Some(&b"new"[..]));
    assert_eq!(healthy.availability(), Availability::Available);
}

#[tokio::test]
async fn production_never_touches_preferences() {
    init_tracing();
    let prefs = Arc::new(SqlitePreferences::open_in_memory().unwrap());
    let adapter = SecretStoreAdapter::new(
        Arc::new(MemorySecureStore::unavailable()),
        prefs.clone(),
        FallbackPolicy::Deny,
    );

    for key in ["pin_record", "pin_session"] {
        assert!(adapter.set(key, b"secret").await.unwrap_err().is_unavailable());
        assert!(adapter.get(key).await.unwrap_err().is_unavailable());
        assert!(
            prefs
                .get(&adapter.fallback_key(key))
                .await
                .unwrap()
                .is_none()
        );
    }
}

#[tokio::test]
async fn deletes_are_idempotent_in_both_modes() {
    init_tracing();
    for secure in [MemorySecureStore::new(), MemorySecureStore::unavailable()] {
        let adapter = SecretStoreAdapter::new(
            Arc::new(secure),
            Arc::new(SqlitePreferences::open_in_memory().unwrap()),
            FallbackPolicy::AllowInsecure,
        );
        adapter.set("k", b"v").await.unwrap();
        adapter.delete("k").await.unwrap();
        adapter.delete("k").await.unwrap();
        assert!(adapter.get("k").await.unwrap().is_none());
    }
}
