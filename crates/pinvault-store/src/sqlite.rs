//! SQLite-backed plain preferences.
//!
//! [`SqlitePreferences`] wraps a `rusqlite::Connection` behind an
//! `Arc<Mutex<>>` and runs every statement on the blocking pool via
//! `tokio::task::spawn_blocking`.
//!
//! # Schema
//!
//! A single `preferences` table keyed by name. Values are opaque strings;
//! the vault stores JSON documents and base64 fallback blobs there.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{StoreError, StoreResult};
use crate::preferences::PreferenceStore;

/// Thread-safe handle to the preferences database.
#[derive(Clone)]
pub struct SqlitePreferences {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePreferences {
    /// Open (or create) the preferences database at `path`.
    ///
    /// Blocks briefly on file I/O; call during startup.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening preferences database");

        let conn = Connection::open(path)?;
        Self::configure_connection(&conn)?;
        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn)?;
        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure_connection(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    }

    fn run_migrations(conn: &Connection) -> StoreResult<()> {
        tracing::debug!("running preferences schema migrations");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS preferences (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl PreferenceStore for SqlitePreferences {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM preferences WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO preferences (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = excluded.updated_at",
                params![key, value, Utc::now().timestamp_millis()],
            )?;
            tracing::trace!(key = %key, "stored preference");
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let key = key.to_string();
        self.execute(move |conn| {
            let rows = conn.execute("DELETE FROM preferences WHERE key = ?1", params![key])?;
            tracing::trace!(key = %key, rows, "removed preference");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_roundtrip() {
        let prefs = SqlitePreferences::open_in_memory().unwrap();
        assert!(prefs.get("pin_meta").await.unwrap().is_none());

        prefs.set("pin_meta", "{\"userId\":7}").await.unwrap();
        assert_eq!(
            prefs.get("pin_meta").await.unwrap().as_deref(),
            Some("{\"userId\":7}")
        );
    }

    #[tokio::test]
    async fn overwrite_replaces_value() {
        let prefs = SqlitePreferences::open_in_memory().unwrap();
        prefs.set("k", "old").await.unwrap();
        prefs.set("k", "new").await.unwrap();
        assert_eq!(prefs.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let prefs = SqlitePreferences::open_in_memory().unwrap();
        prefs.set("k", "v").await.unwrap();
        prefs.remove("k").await.unwrap();
        prefs.remove("k").await.unwrap();
        assert!(prefs.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.db");

        {
            let prefs = SqlitePreferences::open(&path).unwrap();
            prefs.set("k", "kept").await.unwrap();
        }

        let prefs = SqlitePreferences::open(&path).unwrap();
        assert_eq!(prefs.get("k").await.unwrap().as_deref(), Some("kept"));
    }
}
