//! Vault lifecycle manager.
//!
//! [`PinVault`] composes the key derivation unit, the session envelope, the
//! lockout state machine, and the secret store adapter into the operations
//! the application calls: create, unlock, rotate, inspect, wipe, and
//! reconcile with the server's PIN status.
//!
//! The three records are not written atomically as a group. Any operation
//! that finds an incomplete or unreadable vault reports
//! [`VaultError::NoSession`] instead of guessing.
//!
//! PBKDF2 work runs on the blocking pool so an unlock never stalls the
//! async runtime.

use std::sync::Arc;

use pinvault_store::{
    Availability, PreferenceStore, SecretStoreAdapter, SecureStore, StoreError,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::cache::CredentialCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, VaultConfig};
use crate::envelope::{DecryptFailure, SessionEnvelope};
use crate::error::{Result, VaultError};
use crate::lockout::LockState;
use crate::records::{
    CredentialPair, METADATA_KEY, PIN_RECORD_KEY, PinRecord, PinStatus, SESSION_RECORD_KEY,
    SessionRecord, VaultMetadata,
};

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// Input to [`PinVault::set_pin_for_session`].
#[derive(Debug)]
pub struct SetPinRequest<'a> {
    pub pin: &'a str,
    pub credentials: CredentialPair,
    pub user_id: i64,
    pub server_epoch: i64,
    pub display_name: Option<String>,
    pub username: Option<String>,
}

impl<'a> SetPinRequest<'a> {
    pub fn new(pin: &'a str, credentials: CredentialPair, user_id: i64, server_epoch: i64) -> Self {
        Self {
            pin,
            credentials,
            user_id,
            server_epoch,
            display_name: None,
            username: None,
        }
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// Input to [`PinVault::update_session_after_unlock`].
#[derive(Debug)]
pub struct UpdateSessionRequest<'a> {
    pub pin: &'a str,
    pub credentials: CredentialPair,
    pub status: &'a PinStatus,
    /// Replaces the stored display name when set.
    pub display_name: Option<String>,
    /// Replaces the stored username when set.
    pub username: Option<String>,
}

impl<'a> UpdateSessionRequest<'a> {
    pub fn new(pin: &'a str, credentials: CredentialPair, status: &'a PinStatus) -> Self {
        Self {
            pin,
            credentials,
            status,
            display_name: None,
            username: None,
        }
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// A successful unlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockOutcome {
    pub credentials: CredentialPair,
    pub metadata: VaultMetadata,
}

/// Read-only view returned by [`PinVault::inspect_state`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultState {
    pub metadata: Option<VaultMetadata>,
    pub has_secure_session: bool,
}

/// Options for [`PinVault::wipe`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WipeOptions {
    /// Leave the in-memory credential cache populated.
    pub keep_credentials_in_memory: bool,
}

impl WipeOptions {
    pub fn keep_credentials() -> Self {
        Self {
            keep_credentials_in_memory: true,
        }
    }
}

/// Keys a wipe could not delete. The next wipe retries them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WipeOutcome {
    pub failed_keys: Vec<&'static str>,
}

impl WipeOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_keys.is_empty()
    }
}

/// Result of [`PinVault::reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The local vault matches the server.
    Unchanged,
    /// The server disabled PIN unlock; the vault was wiped.
    Disabled,
    /// The server epoch moved; the vault was wiped and the user must
    /// re-authenticate.
    EpochChanged,
}

// ---------------------------------------------------------------------------
// PinVault
// ---------------------------------------------------------------------------

/// The device-local PIN vault.
///
/// Owned by the application's composition root. Callers serialize
/// mutations (one unlock/create/update at a time).
pub struct PinVault {
    secrets: SecretStoreAdapter,
    prefs: Arc<dyn PreferenceStore>,
    cache: Arc<CredentialCache>,
    clock: Arc<dyn Clock>,
    config: VaultConfig,
}

impl PinVault {
    /// Build a vault over the given stores.
    ///
    /// `prefs` holds the metadata and, in development profiles, the fallback
    /// copy of secure entries.
    pub fn new(
        secure: Arc<dyn SecureStore>,
        prefs: Arc<dyn PreferenceStore>,
        cache: Arc<CredentialCache>,
        config: VaultConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let secrets = SecretStoreAdapter::new(secure, Arc::clone(&prefs), config.fallback_policy())
            .with_prefix(config.fallback_prefix.clone());

        info!(
            profile = ?config.profile,
            pin_iterations = config.pin_iterations,
            session_iterations = config.session_iterations,
            "PIN vault initialized"
        );

        Ok(Self {
            secrets,
            prefs,
            cache,
            clock: Arc::new(SystemClock),
            config,
        })
    }

    /// Replace the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Cached availability of the secure store.
    pub fn availability(&self) -> Availability {
        self.secrets.availability()
    }

    // -- create / unlock / rotate ------------------------------------------

    /// Create (or replace) the vault after a normal login and populate the
    /// credential cache.
    pub async fn set_pin_for_session(&self, request: SetPinRequest<'_>) -> Result<VaultMetadata> {
        let now = self.clock.now_ms();
        let pin = Zeroizing::new(request.pin.to_owned());
        let pin_iterations = self.config.pin_iterations;
        let envelope = SessionEnvelope::new(self.config.session_iterations);
        let credentials = request.credentials;

        let (pin_record, session, credentials) = blocking(move || {
            let pin_record = PinRecord::create(&pin, pin_iterations, now)?;
            let session = envelope.seal(&pin, &credentials, now)?;
            Ok((pin_record, session, credentials))
        })
        .await?;

        self.write_secure(PIN_RECORD_KEY, &pin_record).await?;
        self.write_secure(SESSION_RECORD_KEY, &session).await?;

        let metadata = VaultMetadata {
            display_name: request.display_name,
            username: request.username,
            ..VaultMetadata::fresh(request.user_id, request.server_epoch, now)
        };
        self.save_metadata(&metadata).await?;
        self.cache.set(credentials);

        info!(
            user_id = metadata.user_id,
            epoch = metadata.pin_epoch_local,
            "PIN vault created"
        );
        Ok(metadata)
    }

    /// Verify `pin`, decrypt the session, and populate the credential cache.
    ///
    /// A locked vault is refused before any key derivation.
    pub async fn unlock(&self, pin: &str) -> Result<UnlockOutcome> {
        let pin = Zeroizing::new(pin.to_owned());
        let (pin_record, session, metadata) = self.load_vault().await?;

        let lock = self.config.lockout.check_lock(&metadata, self.clock.now_ms());
        if lock.locked {
            debug!(
                user_id = metadata.user_id,
                remaining_ms = lock.remaining_ms,
                "unlock refused while locked"
            );
            return Err(VaultError::Locked {
                remaining_ms: lock.remaining_ms,
            });
        }

        match self.verify_pin(&pin, pin_record).await? {
            Some(true) => {}
            Some(false) => return Err(self.on_pin_mismatch(&metadata).await?),
            None => {
                warn!(user_id = metadata.user_id, "stored PIN record is corrupt");
                return Err(VaultError::NoSession);
            }
        }

        let opened = {
            let pin = pin.clone();
            blocking(move || Ok(SessionEnvelope::open(&pin, &session))).await?
        };
        let credentials = opened.map_err(|DecryptFailure| {
            warn!(
                user_id = metadata.user_id,
                "session record failed to decrypt after PIN matched"
            );
            VaultError::NoSession
        })?;

        let metadata = self
            .config
            .lockout
            .record_success(&metadata, self.clock.now_ms());
        self.save_metadata(&metadata).await?;
        self.cache.set(credentials.clone());

        info!(user_id = metadata.user_id, "PIN vault unlocked");
        Ok(UnlockOutcome {
            credentials,
            metadata,
        })
    }

    /// Re-seal the session with rotated credentials and adopt the server's
    /// PIN status. The PIN record is not touched.
    ///
    /// The PIN is checked under the same lockout rules as [`Self::unlock`]:
    /// a locked vault is refused before any key derivation, and a mismatch
    /// counts as a failed attempt.
    pub async fn update_session_after_unlock(
        &self,
        request: UpdateSessionRequest<'_>,
    ) -> Result<VaultMetadata> {
        let pin = Zeroizing::new(request.pin.to_owned());
        let pin_record: PinRecord = self
            .read_secure(PIN_RECORD_KEY)
            .await?
            .ok_or(VaultError::NoSession)?;
        let metadata = self.load_metadata().await?.ok_or(VaultError::NoSession)?;

        let lock = self.config.lockout.check_lock(&metadata, self.clock.now_ms());
        if lock.locked {
            debug!(
                user_id = metadata.user_id,
                remaining_ms = lock.remaining_ms,
                "session rotation refused while locked"
            );
            return Err(VaultError::Locked {
                remaining_ms: lock.remaining_ms,
            });
        }

        match self.verify_pin(&pin, pin_record).await? {
            Some(true) => {}
            Some(false) => return Err(self.on_pin_mismatch(&metadata).await?),
            None => return Err(VaultError::NoSession),
        }

        let now = self.clock.now_ms();
        let envelope = SessionEnvelope::new(self.config.session_iterations);
        let credentials = request.credentials;
        let (session, credentials) = blocking(move || {
            let session = envelope.seal(&pin, &credentials, now)?;
            Ok((session, credentials))
        })
        .await?;
        self.write_secure(SESSION_RECORD_KEY, &session).await?;

        // A verified PIN counts as an unlock.
        let mut metadata = self.config.lockout.record_success(&metadata, now);
        metadata.pin_enabled_local = request.status.pin_enabled;
        metadata.pin_epoch_local = request.status.pin_epoch;
        if let Some(display_name) = request.display_name {
            metadata.display_name = Some(display_name);
        }
        if let Some(username) = request.username {
            metadata.username = Some(username);
        }
        self.save_metadata(&metadata).await?;
        self.cache.set(credentials);

        info!(
            user_id = metadata.user_id,
            epoch = metadata.pin_epoch_local,
            "session re-sealed with rotated credentials"
        );
        Ok(metadata)
    }

    // -- queries ------------------------------------------------------------

    /// Metadata plus whether an unlockable session exists. Never decrypts.
    pub async fn inspect_state(&self) -> Result<VaultState> {
        let metadata = self.load_metadata().await?;
        let session_present = self.session_present().await?;
        let has_secure_session =
            session_present && metadata.as_ref().is_some_and(|m| m.pin_enabled_local);
        Ok(VaultState {
            metadata,
            has_secure_session,
        })
    }

    /// Whether a session record is stored, regardless of metadata.
    pub async fn has_stored_session(&self) -> Result<bool> {
        self.session_present().await
    }

    pub async fn metadata(&self) -> Result<Option<VaultMetadata>> {
        self.load_metadata().await
    }

    /// Current lock window, or `None` without a vault.
    pub async fn lock_state(&self) -> Result<Option<LockState>> {
        let now = self.clock.now_ms();
        Ok(self
            .load_metadata()
            .await?
            .map(|meta| self.config.lockout.check_lock(&meta, now)))
    }

    /// Reset the failure counter and lift any lock without unlocking.
    ///
    /// `last_unlocked_at` is left alone here. [`Self::unlock`] and
    /// [`Self::update_session_after_unlock`] both set it, since each proves
    /// knowledge of the PIN.
    pub async fn clear_attempts(&self) -> Result<()> {
        let Some(metadata) = self.load_metadata().await? else {
            return Ok(());
        };
        let cleared = self
            .config
            .lockout
            .clear_attempts(&metadata, self.clock.now_ms());
        self.save_metadata(&cleared).await?;
        debug!(user_id = cleared.user_id, "unlock attempts cleared");
        Ok(())
    }

    // -- wipe and reconciliation ---------------------------------------------

    /// Delete all three records. Never fails; keys that could not be deleted
    /// are reported and retried by the next wipe.
    pub async fn wipe(&self, options: WipeOptions) -> WipeOutcome {
        let mut failed_keys = Vec::new();

        // Metadata first: without it no session is reported as unlockable.
        if let Err(e) = self.prefs.remove(METADATA_KEY).await {
            warn!(key = METADATA_KEY, error = %e, "failed to delete vault record");
            failed_keys.push(METADATA_KEY);
        }
        for key in [PIN_RECORD_KEY, SESSION_RECORD_KEY] {
            if let Err(e) = self.secrets.delete(key).await {
                warn!(key, error = %e, "failed to delete vault record");
                failed_keys.push(key);
            }
        }

        if !options.keep_credentials_in_memory {
            self.cache.clear();
        }

        info!(
            failed = failed_keys.len(),
            kept_in_memory = options.keep_credentials_in_memory,
            "PIN vault wiped"
        );
        WipeOutcome { failed_keys }
    }

    /// Wipe before `user_id` sets up a PIN. Always clears the credential
    /// cache.
    pub async fn reset_for_user(&self, user_id: i64) -> WipeOutcome {
        match self.load_metadata().await {
            Ok(Some(existing)) if existing.user_id != user_id => {
                info!(
                    previous_user_id = existing.user_id,
                    user_id, "vault belongs to another account, wiping"
                );
            }
            Ok(_) => debug!(user_id, "resetting vault"),
            Err(e) => warn!(user_id, error = %e, "could not read vault metadata before reset"),
        }
        self.wipe(WipeOptions::default()).await
    }

    /// Wipe if the server reports PIN unlock disabled. Returns whether a
    /// wipe happened.
    pub async fn wipe_if_server_disabled(&self, status: &PinStatus) -> bool {
        if status.pin_enabled {
            return false;
        }
        info!("server disabled PIN unlock, wiping vault");
        self.wipe(WipeOptions::default()).await;
        true
    }

    /// Wipe if the server epoch differs from the local one. `false` when no
    /// vault exists.
    pub async fn wipe_if_epoch_changed(&self, status: &PinStatus) -> Result<bool> {
        let Some(metadata) = self.load_metadata().await? else {
            return Ok(false);
        };
        if metadata.pin_epoch_local == status.pin_epoch {
            return Ok(false);
        }
        info!(
            user_id = metadata.user_id,
            local_epoch = metadata.pin_epoch_local,
            server_epoch = status.pin_epoch,
            "PIN epoch changed, wiping vault"
        );
        self.wipe(WipeOptions::default()).await;
        Ok(true)
    }

    /// Apply the server's PIN status to the local vault.
    pub async fn reconcile(&self, status: &PinStatus) -> Result<Reconciliation> {
        if self.wipe_if_server_disabled(status).await {
            return Ok(Reconciliation::Disabled);
        }
        if self.wipe_if_epoch_changed(status).await? {
            return Ok(Reconciliation::EpochChanged);
        }
        Ok(Reconciliation::Unchanged)
    }

    // -- internals ------------------------------------------------------------

    async fn on_pin_mismatch(&self, metadata: &VaultMetadata) -> Result<VaultError> {
        let now = self.clock.now_ms();
        let failed = self.config.lockout.record_failure(metadata, now);
        self.save_metadata(&failed).await?;

        let lock = self.config.lockout.check_lock(&failed, now);
        warn!(
            user_id = failed.user_id,
            attempts = failed.attempt_count,
            locked_ms = lock.remaining_ms,
            "PIN verification failed"
        );
        Ok(VaultError::InvalidPin {
            remaining_ms: lock.locked.then_some(lock.remaining_ms),
        })
    }

    /// `None` when the record cannot be checked (corrupt salt or hash).
    async fn verify_pin(
        &self,
        pin: &Zeroizing<String>,
        record: PinRecord,
    ) -> Result<Option<bool>> {
        let pin = pin.clone();
        blocking(move || Ok(record.verify(&pin).ok().flatten())).await
    }

    async fn load_vault(&self) -> Result<(PinRecord, SessionRecord, VaultMetadata)> {
        let pin_record = self.read_secure::<PinRecord>(PIN_RECORD_KEY).await?;
        let session = self.read_secure::<SessionRecord>(SESSION_RECORD_KEY).await?;
        let metadata = self.load_metadata().await?;

        match (pin_record, session, metadata) {
            (Some(pin_record), Some(session), Some(metadata)) => {
                Ok((pin_record, session, metadata))
            }
            (pin_record, session, metadata) => {
                debug!(
                    pin_record = pin_record.is_some(),
                    session = session.is_some(),
                    metadata = metadata.is_some(),
                    "vault absent or incomplete"
                );
                Err(VaultError::NoSession)
            }
        }
    }

    async fn load_metadata(&self) -> Result<Option<VaultMetadata>> {
        let raw = self.prefs.get(METADATA_KEY).await?;
        Ok(raw.as_deref().and_then(VaultMetadata::decode))
    }

    async fn save_metadata(&self, metadata: &VaultMetadata) -> Result<()> {
        self.prefs.set(METADATA_KEY, &metadata.encode()).await?;
        Ok(())
    }

    async fn session_present(&self) -> Result<bool> {
        match self.secrets.get(SESSION_RECORD_KEY).await {
            Ok(raw) => Ok(raw.is_some()),
            Err(e) => {
                Self::absent_unless_unavailable::<()>(SESSION_RECORD_KEY, e).map(|_| false)
            }
        }
    }

    /// Read and decode a secure record. Unreadable or malformed records are
    /// absent; only a missing secure store is an error.
    async fn read_secure<T: DeserializeOwned>(&self, key: &'static str) -> Result<Option<T>> {
        let raw = match self.secrets.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) => return Self::absent_unless_unavailable(key, e),
        };
        match serde_json::from_slice(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(key, error = %e, "discarding malformed vault record");
                Ok(None)
            }
        }
    }

    async fn write_secure<T: Serialize>(&self, key: &'static str, record: &T) -> Result<()> {
        let bytes = serde_json::to_vec(record).map_err(|e| VaultError::Internal {
            reason: format!("failed to encode {key}: {e}"),
        })?;
        self.secrets.set(key, &bytes).await?;
        Ok(())
    }

    fn absent_unless_unavailable<T>(key: &str, err: StoreError) -> Result<Option<T>> {
        if err.is_unavailable() {
            return Err(err.into());
        }
        warn!(key, error = %err, "secure store read failed, treating record as absent");
        Ok(None)
    }
}

impl std::fmt::Debug for PinVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinVault")
            .field("availability", &self.availability())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Run CPU-bound work on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
