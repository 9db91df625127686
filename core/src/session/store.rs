// Multi-wallet session store with legacy single-session migration
//
// Reads never fail: unreadable or corrupted data degrades to an empty
// aggregate so a bad record cannot block connecting. Writes are explicit
// caller operations and surface as StoreError.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::topic;
use super::types::{
    derive_wallet_id, MultiSessionState, PersistedSession, SessionValidationError,
};
use crate::store::{BackendError, StorageBackend};
use crate::wallet::{ChainTarget, WalletKind};

/// Aggregate `{sessions, activeWalletId}` record
pub const SESSIONS_KEY: &str = "wallet_sessions";
/// Pre-multi-wallet relay session record
pub const LEGACY_RELAY_KEY: &str = "wc_session";
/// Pre-multi-wallet direct-key session record
pub const LEGACY_DIRECT_KEY: &str = "direct_key_session";

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session store write failed: {0}")]
    Write(#[from] BackendError),
    #[error("Session state could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Session rejected: {0}")]
    Invalid(#[from] SessionValidationError),
    #[error("No session stored for wallet {0}")]
    UnknownWallet(String),
}

// ============================================================================
// LEGACY RECORDS
// ============================================================================

/// Relay session as written before multi-wallet support
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyRelaySession {
    pub topic: String,
    pub wallet_name: String,
    pub accounts: Vec<String>,
    pub chain_id: u64,
    /// Unix seconds, as delivered by the relay
    pub expiry: i64,
    #[serde(default)]
    pub connected_at: Option<DateTime<Utc>>,
}

/// Direct-key session as written before multi-wallet support
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyDirectKeySession {
    pub wallet_name: String,
    pub public_key: String,
    /// Reference to the locally held key material
    pub session: String,
    #[serde(default = "default_cluster")]
    pub cluster: String,
    pub connected_at: DateTime<Utc>,
}

fn default_cluster() -> String {
    "mainnet-beta".to_string()
}

impl LegacyRelaySession {
    fn into_session(self, now: DateTime<Utc>) -> Option<PersistedSession> {
        let kind = self.wallet_name.parse::<WalletKind>().ok()?;
        let topic = topic::sanitize(Some(&self.topic))?;
        let expires_at = Utc.timestamp_opt(self.expiry, 0).single()?;
        let created_at = self.connected_at.unwrap_or(now).min(now);
        Some(PersistedSession::relay(
            kind,
            self.accounts,
            ChainTarget::Evm(self.chain_id),
            &topic,
            created_at,
            expires_at,
        ))
    }
}

impl LegacyDirectKeySession {
    fn into_session(self, ttl: ChronoDuration) -> Option<PersistedSession> {
        let kind = self.wallet_name.parse::<WalletKind>().ok()?;
        Some(PersistedSession::direct_key(
            kind,
            self.public_key,
            self.cluster,
            self.session,
            self.connected_at,
            ttl,
        ))
    }
}

// ============================================================================
// SESSION STORE
// ============================================================================

pub struct SessionStore {
    backend: Arc<dyn StorageBackend>,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
    session_ttl: Duration,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    /// Lifetime applied to migrated direct-key sessions
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn get_all(&self) -> MultiSessionState {
        let bytes = match self.backend.get(SESSIONS_KEY) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return MultiSessionState::default(),
            Err(e) => {
                warn!(error = %e, "Session store unreadable, using empty state");
                return MultiSessionState::default();
            }
        };

        match serde_json::from_slice::<MultiSessionState>(&bytes) {
            Ok(mut state) => {
                if state.repair_active_pointer() {
                    warn!("Active wallet pointed at a missing session, cleared");
                }
                state
            }
            Err(e) => {
                warn!(error = %e, bytes = bytes.len(), "Session store corrupted, using empty state");
                MultiSessionState::default()
            }
        }
    }

    /// Upsert a session under its derived wallet id and return that id
    pub fn save(&self, session: PersistedSession) -> Result<String, StoreError> {
        session.validate()?;
        let wallet_id = session
            .wallet_id()
            .ok_or(SessionValidationError::NoAccounts)?;

        let _guard = self.write_lock.lock();
        let mut state = self.get_all();
        let masked = session.masked_reference();
        let replaced = state.upsert(wallet_id.clone(), session);
        self.write(&state)?;

        info!(
            wallet_id = %wallet_id,
            reference = %masked,
            replaced,
            "Session saved"
        );
        Ok(wallet_id)
    }

    pub fn get(&self, wallet_id: &str) -> Option<PersistedSession> {
        self.get_all().sessions.remove(wallet_id)
    }

    pub fn remove(&self, wallet_id: &str) -> Result<Option<PersistedSession>, StoreError> {
        self.remove_at(wallet_id, Utc::now())
    }

    pub fn remove_at(
        &self,
        wallet_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PersistedSession>, StoreError> {
        let _guard = self.write_lock.lock();
        let mut state = self.get_all();
        let Some(removed) = state.remove(wallet_id, now) else {
            return Ok(None);
        };
        self.write(&state)?;

        info!(
            wallet_id = %wallet_id,
            active = ?state.active_wallet_id,
            "Session removed"
        );
        Ok(Some(removed))
    }

    pub fn set_active(&self, wallet_id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut state = self.get_all();
        if !state.set_active(wallet_id) {
            return Err(StoreError::UnknownWallet(wallet_id.to_string()));
        }
        self.write(&state)?;
        debug!(wallet_id = %wallet_id, "Active wallet set");
        Ok(())
    }

    pub fn get_active(&self) -> Option<(String, PersistedSession)> {
        let state = self.get_all();
        state
            .active()
            .map(|(id, session)| (id.clone(), session.clone()))
    }

    pub fn active_wallet_id(&self) -> Option<String> {
        self.get_all().active_wallet_id
    }

    /// Bump `last_used_at`; failures are logged and otherwise ignored
    pub fn update_last_used(&self, wallet_id: &str) {
        let _guard = self.write_lock.lock();
        let mut state = self.get_all();
        let Some(session) = state.sessions.get_mut(wallet_id) else {
            debug!(wallet_id = %wallet_id, "No session to touch");
            return;
        };
        session.last_used_at = Utc::now();
        if let Err(e) = self.write(&state) {
            warn!(wallet_id = %wallet_id, error = %e, "Failed to update last used time");
        }
    }

    pub fn remove_expired(&self) -> Result<usize, StoreError> {
        self.remove_expired_at(Utc::now())
    }

    pub fn remove_expired_at(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let mut state = self.get_all();
        let removed = state.remove_expired(now);
        if removed > 0 {
            self.write(&state)?;
            info!(removed, remaining = state.len(), "Expired sessions removed");
        }
        Ok(removed)
    }

    pub fn count(&self) -> usize {
        self.get_all().len()
    }

    /// Most recently used connected session for `kind` on `target` that was
    /// created no earlier than `since`
    pub fn find_connected(
        &self,
        kind: WalletKind,
        target: &ChainTarget,
        since: DateTime<Utc>,
    ) -> Option<(String, PersistedSession)> {
        let now = Utc::now();
        self.get_all()
            .sessions
            .into_iter()
            .filter(|(_, s)| s.matches(kind, target) && s.is_connected_at(now) && s.created_at >= since)
            .max_by_key(|(_, s)| s.last_used_at)
    }

    /// Convert legacy single-session records into the aggregate
    ///
    /// Runs only while the aggregate is empty. Returns true when at least
    /// one legacy session was carried over.
    pub fn migrate_legacy(&self) -> Result<bool, StoreError> {
        self.migrate_legacy_at(Utc::now())
    }

    pub fn migrate_legacy_at(&self, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let mut state = self.get_all();
        if !state.is_empty() {
            debug!(sessions = state.len(), "Session store populated, skipping legacy migration");
            return Ok(false);
        }

        let ttl = ChronoDuration::from_std(self.session_ttl).unwrap_or_else(|_| ChronoDuration::days(7));

        let relay = self
            .take_legacy::<LegacyRelaySession>(LEGACY_RELAY_KEY)?
            .and_then(|legacy| legacy.into_session(now));
        let direct = self
            .take_legacy::<LegacyDirectKeySession>(LEGACY_DIRECT_KEY)?
            .and_then(|legacy| legacy.into_session(ttl));

        let mut migrated = false;

        if let Some(session) = relay.filter(|s| usable(s, now, LEGACY_RELAY_KEY)) {
            if let Some(id) = session.wallet_id() {
                info!(wallet_id = %id, topic = %session.masked_reference(), "Migrated legacy relay session");
                state.upsert(id.clone(), session);
                state.active_wallet_id = Some(id);
                migrated = true;
            }
        }

        if let Some(session) = direct.filter(|s| usable(s, now, LEGACY_DIRECT_KEY)) {
            if let Some(id) = session.wallet_id() {
                info!(wallet_id = %id, "Migrated legacy direct-key session");
                state.upsert(id.clone(), session);
                if state.active_wallet_id.is_none() {
                    state.active_wallet_id = Some(id);
                }
                migrated = true;
            }
        }

        if migrated {
            self.write(&state)?;
        }
        Ok(migrated)
    }

    /// Read and delete a legacy record; unparseable data is discarded
    fn take_legacy<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let read = self.backend.get(key);
        if matches!(read, Ok(None)) {
            return Ok(None);
        }
        self.backend.remove(key)?;

        let bytes = match read {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable legacy session");
                return Ok(None);
            }
        };

        match serde_json::from_slice::<T>(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(key, error = %e, "Discarding corrupted legacy session");
                Ok(None)
            }
        }
    }

    fn write(&self, state: &MultiSessionState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(state)?;
        self.backend.put(SESSIONS_KEY, &bytes)?;
        Ok(())
    }
}

fn usable(session: &PersistedSession, now: DateTime<Utc>, key: &str) -> bool {
    if session.is_expired_at(now) {
        info!(key, "Discarding expired legacy session");
        return false;
    }
    if let Err(e) = session.validate() {
        warn!(key, error = %e, "Discarding invalid legacy session");
        return false;
    }
    true
}
