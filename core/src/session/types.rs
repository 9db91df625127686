// Persisted session records and the multi-wallet aggregate

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::topic::{self, SessionTopic};
use crate::wallet::{normalize_kind, ChainTarget, SessionType, WalletKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionValidationError {
    #[error("Session expires at or before its creation time")]
    ExpiryBeforeCreation,
    #[error("Session has no accounts")]
    NoAccounts,
    #[error("Relay session topic invalid: {0}")]
    InvalidTopic(#[from] topic::TopicError),
    #[error("Direct-key session has no key material reference")]
    MissingKeyReference,
}

/// Derive the store key for a wallet: `lower(normalize(kind)) + "_" + lower(address)`
pub fn derive_wallet_id(kind: &str, address: &str) -> String {
    format!("{}_{}", normalize_kind(kind), address.trim().to_lowercase())
}

/// Account string with any CAIP-10 prefix (`eip155:1:0xabc`) removed
pub fn account_address(account: &str) -> &str {
    account.rsplit(':').next().unwrap_or(account).trim()
}

/// One established session, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub session_type: SessionType,
    pub wallet_kind: WalletKind,
    #[serde(rename = "addressOrAccounts")]
    pub accounts: Vec<String>,
    #[serde(rename = "chainIdOrCluster")]
    pub chain: ChainTarget,
    /// Relay topic for relay-based sessions, key material reference otherwise
    #[serde(rename = "topicOrKeyMaterialReference")]
    pub topic_or_key_ref: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PersistedSession {
    pub fn relay(
        wallet_kind: WalletKind,
        accounts: Vec<String>,
        chain: ChainTarget,
        topic: &SessionTopic,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_type: SessionType::RelayBased,
            wallet_kind,
            accounts,
            chain,
            topic_or_key_ref: topic.as_str().to_string(),
            created_at,
            last_used_at: created_at,
            expires_at,
        }
    }

    pub fn direct_key(
        wallet_kind: WalletKind,
        address: String,
        cluster: String,
        key_reference: String,
        created_at: DateTime<Utc>,
        ttl: ChronoDuration,
    ) -> Self {
        Self {
            session_type: SessionType::DirectKeyBased,
            wallet_kind,
            accounts: vec![address],
            chain: ChainTarget::Cluster(cluster),
            topic_or_key_ref: key_reference,
            created_at,
            last_used_at: created_at,
            expires_at: created_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// First account, stripped of any chain prefix
    pub fn primary_address(&self) -> Option<&str> {
        self.accounts.first().map(|a| account_address(a))
    }

    pub fn wallet_id(&self) -> Option<String> {
        self.primary_address()
            .map(|address| derive_wallet_id(self.wallet_kind.as_str(), address))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Usable right now: unexpired and addressed to at least one account
    pub fn is_connected_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && self.primary_address().is_some_and(|a| !a.is_empty())
    }

    /// Relay topic, only for relay-based sessions with a valid topic
    pub fn topic(&self) -> Option<SessionTopic> {
        match self.session_type {
            SessionType::RelayBased => topic::sanitize(Some(&self.topic_or_key_ref)),
            SessionType::DirectKeyBased => None,
        }
    }

    /// Log-safe rendering of the topic or key reference
    pub fn masked_reference(&self) -> String {
        match self.session_type {
            SessionType::RelayBased => topic::mask_for_logging(Some(&self.topic_or_key_ref)),
            SessionType::DirectKeyBased => crate::redact::shorten(&self.topic_or_key_ref),
        }
    }

    pub fn validate(&self) -> Result<(), SessionValidationError> {
        if self.expires_at <= self.created_at {
            return Err(SessionValidationError::ExpiryBeforeCreation);
        }
        if self.primary_address().map_or(true, str::is_empty) {
            return Err(SessionValidationError::NoAccounts);
        }
        match self.session_type {
            SessionType::RelayBased => {
                topic::validate(Some(&self.topic_or_key_ref))?;
            }
            SessionType::DirectKeyBased => {
                if self.topic_or_key_ref.trim().is_empty() {
                    return Err(SessionValidationError::MissingKeyReference);
                }
            }
        }
        Ok(())
    }

    pub fn matches(&self, kind: WalletKind, target: &ChainTarget) -> bool {
        self.wallet_kind == kind && &self.chain == target
    }
}

/// Every known session plus the active-wallet pointer
///
/// `active_wallet_id`, when set, always names an entry in `sessions`; every
/// mutating method below keeps it that way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiSessionState {
    #[serde(default)]
    pub sessions: BTreeMap<String, PersistedSession>,
    #[serde(default)]
    pub active_wallet_id: Option<String>,
}

impl MultiSessionState {
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, wallet_id: &str) -> Option<&PersistedSession> {
        self.sessions.get(wallet_id)
    }

    pub fn active(&self) -> Option<(&String, &PersistedSession)> {
        let id = self.active_wallet_id.as_ref()?;
        self.sessions.get_key_value(id)
    }

    /// Insert or replace; returns true when an entry was replaced
    pub fn upsert(&mut self, wallet_id: String, session: PersistedSession) -> bool {
        self.sessions.insert(wallet_id, session).is_some()
    }

    /// Remove an entry, clearing or reassigning the active pointer
    pub fn remove(&mut self, wallet_id: &str, now: DateTime<Utc>) -> Option<PersistedSession> {
        let removed = self.sessions.remove(wallet_id)?;
        if self.active_wallet_id.as_deref() == Some(wallet_id) {
            self.active_wallet_id = None;
        }
        if self.active_wallet_id.is_none() {
            self.active_wallet_id = self.most_recent_connected(now);
        }
        Some(removed)
    }

    pub fn set_active(&mut self, wallet_id: &str) -> bool {
        if self.sessions.contains_key(wallet_id) {
            self.active_wallet_id = Some(wallet_id.to_string());
            true
        } else {
            false
        }
    }

    /// Drop expired entries; returns how many were removed
    pub fn remove_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired_at(now));
        if let Some(active) = &self.active_wallet_id {
            if !self.sessions.contains_key(active) {
                self.active_wallet_id = None;
            }
        }
        before - self.sessions.len()
    }

    /// Clear a dangling pointer left behind by hand-edited or older data
    pub fn repair_active_pointer(&mut self) -> bool {
        match &self.active_wallet_id {
            Some(id) if !self.sessions.contains_key(id) => {
                self.active_wallet_id = None;
                true
            }
            _ => false,
        }
    }

    /// Most recently used entry that is still connected
    pub fn most_recent_connected(&self, now: DateTime<Utc>) -> Option<String> {
        self.sessions
            .iter()
            .filter(|(_, session)| session.is_connected_at(now))
            .max_by_key(|(_, session)| session.last_used_at)
            .map(|(id, _)| id.clone())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn topic_hex(seed: u8) -> String {
        format!("{:02x}", seed).repeat(32)
    }

    pub fn relay_session(kind: WalletKind, address: &str, expires_in_hours: i64) -> PersistedSession {
        let created = Utc::now() - ChronoDuration::hours(1);
        let topic = topic::validate(Some(&topic_hex(0xab))).unwrap_or_else(|e| panic!("{e}"));
        PersistedSession::relay(
            kind,
            vec![format!("eip155:1:{}", address)],
            ChainTarget::Evm(1),
            &topic,
            created,
            Utc::now() + ChronoDuration::hours(expires_in_hours),
        )
    }
}
