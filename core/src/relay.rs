// Relay and deep-link collaborators
//
// The relay transport and its crypto live outside this crate. The connector
// only needs to propose, learn the outcome, reconnect, and ask what session
// the relay currently sees.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::connection::RelayState;
use crate::resilience::CircuitOpen;
use crate::session::{PersistedSession, SessionTopic};
use crate::wallet::{ChainTarget, WalletKind};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Relay unavailable: {0}")]
    Unavailable(String),
    #[error("Relay request failed: {0}")]
    Request(String),
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),
}

// ============================================================================
// DATA TYPES
// ============================================================================

/// Session approved by a wallet, as reported by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovedSession {
    pub topic: SessionTopic,
    /// CAIP-10 accounts (`eip155:1:0xabc`) or bare addresses
    pub accounts: Vec<String>,
    pub target: ChainTarget,
    pub expires_at: DateTime<Utc>,
}

impl ApprovedSession {
    pub fn has_account(&self) -> bool {
        self.accounts.iter().any(|a| !a.trim().is_empty())
    }

    pub fn into_persisted(self, kind: WalletKind, created_at: DateTime<Utc>) -> PersistedSession {
        PersistedSession::relay(
            kind,
            self.accounts,
            self.target,
            &self.topic,
            created_at,
            self.expires_at,
        )
    }
}

/// What the wallet eventually did with a proposal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved(ApprovedSession),
    Rejected { reason: String },
    /// The relay reported a failure for this proposal
    Failed(String),
}

/// An outstanding proposal: the pairing URI to hand to the wallet and a
/// channel resolving once the wallet answers. A dropped sender means the
/// relay lost the proposal.
#[derive(Debug)]
pub struct Proposal {
    pub uri: String,
    pub approval: oneshot::Receiver<ApprovalOutcome>,
}

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Publish a session proposal for `kind` on `target`
    async fn propose(&self, kind: WalletKind, target: &ChainTarget) -> Result<Proposal, RelayError>;

    /// Re-establish the relay connection
    async fn reconnect(&self) -> Result<(), RelayError>;

    fn relay_state(&self) -> RelayState;

    /// Session the relay currently holds for `kind` on `target`, if any
    async fn active_session(
        &self,
        kind: WalletKind,
        target: &ChainTarget,
    ) -> Result<Option<ApprovedSession>, RelayError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeepLinkLauncher: Send + Sync {
    /// Ask the OS to open `uri`. `Ok(false)` means no installed app handles it.
    async fn open(&self, uri: &str) -> Result<bool, String>;
}

// ============================================================================
// SCRIPTED RELAY (for testing)
// ============================================================================

#[cfg(test)]
pub use scripted::{ProposeScript, ReconnectScript, ScriptedRelay};
