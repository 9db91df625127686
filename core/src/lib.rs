// WalletLink Core — connection resilience for external wallets
//
// Keeps a relay-mediated wallet handshake consistent across timeouts,
// backgrounding and restarts: the connection state machine, timeout recovery,
// the multi-wallet session store, and the retry primitives that gate them.

pub mod config;
pub mod connection;
pub mod logging;
pub mod recovery;
pub mod redact;
pub mod relay;
pub mod resilience;
pub mod session;
pub mod store;
pub mod wallet;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use config::{ConfigError, ConnectorConfig};
pub use connection::{
    ConnectionCoordinator, ConnectionLogContext, ConnectionResult, ConnectionStep, RelayState,
    SessionState,
};
pub use logging::{init_logging, LogConfig, LoggingError};
pub use recovery::{RecoveredSession, RecoveryConfig, RecoveryEngine, RecoveryError, RecoveryPhase};
pub use relay::{ApprovalOutcome, ApprovedSession, DeepLinkLauncher, Proposal, RelayError, RelayTransport};
pub use resilience::{Backoff, BackoffConfig, CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitState};
pub use session::{MultiSessionState, PersistedSession, SessionStore, SessionTopic, StoreError};
pub use store::{MemoryStorage, SledStorage, StorageBackend};
pub use wallet::{ChainTarget, SessionType, WalletKind};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletLinkError {
    #[error("Wallet did not approve in time")]
    Timeout,
    #[error("Connection rejected in wallet")]
    Rejected,
    #[error("Connection cancelled")]
    Cancelled,
    #[error("{} is not installed", .0.display_name())]
    NotInstalled(WalletKind),
    #[error("Session for {0} has expired")]
    SessionExpired(String),
    #[error("Relay error: {0}")]
    RelayError(String),
    #[error("Deep link error: {0}")]
    DeeplinkError(String),
    #[error("Session error: {0}")]
    SessionError(String),
    #[error("Storage read failed: {0}")]
    StorageReadFailed(String),
    #[error("Storage write failed: {0}")]
    StorageWriteFailed(String),
    #[error("Circuit breaker open, retry in {}ms", .0.as_millis())]
    CircuitOpen(Duration),
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Field-less mirror of [`WalletLinkError`] for logs and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Timeout,
    Rejected,
    Cancelled,
    NotInstalled,
    SessionExpired,
    RelayError,
    DeeplinkError,
    SessionError,
    StorageReadFailed,
    StorageWriteFailed,
    CircuitOpen,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::NotInstalled => "notInstalled",
            Self::SessionExpired => "sessionExpired",
            Self::RelayError => "relayError",
            Self::DeeplinkError => "deeplinkError",
            Self::SessionError => "sessionError",
            Self::StorageReadFailed => "storageReadFailed",
            Self::StorageWriteFailed => "storageWriteFailed",
            Self::CircuitOpen => "circuitOpen",
            Self::Unknown => "unknown",
        }
    }

    /// User behavior rather than a defect
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Timeout | Self::Rejected | Self::Cancelled)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const GENERIC_RETRY_MESSAGE: &str = "Something went wrong while connecting your wallet. Please try again.";

impl WalletLinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::Timeout,
            Self::Rejected => ErrorKind::Rejected,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NotInstalled(_) => ErrorKind::NotInstalled,
            Self::SessionExpired(_) => ErrorKind::SessionExpired,
            Self::RelayError(_) => ErrorKind::RelayError,
            Self::DeeplinkError(_) => ErrorKind::DeeplinkError,
            Self::SessionError(_) => ErrorKind::SessionError,
            Self::StorageReadFailed(_) => ErrorKind::StorageReadFailed,
            Self::StorageWriteFailed(_) => ErrorKind::StorageWriteFailed,
            Self::CircuitOpen(_) => ErrorKind::CircuitOpen,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    pub fn is_expected(&self) -> bool {
        self.kind().is_expected()
    }

    /// Text suitable for showing to the person connecting
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout => {
                "Approve the connection in your wallet, then return to this app.".to_string()
            }
            Self::Rejected => {
                "The connection was declined in your wallet. Try again if that was a mistake."
                    .to_string()
            }
            Self::Cancelled => "Connection cancelled.".to_string(),
            _ => GENERIC_RETRY_MESSAGE.to_string(),
        }
    }
}

impl From<CircuitOpen> for WalletLinkError {
    fn from(open: CircuitOpen) -> Self {
        WalletLinkError::CircuitOpen(open.retry_after)
    }
}

impl From<StoreError> for WalletLinkError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Write(_) | StoreError::Encode(_) => {
                WalletLinkError::StorageWriteFailed(err.to_string())
            }
            StoreError::Invalid(_) | StoreError::UnknownWallet(_) => {
                WalletLinkError::SessionError(err.to_string())
            }
        }
    }
}

impl From<store::BackendError> for WalletLinkError {
    fn from(err: store::BackendError) -> Self {
        match err {
            store::BackendError::Read { .. } | store::BackendError::Unavailable(_) => {
                WalletLinkError::StorageReadFailed(err.to_string())
            }
            store::BackendError::Write { .. } => WalletLinkError::StorageWriteFailed(err.to_string()),
        }
    }
}

impl From<RelayError> for WalletLinkError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::CircuitOpen(open) => open.into(),
            other => WalletLinkError::RelayError(other.to_string()),
        }
    }
}

impl From<session::TopicError> for WalletLinkError {
    fn from(err: session::TopicError) -> Self {
        WalletLinkError::SessionError(err.to_string())
    }
}

impl From<session::UriError> for WalletLinkError {
    fn from(err: session::UriError) -> Self {
        WalletLinkError::SessionError(err.to_string())
    }
}

impl From<anyhow::Error> for WalletLinkError {
    fn from(err: anyhow::Error) -> Self {
        WalletLinkError::Unknown(err.to_string())
    }
}
