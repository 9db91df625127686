// Session layer: topic validation, pairing URIs, persisted sessions and the store

pub mod store;
pub mod topic;
pub mod types;
pub mod uri;

pub use store::{
    LegacyDirectKeySession, LegacyRelaySession, SessionStore, StoreError, LEGACY_DIRECT_KEY,
    LEGACY_RELAY_KEY, SESSIONS_KEY,
};
pub use topic::{SessionTopic, TopicError, TopicErrorKind, TOPIC_LENGTH};
pub use types::{
    account_address, derive_wallet_id, MultiSessionState, PersistedSession,
    SessionValidationError,
};
pub use uri::{RelayUriMetadata, SessionUri, UriError};
