//! Per-attempt connection record
//!
//! A [`ConnectionLogContext`] is never mutated in place. Every change returns
//! a new value, so a context observed by a log sink or another task is always
//! internally consistent.
//!
//! [`ConnectionLogContext::transition_to`] accepts any step from any step.
//! Relay events, deep-link callbacks and lifecycle events race each other, and
//! whichever arrives must be able to record itself. Readers therefore must not
//! assume steps only move forward.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use super::diagnostics::{DeeplinkDispatch, DeeplinkReturn};
use super::step::{ConnectionStep, RelayState, SessionState};
use crate::redact;
use crate::session::{RelayUriMetadata, SessionTopic};
use crate::wallet::{ChainTarget, WalletKind};
use crate::ErrorKind;

const MAX_LOGGED_MESSAGE_LEN: usize = 256;

#[derive(Debug, Clone)]
pub struct ConnectionLogContext {
    connection_id: String,
    wallet_kind: WalletKind,
    target: ChainTarget,
    step: ConnectionStep,
    previous_step: Option<ConnectionStep>,
    relay_state: RelayState,
    session_state: SessionState,
    attempt: u32,
    max_retries: u32,
    started_at: DateTime<Utc>,
    started: Instant,
    awaiting_approval: bool,
    error_kind: Option<ErrorKind>,
    error_message: Option<String>,
    session_topic: Option<SessionTopic>,
    deeplink_dispatch: Option<DeeplinkDispatch>,
    deeplink_return: Option<DeeplinkReturn>,
    relay_uri: Option<RelayUriMetadata>,
}

impl ConnectionLogContext {
    pub fn start(wallet_kind: WalletKind, target: ChainTarget, max_retries: u32) -> Self {
        let started_at = Utc::now();
        Self {
            connection_id: format!("{}_{}", wallet_kind.as_str(), started_at.timestamp_millis()),
            wallet_kind,
            target,
            step: ConnectionStep::Starting,
            previous_step: None,
            relay_state: RelayState::Disconnected,
            session_state: SessionState::None,
            attempt: 0,
            max_retries,
            started_at,
            started: Instant::now(),
            awaiting_approval: false,
            error_kind: None,
            error_message: None,
            session_topic: None,
            deeplink_dispatch: None,
            deeplink_return: None,
            relay_uri: None,
        }
    }

    // ===== ACCESSORS =====

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn wallet_kind(&self) -> WalletKind {
        self.wallet_kind
    }

    pub fn target(&self) -> &ChainTarget {
        &self.target
    }

    pub fn step(&self) -> ConnectionStep {
        self.step
    }

    pub fn previous_step(&self) -> Option<ConnectionStep> {
        self.previous_step
    }

    pub fn relay_state(&self) -> RelayState {
        self.relay_state
    }

    pub fn session_state(&self) -> SessionState {
        self.session_state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The wallet may still approve; a later foreground return should re-check
    pub fn awaiting_approval(&self) -> bool {
        self.awaiting_approval
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn deeplink_dispatch(&self) -> Option<&DeeplinkDispatch> {
        self.deeplink_dispatch.as_ref()
    }

    pub fn deeplink_return(&self) -> Option<&DeeplinkReturn> {
        self.deeplink_return.as_ref()
    }

    pub fn relay_uri(&self) -> Option<&RelayUriMetadata> {
        self.relay_uri.as_ref()
    }

    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_retries
    }

    // ===== TRANSITIONS =====

    /// Record a move to `step`, whatever the current step is
    pub fn transition_to(&self, step: ConnectionStep) -> Self {
        let mut next = self.clone();
        next.previous_step = Some(self.step);
        next.step = step;
        match step {
            ConnectionStep::AwaitingApproval => next.awaiting_approval = true,
            ConnectionStep::ApprovalReceived
            | ConnectionStep::ApprovalRejected
            | ConnectionStep::SessionEstablished => next.awaiting_approval = false,
            _ => {}
        }
        next
    }

    /// Start the next attempt: counter bumped, error cleared, back to starting
    pub fn next_attempt(&self) -> Self {
        let mut next = self.transition_to(ConnectionStep::Starting);
        next.attempt = self.attempt.saturating_add(1);
        next.error_kind = None;
        next.error_message = None;
        next.awaiting_approval = false;
        next.relay_state = RelayState::Disconnected;
        next.session_state = SessionState::None;
        next
    }

    pub fn with_relay_state(&self, relay_state: RelayState) -> Self {
        let mut next = self.clone();
        next.relay_state = relay_state;
        next
    }

    pub fn with_session_state(&self, session_state: SessionState) -> Self {
        let mut next = self.clone();
        next.session_state = session_state;
        next
    }

    pub fn with_error(&self, kind: ErrorKind, message: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.error_kind = Some(kind);
        next.error_message = Some(message.into());
        next
    }

    pub fn with_awaiting_approval(&self, awaiting: bool) -> Self {
        let mut next = self.clone();
        next.awaiting_approval = awaiting;
        next
    }

    pub fn with_session_topic(&self, topic: SessionTopic) -> Self {
        let mut next = self.clone();
        next.session_topic = Some(topic);
        next
    }

    pub fn with_deeplink_dispatch(&self, dispatch: DeeplinkDispatch) -> Self {
        let mut next = self.clone();
        next.deeplink_dispatch = Some(dispatch);
        next
    }

    pub fn with_deeplink_return(&self, ret: DeeplinkReturn) -> Self {
        let mut next = self.clone();
        next.deeplink_return = Some(ret);
        next
    }

    /// Attach redacted metadata for the pairing URI; the raw URI is not kept
    pub fn with_relay_uri(&self, raw_uri: &str) -> Self {
        let mut next = self.clone();
        next.relay_uri = Some(RelayUriMetadata::from_raw(raw_uri));
        next
    }

    // ===== LOGGING =====

    /// Flat, log-safe record of this context
    pub fn to_log_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            fields.insert(key.to_string(), value);
        };

        put("connection_id", self.connection_id.clone());
        put("wallet_kind", self.wallet_kind.as_str().to_string());
        match &self.target {
            ChainTarget::Evm(id) => put("chain_id", id.to_string()),
            ChainTarget::Cluster(name) => put("cluster", name.clone()),
        }
        put("step", self.step.to_string());
        if let Some(previous) = self.previous_step {
            put("previous_step", previous.to_string());
        }
        put("relay_state", self.relay_state.to_string());
        put("session_state", self.session_state.to_string());
        put("attempt", self.attempt.to_string());
        put("max_retries", self.max_retries.to_string());
        put("started_at", self.started_at.to_rfc3339());
        put("elapsed_ms", self.elapsed().as_millis().to_string());
        put("awaiting_approval", self.awaiting_approval.to_string());

        if let Some(kind) = self.error_kind {
            put("error_kind", kind.to_string());
        }
        if let Some(message) = &self.error_message {
            put(
                "error_message",
                redact::truncate_middle(message, MAX_LOGGED_MESSAGE_LEN),
            );
        }
        if let Some(topic) = &self.session_topic {
            put("session_topic", topic.masked());
        }

        if let Some(dispatch) = &self.deeplink_dispatch {
            put("deeplink_uri", dispatch.redacted_uri.clone());
            put("deeplink_uri_length", dispatch.raw_length.to_string());
            put("deeplink_outcome", dispatch.outcome.to_string());
            put("deeplink_dispatched_at", dispatch.dispatched_at.to_rfc3339());
        }

        if let Some(ret) = &self.deeplink_return {
            put("return_scheme", ret.scheme.clone());
            if let Some(host) = &ret.host {
                put("return_host", host.clone());
            }
            put("return_path", ret.path.clone());
            put("return_uri", ret.redacted.clone());
            put("return_uri_length", ret.raw_length.to_string());
            for (name, value) in &ret.query_parameters {
                put(&format!("return_param_{}", name), value.clone());
            }
        }

        if let Some(uri) = &self.relay_uri {
            put("relay_uri", uri.redacted.clone());
            put("relay_uri_length", uri.raw_length.to_string());
            put("relay_topic", uri.masked_topic.clone());
            if let Some(version) = uri.version {
                put("relay_version", version.to_string());
            }
            if let Some(protocol) = &uri.relay_protocol {
                put("relay_protocol", protocol.clone());
            }
            if let Some(error) = &uri.parse_error {
                put("relay_uri_error", error.clone());
            }
        }

        fields
    }

    /// Emit this context as one structured event
    pub fn log_transition(&self) {
        let fields = self.to_log_fields();
        let previous = self.previous_step.map(|s| s.as_str()).unwrap_or("-");
        if self.step.is_error() {
            warn!(
                connection_id = %self.connection_id,
                step = %self.step,
                previous_step = previous,
                fields = ?fields,
                "Connection transition"
            );
        } else {
            info!(
                connection_id = %self.connection_id,
                step = %self.step,
                previous_step = previous,
                fields = ?fields,
                "Connection transition"
            );
        }
    }
}
