// Handshake recovery after the primary approval wait times out
//
// The wallet may approve while we are not listening, or the OS may have cut
// the relay socket while the approval still landed. Three phases run in
// order and stop at the first session found:
//
//   1. pre-poll delay, then one check
//   2. progressive relay reconnection (settle + check after a success)
//   3. optimistic polling of the local store, bypassing the relay
//
// A reconnect that succeeds but turns up no session also falls through to
// phase 3 instead of trying the remaining reconnects: the relay is live, so
// only a locally persisted approval can still appear.
//
// Every relay call is bounded by its own timeout and raced against the
// caller's token, so the window below is a hard upper bound.
//
// Failures inside a phase are logged and the pipeline moves on. Only the
// engine's own phase sequence reports results, and cancellation is checked
// before every externally visible effect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{duration_ms, duration_ms_vec};
use crate::connection::ConnectionLogContext;
use crate::relay::{RelayError, RelayTransport};
use crate::resilience::CircuitBreaker;
use crate::session::{PersistedSession, SessionStore};
use crate::wallet::{ChainTarget, WalletKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("No session found after {polls} polls and {reconnects} reconnect attempts")]
    Exhausted { reconnects: u32, polls: u32 },
    #[error("Recovery cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecoveryConfig {
    /// Wait before the first check, for an event already in flight at timeout
    #[serde(with = "duration_ms")]
    pub pre_poll_delay: Duration,
    /// One reconnect attempt per entry, each bounded by its timeout
    #[serde(with = "duration_ms_vec")]
    pub reconnect_timeouts: Vec<Duration>,
    #[serde(with = "duration_ms")]
    pub inter_attempt_delay: Duration,
    /// Wait after a successful reconnect before checking for a session
    #[serde(with = "duration_ms")]
    pub settle_delay: Duration,
    /// Bound on one `active_session` lookup against the relay
    #[serde(with = "duration_ms")]
    pub relay_check_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            pre_poll_delay: Duration::from_secs(1),
            reconnect_timeouts: vec![
                Duration::from_secs(3),
                Duration::from_secs(4),
                Duration::from_secs(5),
            ],
            inter_attempt_delay: Duration::from_millis(300),
            settle_delay: Duration::from_millis(500),
            relay_check_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            max_polls: 5,
        }
    }
}

impl RecoveryConfig {
    /// Longest the pipeline can run before giving up: at most two relay
    /// lookups (pre-poll and after a successful reconnect) and one settle
    pub fn worst_case_window(&self) -> Duration {
        let reconnects: Duration = self.reconnect_timeouts.iter().sum();
        let gaps = self.reconnect_timeouts.len().saturating_sub(1) as u32;
        self.pre_poll_delay
            + self.relay_check_timeout * 2
            + reconnects
            + self.inter_attempt_delay * gaps
            + self.settle_delay
            + self.poll_interval * self.max_polls
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "phase")]
pub enum RecoveryPhase {
    PrePoll,
    Reconnect { attempt: u32 },
    Polling { poll: u32 },
}

impl std::fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PrePoll => write!(f, "prePoll"),
            Self::Reconnect { attempt } => write!(f, "reconnect#{}", attempt),
            Self::Polling { poll } => write!(f, "poll#{}", poll),
        }
    }
}

/// Session found after the primary wait timed out
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredSession {
    pub session: PersistedSession,
    pub phase: RecoveryPhase,
    /// Time spent inside the recovery pipeline
    pub elapsed: Duration,
}

/// What a check looks for: this wallet, this chain, created since the attempt began
#[derive(Debug, Clone)]
struct Scope {
    kind: WalletKind,
    target: ChainTarget,
    since: DateTime<Utc>,
}

pub struct RecoveryEngine {
    config: RecoveryConfig,
    relay: Arc<dyn RelayTransport>,
    store: Arc<SessionStore>,
    breaker: Arc<CircuitBreaker>,
}

impl RecoveryEngine {
    pub fn new(
        config: RecoveryConfig,
        relay: Arc<dyn RelayTransport>,
        store: Arc<SessionStore>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            config,
            relay,
            store,
            breaker,
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Run all phases for the attempt described by `ctx`
    pub async fn recover(
        &self,
        ctx: &ConnectionLogContext,
        cancel: &CancellationToken,
    ) -> Result<RecoveredSession, RecoveryError> {
        let started = Instant::now();
        let scope = Scope {
            kind: ctx.wallet_kind(),
            target: ctx.target().clone(),
            since: ctx.started_at(),
        };
        info!(
            connection_id = %ctx.connection_id(),
            window_ms = self.config.worst_case_window().as_millis() as u64,
            "Starting recovery after approval timeout"
        );

        // Phase 1
        self.sleep(self.config.pre_poll_delay, cancel).await?;
        if let Some(session) = self.check(&scope, true, cancel).await? {
            return Ok(self.found(ctx, session, RecoveryPhase::PrePoll, started));
        }

        // Phase 2
        let mut attempts = 0u32;
        for (index, timeout) in self.config.reconnect_timeouts.iter().enumerate() {
            if index > 0 {
                self.sleep(self.config.inter_attempt_delay, cancel).await?;
            }
            ensure_live(cancel)?;
            attempts += 1;
            let phase = RecoveryPhase::Reconnect { attempt: attempts };

            match self.reconnect(*timeout, cancel).await? {
                Ok(()) => {
                    info!(connection_id = %ctx.connection_id(), %phase, "Relay reconnected");
                    self.sleep(self.config.settle_delay, cancel).await?;
                    if let Some(session) = self.check(&scope, true, cancel).await? {
                        return Ok(self.found(ctx, session, phase, started));
                    }
                    // relay is live again; further reconnects cannot help
                    debug!(connection_id = %ctx.connection_id(), "No session after reconnect, polling");
                    break;
                }
                Err(e) => {
                    warn!(
                        connection_id = %ctx.connection_id(),
                        %phase,
                        timeout_ms = timeout.as_millis() as u64,
                        error = %e,
                        "Reconnect attempt failed"
                    );
                }
            }
        }

        // Phase 3
        for poll in 1..=self.config.max_polls {
            self.sleep(self.config.poll_interval, cancel).await?;
            if let Some(session) = self.check(&scope, false, cancel).await? {
                return Ok(self.found(ctx, session, RecoveryPhase::Polling { poll }, started));
            }
            debug!(connection_id = %ctx.connection_id(), poll, "No session yet");
        }

        warn!(
            connection_id = %ctx.connection_id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Recovery exhausted"
        );
        Err(RecoveryError::Exhausted {
            reconnects: attempts,
            polls: self.config.max_polls,
        })
    }

    /// One reconnect through the breaker, bounded by `timeout`
    async fn reconnect(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Result<(), RelayError>, RecoveryError> {
        let relay = self.relay.clone();
        let attempt = self.breaker.execute(|| async move {
            match tokio::time::timeout(timeout, relay.reconnect()).await {
                Ok(result) => result,
                Err(_) => Err(RelayError::Unavailable(format!(
                    "reconnect timed out after {}ms",
                    timeout.as_millis()
                ))),
            }
        });

        tokio::select! {
            _ = cancel.cancelled() => Err(RecoveryError::Cancelled),
            result = attempt => Ok(result),
        }
    }

    /// Look for a usable session. `via_relay` also asks the live relay;
    /// otherwise only the local store is consulted.
    async fn check(
        &self,
        scope: &Scope,
        via_relay: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<PersistedSession>, RecoveryError> {
        ensure_live(cancel)?;

        if via_relay {
            let timeout = self.config.relay_check_timeout;
            let lookup = tokio::time::timeout(
                timeout,
                self.relay.active_session(scope.kind, &scope.target),
            );
            let lookup = tokio::select! {
                _ = cancel.cancelled() => return Err(RecoveryError::Cancelled),
                lookup = lookup => lookup,
            };
            match lookup {
                Ok(Ok(Some(approved)))
                    if approved.has_account() && approved.target == scope.target =>
                {
                    ensure_live(cancel)?;
                    return Ok(Some(approved.into_persisted(scope.kind, Utc::now())));
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!(error = %e, "Relay session check failed"),
                Err(_) => debug!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Relay session check timed out"
                ),
            }
        }

        ensure_live(cancel)?;
        Ok(self
            .store
            .find_connected(scope.kind, &scope.target, scope.since)
            .map(|(_, session)| session))
    }

    fn found(
        &self,
        ctx: &ConnectionLogContext,
        session: PersistedSession,
        phase: RecoveryPhase,
        started: Instant,
    ) -> RecoveredSession {
        let elapsed = started.elapsed();
        info!(
            connection_id = %ctx.connection_id(),
            %phase,
            reference = %session.masked_reference(),
            recovery_ms = elapsed.as_millis() as u64,
            recovered_after_timeout = true,
            "Session recovered"
        );
        RecoveredSession {
            session,
            phase,
            elapsed,
        }
    }

    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), RecoveryError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(RecoveryError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), RecoveryError> {
    if cancel.is_cancelled() {
        return Err(RecoveryError::Cancelled);
    }
    Ok(())
}
