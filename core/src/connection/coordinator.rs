//! Connection coordinator
//!
//! Drives one relay handshake per wallet kind:
//!
//! ```text
//! starting -> uriRequesting -> uriReceived -> deeplinkDispatching -> deeplinkDispatched
//!          -> awaitingApproval -> approvalReceived -> sessionEstablishing -> sessionEstablished
//!                              \-> approvalTimeout -> (recovery) -> sessionEstablishing ...
//! ```
//!
//! A timed-out attempt whose recovery finds nothing stays pending with its
//! awaiting-approval flag set, so [`ConnectionCoordinator::recheck_pending`]
//! can run recovery again when the app returns to the foreground.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::context::ConnectionLogContext;
use super::diagnostics::{DeeplinkDispatch, DeeplinkReturn, DispatchOutcome};
use super::step::{ConnectionStep, RelayState, SessionState};
use crate::config::ConnectorConfig;
use crate::recovery::{RecoveryEngine, RecoveryError, RecoveryPhase};
use crate::relay::{ApprovalOutcome, DeepLinkLauncher, Proposal, RelayError, RelayTransport};
use crate::resilience::{Backoff, CircuitBreaker};
use crate::session::{PersistedSession, SessionStore};
use crate::wallet::{ChainTarget, WalletKind};
use crate::WalletLinkError;

/// Established connection handed back to the caller
#[derive(Debug, Clone)]
pub struct ConnectionResult {
    pub wallet_id: String,
    pub session: PersistedSession,
    /// Found by the recovery pipeline rather than the primary wait
    pub recovered_after_timeout: bool,
    pub recovery_phase: Option<RecoveryPhase>,
    pub context: ConnectionLogContext,
}

pub struct ConnectionCoordinator {
    relay: Arc<dyn RelayTransport>,
    launcher: Arc<dyn DeepLinkLauncher>,
    store: Arc<SessionStore>,
    config: ConnectorConfig,
    pending: Mutex<HashMap<WalletKind, ConnectionLogContext>>,
    breakers: Mutex<HashMap<WalletKind, Arc<CircuitBreaker>>>,
}

impl ConnectionCoordinator {
    pub fn new(
        relay: Arc<dyn RelayTransport>,
        launcher: Arc<dyn DeepLinkLauncher>,
        store: Arc<SessionStore>,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            relay,
            launcher,
            store,
            config,
            pending: Mutex::new(HashMap::new()),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Attempt awaiting a late approval for `kind`, if any
    pub fn pending_attempt(&self, kind: WalletKind) -> Option<ConnectionLogContext> {
        self.pending.lock().get(&kind).cloned()
    }

    /// Forget a pending attempt; returns false when none existed
    pub fn cancel_pending(&self, kind: WalletKind) -> bool {
        let Some(ctx) = self.pending.lock().remove(&kind) else {
            return false;
        };
        ctx.transition_to(ConnectionStep::Failed)
            .with_awaiting_approval(false)
            .with_error(crate::ErrorKind::Cancelled, "pending attempt cancelled")
            .log_transition();
        true
    }

    /// Attach a wallet callback URI to the pending attempt for `kind`
    pub fn record_deeplink_return(&self, kind: WalletKind, raw_uri: &str) -> Option<ConnectionLogContext> {
        let mut pending = self.pending.lock();
        let ctx = pending.get_mut(&kind)?;
        let ret = DeeplinkReturn::from_uri(raw_uri);
        debug!(
            connection_id = %ctx.connection_id(),
            uri = %ret.redacted,
            "Deep link return received"
        );
        *ctx = ctx.with_deeplink_return(ret);
        Some(ctx.clone())
    }

    /// Breaker shared by proposals and reconnects for one wallet kind
    pub fn breaker(&self, kind: WalletKind) -> Arc<CircuitBreaker> {
        self.breakers
            .lock()
            .entry(kind)
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    format!("relay:{}", kind),
                    self.config.circuit_breaker.clone(),
                ))
            })
            .clone()
    }

    /// Connect `kind` on `target` (its default chain when `None`)
    pub async fn connect(
        &self,
        kind: WalletKind,
        target: Option<ChainTarget>,
        cancel: &CancellationToken,
    ) -> Result<ConnectionResult, WalletLinkError> {
        if !kind.uses_relay() {
            return Err(WalletLinkError::SessionError(format!(
                "{} connects through its own callback flow",
                kind.display_name()
            )));
        }

        let target = target.unwrap_or_else(|| kind.default_target());
        let mut ctx = ConnectionLogContext::start(kind, target, self.config.max_retries);
        ctx.log_transition();

        loop {
            match self.attempt(ctx, cancel).await {
                AttemptOutcome::Done(result) => return result,
                AttemptOutcome::Retry(failed) => {
                    ctx = failed.next_attempt();
                    info!(
                        connection_id = %ctx.connection_id(),
                        attempt = ctx.attempt(),
                        "Retrying connection"
                    );
                    ctx.log_transition();
                }
            }
        }
    }

    /// Foreground-return path: run recovery again for a pending attempt
    pub async fn recheck_pending(
        &self,
        kind: WalletKind,
        cancel: &CancellationToken,
    ) -> Result<ConnectionResult, WalletLinkError> {
        let ctx = self
            .pending_attempt(kind)
            .filter(ConnectionLogContext::awaiting_approval)
            .ok_or_else(|| {
                WalletLinkError::SessionError(format!("no pending connection for {}", kind))
            })?;

        info!(connection_id = %ctx.connection_id(), "Re-checking pending connection");
        self.recover(ctx, cancel).await
    }

    async fn attempt(&self, ctx: ConnectionLogContext, cancel: &CancellationToken) -> AttemptOutcome {
        let kind = ctx.wallet_kind();

        // ===== PROPOSAL =====
        let ctx = self.transition(
            ctx.transition_to(ConnectionStep::UriRequesting)
                .with_relay_state(RelayState::Connecting),
        );
        let proposal = match self.propose(&ctx, cancel).await {
            Ok(proposal) => proposal,
            Err(e) => {
                if cancel.is_cancelled() {
                    return AttemptOutcome::Done(Err(self.cancelled(ctx)));
                }
                let error = match e {
                    RelayError::CircuitOpen(open) => WalletLinkError::from(open),
                    other => WalletLinkError::RelayError(other.to_string()),
                };
                return AttemptOutcome::Done(Err(self.fail(
                    ctx.with_relay_state(RelayState::Error),
                    ConnectionStep::RelayError,
                    error,
                )));
            }
        };
        if cancel.is_cancelled() {
            return AttemptOutcome::Done(Err(self.cancelled(ctx)));
        }

        let Proposal { uri, approval } = proposal;
        let ctx = self.transition(
            ctx.transition_to(ConnectionStep::UriReceived)
                .with_relay_uri(&uri)
                .with_relay_state(RelayState::Connected)
                .with_session_state(SessionState::Proposed),
        );

        // ===== DEEP LINK =====
        let link = kind.connect_deeplink(&uri);
        let ctx = self.transition(ctx.transition_to(ConnectionStep::DeeplinkDispatching));
        let opened = tokio::select! {
            _ = cancel.cancelled() => return AttemptOutcome::Done(Err(self.cancelled(ctx))),
            opened = self.launcher.open(&link) => opened,
        };
        let ctx = match opened {
            Ok(true) => self.transition(
                ctx.with_deeplink_dispatch(DeeplinkDispatch::new(&link, DispatchOutcome::Opened))
                    .transition_to(ConnectionStep::DeeplinkDispatched),
            ),
            Ok(false) => {
                let ctx = ctx.with_deeplink_dispatch(DeeplinkDispatch::new(
                    &link,
                    DispatchOutcome::NotInstalled,
                ));
                return AttemptOutcome::Done(Err(self.fail(
                    ctx,
                    ConnectionStep::DeeplinkError,
                    WalletLinkError::NotInstalled(kind),
                )));
            }
            Err(reason) => {
                let ctx = ctx.with_deeplink_dispatch(DeeplinkDispatch::new(
                    &link,
                    DispatchOutcome::Failed(reason.clone()),
                ));
                return AttemptOutcome::Done(Err(self.fail(
                    ctx,
                    ConnectionStep::DeeplinkError,
                    WalletLinkError::DeeplinkError(reason),
                )));
            }
        };

        // ===== APPROVAL =====
        let ctx = self.transition(ctx.transition_to(ConnectionStep::AwaitingApproval));
        self.pending.lock().insert(kind, ctx.clone());

        let waited = tokio::select! {
            _ = cancel.cancelled() => return AttemptOutcome::Done(Err(self.cancelled(ctx))),
            waited = tokio::time::timeout(self.config.primary_timeout, approval) => waited,
        };

        match waited {
            Ok(Ok(ApprovalOutcome::Approved(approved))) => {
                if !approved.has_account() || approved.target != *ctx.target() {
                    return AttemptOutcome::Done(Err(self.fail(
                        ctx.with_session_state(SessionState::Error),
                        ConnectionStep::SessionError,
                        WalletLinkError::SessionError(
                            "approved session has no account on the requested chain".to_string(),
                        ),
                    )));
                }
                let topic = approved.topic.clone();
                let session = approved.into_persisted(kind, Utc::now());
                let ctx = self.transition(
                    ctx.transition_to(ConnectionStep::ApprovalReceived)
                        .with_session_state(SessionState::Approved)
                        .with_session_topic(topic),
                );
                AttemptOutcome::Done(self.establish(ctx, session, None))
            }
            Ok(Ok(ApprovalOutcome::Rejected { reason })) => {
                debug!(connection_id = %ctx.connection_id(), reason = %reason, "Wallet rejected proposal");
                AttemptOutcome::Done(Err(self.fail(
                    ctx.with_session_state(SessionState::Rejected),
                    ConnectionStep::ApprovalRejected,
                    WalletLinkError::Rejected,
                )))
            }
            Ok(Ok(ApprovalOutcome::Failed(reason))) => self.relay_lost(ctx, reason),
            Ok(Err(_)) => self.relay_lost(ctx, "approval channel closed".to_string()),
            Err(_) => {
                let ctx = self.transition(
                    ctx.transition_to(ConnectionStep::ApprovalTimeout)
                        .with_error(crate::ErrorKind::Timeout, "no approval before the primary deadline"),
                );
                self.pending.lock().insert(kind, ctx.clone());
                AttemptOutcome::Done(self.recover(ctx, cancel).await)
            }
        }
    }

    /// Propose through the wallet's breaker, retrying with backoff; each
    /// request is bounded by `proposal_timeout`
    async fn propose(
        &self,
        ctx: &ConnectionLogContext,
        cancel: &CancellationToken,
    ) -> Result<Proposal, RelayError> {
        let kind = ctx.wallet_kind();
        let target = ctx.target().clone();
        let breaker = self.breaker(kind);
        let connection_id = ctx.connection_id().to_string();
        let request_timeout = self.config.proposal_timeout;
        let mut backoff = Backoff::new(self.config.backoff.clone()).with_cancellation(cancel.clone());

        let retried = backoff.execute_with_retry(
            || {
                let breaker = breaker.clone();
                let relay = self.relay.clone();
                let target = target.clone();
                async move {
                    breaker
                        .execute(|| async {
                            match tokio::time::timeout(
                                request_timeout,
                                relay.propose(kind, &target),
                            )
                            .await
                            {
                                Ok(proposed) => proposed,
                                Err(_) => Err(RelayError::Unavailable(format!(
                                    "proposal timed out after {} ms",
                                    request_timeout.as_millis()
                                ))),
                            }
                        })
                        .await
                }
            },
            |e| !matches!(e, RelayError::CircuitOpen(_)),
            |retry, delay, e| {
                warn!(
                    connection_id = %connection_id,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Proposal failed, backing off"
                );
            },
        );

        tokio::select! {
            _ = cancel.cancelled() => Err(RelayError::Unavailable("proposal cancelled".to_string())),
            proposed = retried => proposed,
        }
    }

    async fn recover(
        &self,
        ctx: ConnectionLogContext,
        cancel: &CancellationToken,
    ) -> Result<ConnectionResult, WalletLinkError> {
        let kind = ctx.wallet_kind();
        let engine = RecoveryEngine::new(
            self.config.recovery.clone(),
            self.relay.clone(),
            self.store.clone(),
            self.breaker(kind),
        );

        match engine.recover(&ctx, cancel).await {
            Ok(recovered) => {
                let ctx = self.transition(
                    ctx.with_relay_state(self.relay.relay_state())
                        .with_session_state(SessionState::Approved),
                );
                self.establish(ctx, recovered.session, Some(recovered.phase))
            }
            Err(RecoveryError::Cancelled) => Err(self.cancelled(ctx)),
            Err(e @ RecoveryError::Exhausted { .. }) => {
                // keep the attempt so a foreground return can look again
                let ctx = ctx
                    .with_awaiting_approval(true)
                    .with_error(crate::ErrorKind::Timeout, e.to_string());
                ctx.log_transition();
                self.pending.lock().insert(kind, ctx);
                Err(WalletLinkError::Timeout)
            }
        }
    }

    fn establish(
        &self,
        ctx: ConnectionLogContext,
        session: PersistedSession,
        phase: Option<RecoveryPhase>,
    ) -> Result<ConnectionResult, WalletLinkError> {
        let kind = ctx.wallet_kind();
        let ctx = self.transition(ctx.transition_to(ConnectionStep::SessionEstablishing));

        let saved = self
            .store
            .save(session.clone())
            .and_then(|wallet_id| self.store.set_active(&wallet_id).map(|_| wallet_id));
        let wallet_id = match saved {
            Ok(id) => id,
            Err(e) => {
                let error = WalletLinkError::from(e);
                return Err(self.fail(
                    ctx.with_session_state(SessionState::Error),
                    ConnectionStep::SessionError,
                    error,
                ));
            }
        };

        let mut ctx = ctx.transition_to(ConnectionStep::SessionEstablished);
        if let Some(topic) = session.topic() {
            ctx = ctx.with_session_topic(topic);
        }
        let ctx = self.transition(ctx);
        self.pending.lock().remove(&kind);

        info!(
            connection_id = %ctx.connection_id(),
            wallet_id = %wallet_id,
            recovered_after_timeout = phase.is_some(),
            recovery_phase = ?phase,
            elapsed_ms = ctx.elapsed().as_millis() as u64,
            "Wallet connected"
        );

        Ok(ConnectionResult {
            wallet_id,
            session,
            recovered_after_timeout: phase.is_some(),
            recovery_phase: phase,
            context: ctx,
        })
    }

    fn relay_lost(&self, ctx: ConnectionLogContext, reason: String) -> AttemptOutcome {
        let ctx = self.transition(
            ctx.transition_to(ConnectionStep::RelayError)
                .with_relay_state(RelayState::Error)
                .with_error(crate::ErrorKind::RelayError, reason.clone()),
        );
        if ctx.can_retry() {
            return AttemptOutcome::Retry(ctx);
        }
        self.pending.lock().remove(&ctx.wallet_kind());
        AttemptOutcome::Done(Err(WalletLinkError::RelayError(reason)))
    }

    fn transition(&self, ctx: ConnectionLogContext) -> ConnectionLogContext {
        ctx.log_transition();
        ctx
    }

    fn fail(
        &self,
        ctx: ConnectionLogContext,
        step: ConnectionStep,
        error: WalletLinkError,
    ) -> WalletLinkError {
        let ctx = ctx
            .transition_to(step)
            .with_awaiting_approval(false)
            .with_error(error.kind(), error.to_string());
        ctx.log_transition();
        self.pending.lock().remove(&ctx.wallet_kind());
        error
    }

    /// Caller went away: drop the attempt without further effects
    fn cancelled(&self, ctx: ConnectionLogContext) -> WalletLinkError {
        self.pending.lock().remove(&ctx.wallet_kind());
        debug!(connection_id = %ctx.connection_id(), step = %ctx.step(), "Connection cancelled");
        WalletLinkError::Cancelled
    }
}

enum AttemptOutcome {
    Done(Result<ConnectionResult, WalletLinkError>),
    /// Relay lost the proposal; start over with a fresh attempt
    Retry(ConnectionLogContext),
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::relay::{
        ApprovedSession, MockDeepLinkLauncher, ProposeScript, ReconnectScript, ScriptedRelay,
    };
    use crate::session::types::fixtures::topic_hex;
    use crate::store::MemoryStorage;
    use std::time::Duration;
    use tokio::time::Instant;

    fn approved() -> ApprovedSession {
        ApprovedSession {
            topic: crate::session::topic::validate(Some(&topic_hex(0x77))).unwrap(),
            accounts: vec!["eip155:1:0xCafe".to_string()],
            target: ChainTarget::Evm(1),
            expires_at: Utc::now() + chrono::Duration::days(7),
        }
    }

    fn launcher(installed: bool) -> Arc<dyn DeepLinkLauncher> {
        let mut launcher = MockDeepLinkLauncher::new();
        launcher.expect_open().returning(move |_| Ok(installed));
        Arc::new(launcher)
    }

    fn coordinator(relay: Arc<ScriptedRelay>, installed: bool) -> ConnectionCoordinator {
        let mut config = ConnectorConfig::default();
        config.backoff.jitter_factor = 0.0;
        ConnectionCoordinator::new(
            relay,
            launcher(installed),
            Arc::new(SessionStore::new(Arc::new(MemoryStorage::new()))),
            config,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_approval_establishes_active_session() {
        let relay = Arc::new(ScriptedRelay::new());
        relay.script_propose(ProposeScript::Answer {
            outcome: ApprovalOutcome::Approved(approved()),
            after: Duration::from_secs(8),
        });
        let coordinator = coordinator(relay, true);

        let result = coordinator
            .connect(WalletKind::MetaMask, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.wallet_id, "metamask_0xcafe");
        assert!(!result.recovered_after_timeout);
        assert_eq!(result.context.step(), ConnectionStep::SessionEstablished);
        assert_eq!(
            coordinator.store().active_wallet_id().as_deref(),
            Some("metamask_0xcafe")
        );
        assert!(coordinator.pending_attempt(WalletKind::MetaMask).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_expected_outcome() {
        let relay = Arc::new(ScriptedRelay::new());
        relay.script_propose(ProposeScript::Answer {
            outcome: ApprovalOutcome::Rejected {
                reason: "user declined".to_string(),
            },
            after: Duration::from_secs(2),
        });
        let coordinator = coordinator(relay, true);

        let err = coordinator
            .connect(WalletKind::Trust, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, WalletLinkError::Rejected);
        assert!(err.is_expected());
        assert!(coordinator.pending_attempt(WalletKind::Trust).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_installed_detected() {
        let relay = Arc::new(ScriptedRelay::new());
        let coordinator = coordinator(relay, false);

        let err = coordinator
            .connect(WalletKind::Rainbow, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, WalletLinkError::NotInstalled(WalletKind::Rainbow));
    }

    #[tokio::test(start_paused = true)]
    async fn test_proposal_retries_with_backoff() {
        let relay = Arc::new(ScriptedRelay::new());
        relay
            .script_propose(ProposeScript::Fail("relay busy".to_string()))
            .script_propose(ProposeScript::Fail("relay busy".to_string()))
            .script_propose(ProposeScript::Answer {
                outcome: ApprovalOutcome::Approved(approved()),
                after: Duration::from_secs(1),
            });
        let coordinator = coordinator(relay.clone(), true);

        let start = Instant::now();
        let result = coordinator
            .connect(WalletKind::MetaMask, None, &CancellationToken::new())
            .await;
        assert!(result.is_ok());
        assert_eq!(relay.proposals(), 3);
        // 500ms + 1000ms backoff, then 1s to approve
        assert_eq!(start.elapsed(), Duration::from_millis(2_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_channel_starts_next_attempt() {
        let relay = Arc::new(ScriptedRelay::new());
        relay
            .script_propose(ProposeScript::DropChannel)
            .script_propose(ProposeScript::Answer {
                outcome: ApprovalOutcome::Approved(approved()),
                after: Duration::from_secs(1),
            });
        let coordinator = coordinator(relay.clone(), true);

        let result = coordinator
            .connect(WalletKind::MetaMask, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.context.attempt(), 1);
        assert_eq!(relay.proposals(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_channel_exhausts_retries() {
        let relay = Arc::new(ScriptedRelay::new());
        for _ in 0..4 {
            relay.script_propose(ProposeScript::DropChannel);
        }
        let coordinator = coordinator(relay.clone(), true);

        let err = coordinator
            .connect(WalletKind::MetaMask, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WalletLinkError::RelayError(_)));
        assert!(!err.is_expected());
        assert_eq!(relay.proposals(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait() {
        let relay = Arc::new(ScriptedRelay::new());
        let coordinator = coordinator(relay, true);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let err = coordinator
            .connect(WalletKind::MetaMask, None, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, WalletLinkError::Cancelled);
        assert!(coordinator.pending_attempt(WalletKind::MetaMask).is_none());
        assert_eq!(coordinator.store().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_attempt_pending() {
        let relay = Arc::new(ScriptedRelay::new());
        let coordinator = coordinator(relay.clone(), true);

        let err = coordinator
            .connect(WalletKind::MetaMask, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, WalletLinkError::Timeout);

        let pending = coordinator.pending_attempt(WalletKind::MetaMask).unwrap();
        assert!(pending.awaiting_approval());
        assert_eq!(pending.error_kind(), Some(crate::ErrorKind::Timeout));

        relay.script_reconnect(ReconnectScript::Succeed { after: Duration::from_millis(10) });
        relay.expose_after_reconnect(approved());
        let result = coordinator
            .recheck_pending(WalletKind::MetaMask, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.recovered_after_timeout);
        assert_eq!(result.recovery_phase, Some(RecoveryPhase::Reconnect { attempt: 1 }));
        assert!(coordinator.pending_attempt(WalletKind::MetaMask).is_none());
    }

    fn cancel_after(delay: Duration) -> CancellationToken {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trigger.cancel();
        });
        cancel
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_proposal_is_retried_after_timeout() {
        let relay = Arc::new(ScriptedRelay::new());
        relay
            .script_propose(ProposeScript::Hang)
            .script_propose(ProposeScript::Answer {
                outcome: ApprovalOutcome::Approved(approved()),
                after: Duration::from_secs(1),
            });
        let coordinator = coordinator(relay.clone(), true);

        let start = Instant::now();
        let result = coordinator
            .connect(WalletKind::MetaMask, None, &CancellationToken::new())
            .await;
        assert!(result.is_ok());
        assert_eq!(relay.proposals(), 2);
        // 10s request timeout + 500ms backoff, then 1s to approve
        assert_eq!(start.elapsed(), Duration::from_millis(11_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_hanging_proposal() {
        let relay = Arc::new(ScriptedRelay::new());
        relay.script_propose(ProposeScript::Hang);
        let coordinator = coordinator(relay.clone(), true);
        let cancel = cancel_after(Duration::from_secs(5));

        let start = Instant::now();
        let err = coordinator
            .connect(WalletKind::MetaMask, None, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, WalletLinkError::Cancelled);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(relay.proposals(), 1);
        assert!(coordinator.pending_attempt(WalletKind::MetaMask).is_none());
    }

    struct StuckLauncher;

    #[async_trait]
    impl DeepLinkLauncher for StuckLauncher {
        async fn open(&self, _uri: &str) -> Result<bool, String> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_hanging_deeplink_open() {
        let relay = Arc::new(ScriptedRelay::new());
        let coordinator = ConnectionCoordinator::new(
            relay,
            Arc::new(StuckLauncher),
            Arc::new(SessionStore::new(Arc::new(MemoryStorage::new()))),
            ConnectorConfig::default(),
        );
        let cancel = cancel_after(Duration::from_secs(3));

        let start = Instant::now();
        let err = coordinator
            .connect(WalletKind::MetaMask, None, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, WalletLinkError::Cancelled);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(coordinator.store().count(), 0);
    }

    #[tokio::test]
    async fn test_direct_key_wallets_are_not_coordinated() {
        let relay = Arc::new(ScriptedRelay::new());
        let coordinator = coordinator(relay.clone(), true);
        let err = coordinator
            .connect(WalletKind::Phantom, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WalletLinkError::SessionError(_)));
        assert_eq!(relay.proposals(), 0);
    }

    #[tokio::test]
    async fn test_recheck_without_pending_attempt() {
        let coordinator = coordinator(Arc::new(ScriptedRelay::new()), true);
        assert!(coordinator
            .recheck_pending(WalletKind::Trust, &CancellationToken::new())
            .await
            .is_err());
        assert!(!coordinator.cancel_pending(WalletKind::Trust));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deeplink_return_attached_to_pending() {
        let relay = Arc::new(ScriptedRelay::new());
        let coordinator = coordinator(relay, true);
        coordinator
            .connect(WalletKind::MetaMask, None, &CancellationToken::new())
            .await
            .unwrap_err();

        let ctx = coordinator
            .record_deeplink_return(WalletKind::MetaMask, "myapp://wc?symKey=deadbeef")
            .unwrap();
        assert_eq!(ctx.deeplink_return().unwrap().query_parameters["symKey"], "***");
        assert!(coordinator.cancel_pending(WalletKind::MetaMask));
        assert!(coordinator.pending_attempt(WalletKind::MetaMask).is_none());
    }
}
