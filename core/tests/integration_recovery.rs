//! End-to-end handshake timeout and recovery on a paused clock

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use walletlink_core::{
    ApprovalOutcome, ApprovedSession, ChainTarget, ConnectionCoordinator, ConnectionStep,
    ConnectorConfig, DeepLinkLauncher, MemoryStorage, PersistedSession, Proposal, RecoveryPhase,
    RelayError, RelayState, RelayTransport, SessionStore, WalletKind, WalletLinkError,
};

// ============================================================================
// TEST COLLABORATORS
// ============================================================================

fn approved_for(kind: WalletKind) -> ApprovedSession {
    let seed = kind.as_str().len() as u8;
    ApprovedSession {
        topic: format!("{:02x}", seed).repeat(32).parse().unwrap(),
        accounts: vec![format!("eip155:1:0x{}", kind.as_str())],
        target: ChainTarget::Evm(1),
        expires_at: Utc::now() + chrono::Duration::days(7),
    }
}

/// Relay whose wallet never answers in time unless told otherwise
#[derive(Default)]
struct TestRelay {
    /// `None` means reconnects never complete
    reconnect_after: Option<Duration>,
    expose_on_reconnect: Mutex<Option<ApprovedSession>>,
    live: Mutex<Option<ApprovedSession>>,
    approve_after: Mutex<HashMap<WalletKind, Duration>>,
    open_senders: Mutex<Vec<oneshot::Sender<ApprovalOutcome>>>,
    reconnects: AtomicU32,
}

#[async_trait]
impl RelayTransport for TestRelay {
    async fn propose(&self, kind: WalletKind, _target: &ChainTarget) -> Result<Proposal, RelayError> {
        let (tx, rx) = oneshot::channel();
        let approve_after = self.approve_after.lock().unwrap().get(&kind).copied();
        match approve_after {
            Some(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(ApprovalOutcome::Approved(approved_for(kind)));
                });
            }
            None => self.open_senders.lock().unwrap().push(tx),
        }
        Ok(Proposal {
            uri: format!(
                "wc:{}@2?relay-protocol=irn&symKey={}",
                "ee".repeat(32),
                "ff".repeat(32)
            ),
            approval: rx,
        })
    }

    async fn reconnect(&self) -> Result<(), RelayError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        match self.reconnect_after {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                if let Some(session) = self.expose_on_reconnect.lock().unwrap().take() {
                    *self.live.lock().unwrap() = Some(session);
                }
                Ok(())
            }
            None => std::future::pending().await,
        }
    }

    fn relay_state(&self) -> RelayState {
        RelayState::Connected
    }

    async fn active_session(
        &self,
        _kind: WalletKind,
        _target: &ChainTarget,
    ) -> Result<Option<ApprovedSession>, RelayError> {
        Ok(self.live.lock().unwrap().clone())
    }
}

struct InstalledWallets;

#[async_trait]
impl DeepLinkLauncher for InstalledWallets {
    async fn open(&self, _uri: &str) -> Result<bool, String> {
        Ok(true)
    }
}

fn coordinator(relay: Arc<TestRelay>) -> (ConnectionCoordinator, Arc<SessionStore>) {
    let store = Arc::new(SessionStore::new(Arc::new(MemoryStorage::new())));
    let coordinator = ConnectionCoordinator::new(
        relay,
        Arc::new(InstalledWallets),
        store.clone(),
        ConnectorConfig::default(),
    );
    (coordinator, store)
}

fn wallet_side_session(kind: WalletKind) -> PersistedSession {
    approved_for(kind).into_persisted(kind, Utc::now())
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_scenario_a_reconnect_recovers_within_settle() {
    let relay = Arc::new(TestRelay {
        reconnect_after: Some(Duration::from_millis(2_900)),
        ..Default::default()
    });
    *relay.expose_on_reconnect.lock().unwrap() = Some(approved_for(WalletKind::MetaMask));
    let (coordinator, store) = coordinator(relay.clone());

    let start = Instant::now();
    let result = coordinator
        .connect(WalletKind::MetaMask, None, &CancellationToken::new())
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert!(result.recovered_after_timeout);
    assert_eq!(result.recovery_phase, Some(RecoveryPhase::Reconnect { attempt: 1 }));
    assert!(elapsed >= Duration::from_secs(64) && elapsed <= Duration::from_millis(64_500));
    assert_eq!(relay.reconnects.load(Ordering::SeqCst), 1);
    assert_eq!(store.active_wallet_id(), Some(result.wallet_id));
    assert_eq!(result.context.step(), ConnectionStep::SessionEstablished);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_polling_finds_locally_persisted_session() {
    let relay = Arc::new(TestRelay::default());
    let (coordinator, store) = coordinator(relay.clone());

    // the wallet-side approval lands in local storage while the relay is down
    let writer = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(75)).await;
        writer.save(wallet_side_session(WalletKind::MetaMask)).unwrap();
    });

    let start = Instant::now();
    let result = coordinator
        .connect(WalletKind::MetaMask, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.recovery_phase, Some(RecoveryPhase::Polling { poll: 2 }));
    // 60 + 1 + (3 + 0.3 + 4 + 0.3 + 5) + 2
    assert_eq!(start.elapsed(), Duration::from_millis(75_600));
    assert_eq!(relay.reconnects.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_c_exhausted_recovery_can_be_rechecked() {
    let relay = Arc::new(TestRelay::default());
    let (coordinator, store) = coordinator(relay.clone());

    let start = Instant::now();
    let err = coordinator
        .connect(WalletKind::MetaMask, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, WalletLinkError::Timeout);
    assert!(err.is_expected());
    assert_eq!(start.elapsed(), Duration::from_millis(78_600));

    let pending = coordinator.pending_attempt(WalletKind::MetaMask).unwrap();
    assert!(pending.awaiting_approval());

    // approval persisted after recovery gave up; the user then returns to the app
    store.save(wallet_side_session(WalletKind::MetaMask)).unwrap();
    let result = coordinator
        .recheck_pending(WalletKind::MetaMask, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.recovered_after_timeout);
    assert_eq!(result.recovery_phase, Some(RecoveryPhase::PrePoll));
    assert_eq!(store.active_wallet_id(), Some(result.wallet_id));
    assert!(coordinator.pending_attempt(WalletKind::MetaMask).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stale_session_for_other_wallet_is_not_recovery() {
    let relay = Arc::new(TestRelay::default());
    let (coordinator, store) = coordinator(relay);
    store.save(wallet_side_session(WalletKind::Trust)).unwrap();

    let err = coordinator
        .connect(WalletKind::MetaMask, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, WalletLinkError::Timeout);
}

#[tokio::test(start_paused = true)]
async fn test_attempts_for_different_wallets_are_independent() {
    let relay = Arc::new(TestRelay::default());
    relay
        .approve_after
        .lock()
        .unwrap()
        .insert(WalletKind::Rainbow, Duration::from_secs(5));
    let (coordinator, store) = coordinator(relay);

    let cancel = CancellationToken::new();
    let (rainbow, metamask) = tokio::join!(
        coordinator.connect(WalletKind::Rainbow, None, &cancel),
        coordinator.connect(WalletKind::MetaMask, None, &cancel),
    );

    assert!(!rainbow.unwrap().recovered_after_timeout);
    assert_eq!(metamask.unwrap_err(), WalletLinkError::Timeout);
    assert!(coordinator.pending_attempt(WalletKind::Rainbow).is_none());
    assert!(coordinator.pending_attempt(WalletKind::MetaMask).is_some());
    assert_eq!(store.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_recovery_stops_effects() {
    let relay = Arc::new(TestRelay::default());
    let (coordinator, store) = coordinator(relay.clone());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(62)).await;
        trigger.cancel();
    });

    let err = coordinator
        .connect(WalletKind::MetaMask, None, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, WalletLinkError::Cancelled);
    assert!(coordinator.pending_attempt(WalletKind::MetaMask).is_none());
    assert_eq!(store.count(), 0);
    assert_eq!(relay.reconnects.load(Ordering::SeqCst), 1);
}
