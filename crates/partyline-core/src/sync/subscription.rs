//! Retrying change subscription for one session
//!
//! Each `ChangeSubscription` owns a background task that opens a change
//! channel on the backend, waits for the acknowledgement, forwards change
//! notices while subscribed, and retries with linearly growing delays after
//! transport failures.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ChangeSubscription (handle, exclusively owned)                  │
//! │  ├── state:        watch::Receiver<SubscriptionState>            │
//! │  ├── transitions:  broadcast::Sender<StateTransition>            │
//! │  └── cancel:       CancellationToken ── unsubscribe / drop       │
//! │                                                                  │
//! │  driver task                                                     │
//! │  ├── open_channel ─► wait for ack (subscribe_timeout)            │
//! │  ├── Changed(row) ─► notices: mpsc::Sender<ChangeNotice>         │
//! │  └── Error/TimedOut ─► Degraded(n) ─► sleep(n × base) ─► retry   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Notices only say *that* something changed. The receiver re-fetches the
//! full snapshot, so a full notice buffer is safe to skip.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{FailureKind, StateTransition, SubscriptionSignal, SubscriptionState};
use crate::backend::{ChangeFilter, ChannelSignal, RowChange, SessionBackend};
use crate::config::RetryPolicy;
use crate::types::SessionId;

/// Capacity of the per-subscription transition broadcast
const TRANSITION_CHANNEL_CAPACITY: usize = 64;

/// Why the consumer should reconcile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNotice {
    /// The channel was (re)acknowledged; changes may have been missed
    Resynced,
    /// A row in the session changed
    Row(RowChange),
}

/// Handle to a running change subscription
///
/// Dropping the handle unsubscribes.
pub struct ChangeSubscription {
    session_id: SessionId,
    state: watch::Receiver<SubscriptionState>,
    transitions: broadcast::Sender<StateTransition>,
    cancel: CancellationToken,
}

impl ChangeSubscription {
    /// Start subscribing to changes of `session_id`.
    ///
    /// Must be called inside a tokio runtime. Notices are sent to `notices`
    /// with `try_send`; a closed receiver is ignored.
    pub fn spawn(
        backend: Arc<dyn SessionBackend>,
        session_id: SessionId,
        policy: RetryPolicy,
        notices: mpsc::Sender<ChangeNotice>,
    ) -> Self {
        let (state_tx, state) = watch::channel(SubscriptionState::Idle);
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let driver = Driver {
            backend,
            session_id: session_id.clone(),
            policy,
            notices,
            state: SubscriptionState::Idle,
            state_tx,
            transitions: transitions.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(driver.run());

        Self {
            session_id,
            state,
            transitions,
            cancel,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Current state
    pub fn state(&self) -> SubscriptionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change (latest value only)
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.clone()
    }

    /// Receiver of every transition from now on, with timestamps
    pub fn transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    /// Tear down the subscription and cancel any pending retry.
    ///
    /// Callable from any state; calls after the first are no-ops.
    pub fn unsubscribe(&self) {
        if !self.cancel.is_cancelled() {
            info!(session_id = %self.session_id, "Unsubscribing from session changes");
            self.cancel.cancel();
        }
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled together with this subscription
    pub fn unsubscribed_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Wait until the driver task has reached `Closed`
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // An Err means the driver is gone, which only happens after Closed
        let _ = state.wait_for(|s| *s == SubscriptionState::Closed).await;
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Driver {
    backend: Arc<dyn SessionBackend>,
    session_id: SessionId,
    policy: RetryPolicy,
    notices: mpsc::Sender<ChangeNotice>,
    state: SubscriptionState,
    state_tx: watch::Sender<SubscriptionState>,
    transitions: broadcast::Sender<StateTransition>,
    cancel: CancellationToken,
}

impl Driver {
    /// Apply a signal; returns whether the state changed
    fn apply(&mut self, signal: SubscriptionSignal) -> bool {
        let Some(next) = self.state.next(&signal, &self.policy) else {
            return false;
        };
        let from = std::mem::replace(&mut self.state, next.clone());
        debug!(
            session_id = %self.session_id,
            %from,
            to = %next,
            ?signal,
            "Subscription transition"
        );
        let _ = self.transitions.send(StateTransition {
            from,
            to: next.clone(),
            at: Instant::now(),
        });
        self.state_tx.send_replace(next);
        true
    }

    async fn run(mut self) {
        info!(session_id = %self.session_id, "Subscribing to session changes");
        self.apply(SubscriptionSignal::Start);

        loop {
            match self.state.clone() {
                SubscriptionState::Subscribing { attempt } => {
                    let outcome = self.attempt(attempt).await;
                    self.apply(outcome);
                }
                SubscriptionState::Degraded { attempt } => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        session_id = %self.session_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Change subscription degraded, retrying"
                    );
                    let cancel = self.cancel.clone();
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            self.apply(SubscriptionSignal::Teardown);
                        }
                        _ = tokio::time::sleep(delay) => {
                            self.apply(SubscriptionSignal::RetryElapsed);
                        }
                    }
                }
                SubscriptionState::Exhausted { attempts } => {
                    warn!(
                        session_id = %self.session_id,
                        attempts,
                        "Change subscription exhausted its retry budget"
                    );
                    self.cancel.cancelled().await;
                    self.apply(SubscriptionSignal::Teardown);
                }
                SubscriptionState::Closed => break,
                // Subscribed is only ever held inside `attempt`
                SubscriptionState::Idle | SubscriptionState::Subscribed => {
                    self.apply(SubscriptionSignal::Teardown);
                }
            }
        }

        debug!(session_id = %self.session_id, "Subscription task ended");
    }

    /// One subscribe attempt, plus the subscribed phase if it is acknowledged.
    ///
    /// Returns the signal that ends it: a failure or a teardown.
    async fn attempt(&mut self, attempt: u32) -> SubscriptionSignal {
        let cancel = self.cancel.clone();
        let backend = self.backend.clone();
        let filters = ChangeFilter::for_session(&self.session_id);

        debug!(session_id = %self.session_id, attempt, "Opening change channel");
        let opened = tokio::select! {
            _ = cancel.cancelled() => return SubscriptionSignal::Teardown,
            opened = backend.open_channel(filters) => opened,
        };
        let mut channel = match opened {
            Ok(channel) => channel,
            Err(e) => return SubscriptionSignal::Failed(FailureKind::Error(e.to_string())),
        };

        let ack_deadline = tokio::time::sleep(self.policy.subscribe_timeout());
        tokio::pin!(ack_deadline);

        loop {
            let awaiting_ack = !self.state.is_subscribed();
            tokio::select! {
                _ = cancel.cancelled() => {
                    channel.unsubscribe();
                    return SubscriptionSignal::Teardown;
                }
                _ = &mut ack_deadline, if awaiting_ack => {
                    channel.unsubscribe();
                    return SubscriptionSignal::Failed(FailureKind::Timeout);
                }
                signal = channel.recv() => match signal {
                    Some(ChannelSignal::Subscribed) => {
                        if self.apply(SubscriptionSignal::Acknowledged) {
                            info!(session_id = %self.session_id, "Subscribed to session changes");
                            self.notify(ChangeNotice::Resynced);
                        }
                    }
                    Some(ChannelSignal::Changed(change)) => {
                        if self.state.is_subscribed() {
                            self.notify(ChangeNotice::Row(change));
                        }
                    }
                    Some(ChannelSignal::Error(reason)) => {
                        channel.unsubscribe();
                        return SubscriptionSignal::Failed(FailureKind::Error(reason));
                    }
                    Some(ChannelSignal::TimedOut) => {
                        channel.unsubscribe();
                        return SubscriptionSignal::Failed(FailureKind::Timeout);
                    }
                    None => {
                        return SubscriptionSignal::Failed(FailureKind::Error(
                            "channel closed by backend".to_string(),
                        ));
                    }
                },
            }
        }
    }

    fn notify(&self, notice: ChangeNotice) {
        match self.notices.try_send(notice) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(session_id = %self.session_id, "Notice buffer full, coalescing");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session_id = %self.session_id, "Notice receiver gone, dropping notice");
            }
        }
    }
}
