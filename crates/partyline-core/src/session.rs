//! Per-session public API
//!
//! `SessionClient` resolves sessions (cloud first, local fallback) and hands
//! out `LiveSession`s. A `LiveSession` owns everything that keeps its view
//! fresh: the reconciler and, for cloud sessions, at most one change
//! subscription. Dropping it tears all of that down.
//!
//! # Example
//!
//! ```ignore
//! let backend = Arc::new(MemoryBackend::new());
//! let client = SessionClient::new(
//!     StoreClient::new(backend),
//!     LocalStore::open("local.redb")?,
//!     ClientConfig::default(),
//! );
//!
//! // Host: creates and auto-subscribes
//! let host = client.create(NewSession::new(AppType::Quiz, "Pub quiz", config)).await?;
//!
//! // Participant on another device: loads by code, no subscription
//! let guest = client.load(host.code(), AppType::Quiz, Role::Participant).await?;
//! let me = guest.join("Ann", json!({})).await?;
//!
//! // Host's view catches up after the next reconciliation
//! let mut view = host.watch();
//! view.changed().await?;
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::SessionResult;
use crate::resolver::{DualModeResolver, ResolvedSession};
use crate::storage::LocalStore;
use crate::store::StoreClient;
use crate::sync::{
    ChangeSubscription, Reconciler, SessionMode, SessionView, SnapshotSource, StateTransition,
    SubscriptionState,
};
use crate::types::{AppType, NewSession, Participant, ParticipantId, SessionId};

/// Which side of the session this client is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created (or re-opened) the session; subscribes to changes
    Host,
    /// Joined by code; refreshes on its own writes and explicit reloads
    Participant,
}

/// Entry point for opening sessions
#[derive(Clone)]
pub struct SessionClient {
    resolver: DualModeResolver,
    config: ClientConfig,
}

impl SessionClient {
    pub fn new(store: StoreClient, local: LocalStore, config: ClientConfig) -> Self {
        Self {
            resolver: DualModeResolver::new(store, local),
            config,
        }
    }

    pub fn resolver(&self) -> &DualModeResolver {
        &self.resolver
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create a session as its host
    pub async fn create(&self, request: NewSession) -> SessionResult<LiveSession> {
        let resolved = self.resolver.create(request).await?;
        Ok(self.open(resolved, Role::Host))
    }

    /// Open an existing session by code
    pub async fn load(
        &self,
        code: &str,
        app_type: AppType,
        role: Role,
    ) -> SessionResult<LiveSession> {
        let resolved = self.resolver.load(code, app_type).await?;
        Ok(self.open(resolved, role))
    }

    /// Shut down the shared store client; open sessions start failing with
    /// `StoreUnavailable`.
    pub fn shutdown(&self) {
        self.resolver.store().shutdown();
    }

    fn open(&self, resolved: ResolvedSession, role: Role) -> LiveSession {
        let session = LiveSession::new(
            self.resolver.store().clone(),
            self.resolver.local().clone(),
            self.config.clone(),
            resolved,
            role,
        );
        if role == Role::Host && self.config.auto_subscribe_host {
            session.subscribe();
        }
        session
    }
}

struct ActiveSubscription {
    handle: ChangeSubscription,
    listener: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl ActiveSubscription {
    /// Stop the subscription and its tasks, leaving `Closed` on the view
    fn stop(self, reconciler: &Reconciler) {
        self.handle.unsubscribe();
        self.forwarder.abort();
        self.listener.abort();
        reconciler.update_view(|view| view.apply_subscription(SubscriptionState::Closed));
    }
}

/// One opened session, cloud or local
pub struct LiveSession {
    store: StoreClient,
    local: LocalStore,
    config: ClientConfig,
    mode: SessionMode,
    role: Role,
    session_id: SessionId,
    code: String,
    reconciler: Arc<Reconciler>,
    subscription: Mutex<Option<ActiveSubscription>>,
    cancel: CancellationToken,
}

impl LiveSession {
    fn new(
        store: StoreClient,
        local: LocalStore,
        config: ClientConfig,
        resolved: ResolvedSession,
        role: Role,
    ) -> Self {
        let session_id = resolved.snapshot.session.id.clone();
        let code = resolved.snapshot.session.code.clone();
        let view = SessionView::new(resolved.snapshot, resolved.mode);
        if let Some(reason) = &resolved.fallback_reason {
            // Not a failure from the consumer's point of view
            debug!(%session_id, %reason, "Opened local session");
        }

        let (view_tx, _) = watch::channel(view);
        let cancel = CancellationToken::new();
        let source: Arc<dyn SnapshotSource> = match resolved.mode {
            SessionMode::Cloud => Arc::new(store.clone()),
            SessionMode::Local => Arc::new(local.clone()),
        };
        let reconciler = Arc::new(Reconciler::new(
            source,
            session_id.clone(),
            view_tx,
            cancel.clone(),
        ));

        info!(%session_id, %code, mode = ?resolved.mode, ?role, "Opened session");
        Self {
            store,
            local,
            config,
            mode: resolved.mode,
            role,
            session_id,
            code,
            reconciler,
            subscription: Mutex::new(None),
            cancel,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_cloud_mode(&self) -> bool {
        self.mode == SessionMode::Cloud
    }

    /// Copy of the latest view
    pub fn view(&self) -> SessionView {
        self.reconciler.current_view()
    }

    /// Receiver notified whenever the view changes
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.reconciler.watch_view()
    }

    /// Current change-subscription state.
    ///
    /// `Idle` if no subscription was ever started, `Closed` once it was
    /// stopped by `unsubscribe` or `teardown`.
    pub fn subscription_state(&self) -> SubscriptionState {
        match self.subscription.lock().as_ref() {
            Some(active) => active.handle.state(),
            None => self.reconciler.current_view().subscription,
        }
    }

    /// Transition stream of the running subscription, if any
    pub fn subscription_transitions(&self) -> Option<broadcast::Receiver<StateTransition>> {
        self.subscription
            .lock()
            .as_ref()
            .map(|active| active.handle.transitions())
    }

    /// Start listening for changes.
    ///
    /// Returns `false` when nothing was started: local sessions never sync,
    /// torn-down sessions stay down, and a live subscription is kept. An
    /// exhausted subscription is replaced by a fresh one.
    pub fn subscribe(&self) -> bool {
        if self.mode == SessionMode::Local {
            debug!(session_id = %self.session_id, "Local session, not subscribing");
            return false;
        }
        if self.cancel.is_cancelled() {
            return false;
        }

        let mut slot = self.subscription.lock();
        if let Some(active) = slot.as_ref() {
            if !active.handle.state().is_terminal() {
                return false;
            }
        }
        if let Some(stale) = slot.take() {
            stale.stop(&self.reconciler);
        }

        let (notices_tx, notices_rx) = mpsc::channel(self.config.notice_capacity);
        let handle = ChangeSubscription::spawn(
            self.store.backend().clone(),
            self.session_id.clone(),
            self.config.retry,
            notices_tx,
        );
        let listener = self.reconciler.clone().spawn_listener(notices_rx);
        let forwarder = spawn_status_forwarder(
            self.reconciler.clone(),
            handle.watch_state(),
            handle.unsubscribed_token(),
        );

        *slot = Some(ActiveSubscription {
            handle,
            listener,
            forwarder,
        });
        true
    }

    /// Stop listening for changes. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(active) = self.subscription.lock().take() {
            active.stop(&self.reconciler);
        }
    }

    /// Re-fetch the full snapshot now
    pub async fn reload(&self) -> SessionResult<()> {
        self.reconciler.reconcile().await
    }

    /// Add a participant to this session (not idempotent)
    pub async fn join(&self, display_name: &str, metadata: Value) -> SessionResult<Participant> {
        let result = match self.mode {
            SessionMode::Cloud => {
                self.store
                    .join_session(&self.session_id, display_name, metadata)
                    .await
            }
            SessionMode::Local => self
                .local
                .join_session(&self.session_id, display_name, metadata),
        };
        self.after_write(result).await
    }

    /// Overwrite a participant's metadata in full (last write wins)
    pub async fn update_participant(
        &self,
        participant_id: &ParticipantId,
        metadata: Value,
    ) -> SessionResult<()> {
        let result = match self.mode {
            SessionMode::Cloud => self.store.update_participant(participant_id, metadata).await,
            SessionMode::Local => self.local.update_participant(participant_id, metadata),
        };
        self.after_write(result).await
    }

    /// Deactivate the session
    pub async fn close(&self) -> SessionResult<()> {
        let result = match self.mode {
            SessionMode::Cloud => self.store.close_session(&self.session_id).await,
            SessionMode::Local => self.local.close_session(&self.session_id),
        };
        self.after_write(result).await
    }

    /// Unsubscribe and drop every later reconciliation. Idempotent.
    pub fn teardown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.unsubscribe();
        self.cancel.cancel();
        debug!(session_id = %self.session_id, "Session torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn has_live_subscription(&self) -> bool {
        self.subscription
            .lock()
            .as_ref()
            .is_some_and(|active| active.handle.state().is_subscribed())
    }

    /// Refresh after our own write unless a subscription will deliver it,
    /// and record failures on the view.
    async fn after_write<T>(&self, result: SessionResult<T>) -> SessionResult<T> {
        match result {
            Ok(value) => {
                if !self.has_live_subscription() {
                    // Failures are recorded on the view by the reconciler
                    let _ = self.reconciler.reconcile().await;
                }
                Ok(value)
            }
            Err(e) => {
                if !self.cancel.is_cancelled() {
                    self.reconciler
                        .update_view(|view| view.last_error = Some(e.clone()));
                }
                Err(e)
            }
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Mirror subscription state changes into the view until `Closed` or abort.
///
/// Once `stopped` is cancelled nothing more is written; `stop` owns the final
/// `Closed`. The check runs under the view lock so it cannot interleave with
/// that write.
fn spawn_status_forwarder(
    reconciler: Arc<Reconciler>,
    mut states: watch::Receiver<SubscriptionState>,
    stopped: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let state = states.borrow_and_update().clone();
            let closed = state == SubscriptionState::Closed;
            reconciler.update_view(|view| {
                if !stopped.is_cancelled() {
                    view.apply_subscription(state);
                }
            });
            if closed || stopped.is_cancelled() || states.changed().await.is_err() {
                break;
            }
        }
    })
}
