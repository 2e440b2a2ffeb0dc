//! Fetch-on-notify reconciliation
//!
//! Every change notice (and every manual reload) re-fetches the complete
//! session + participant snapshot and swaps it into the consumer's view. No
//! row is ever patched in place, so the cost of one notice is one full
//! snapshot read regardless of how small the change was. That is fine for a
//! party of tens of people and is the scaling boundary of this design.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::subscription::ChangeNotice;
use super::view::SessionView;
use crate::error::SessionResult;
use crate::store::StoreClient;
use crate::types::{SessionId, SessionSnapshot};

/// Anything that can produce a full session snapshot by id
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, session_id: &SessionId) -> SessionResult<SessionSnapshot>;
}

#[async_trait]
impl SnapshotSource for StoreClient {
    async fn fetch(&self, session_id: &SessionId) -> SessionResult<SessionSnapshot> {
        self.fetch_snapshot(session_id).await
    }
}

/// Replaces a consumer's view with freshly fetched snapshots
pub struct Reconciler {
    source: Arc<dyn SnapshotSource>,
    session_id: SessionId,
    view: watch::Sender<SessionView>,
    cancel: CancellationToken,
    issued: AtomicU64,
    applied: Mutex<u64>,
}

impl Reconciler {
    /// `cancel` marks the consumer as torn down; results after it are dropped.
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        session_id: SessionId,
        view: watch::Sender<SessionView>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            session_id,
            view,
            cancel,
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Copy of the current view
    pub fn current_view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every view change
    pub fn watch_view(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    /// Apply a non-snapshot change (subscription status, errors) to the view
    pub fn update_view(&self, update: impl FnOnce(&mut SessionView)) {
        self.view.send_modify(update);
    }

    /// Fetch the full snapshot and replace the view with it.
    ///
    /// A fetch that completes after a newer fetch was already applied is
    /// discarded, as is any fetch completing after teardown. Failures are
    /// recorded in `last_error` and returned.
    pub async fn reconcile(&self) -> SessionResult<()> {
        let ticket = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.source.fetch(&self.session_id).await;

        if self.cancel.is_cancelled() {
            debug!(session_id = %self.session_id, "Consumer torn down, dropping snapshot");
            return Ok(());
        }

        match result {
            Ok(snapshot) => {
                let mut applied = self.applied.lock();
                if ticket < *applied {
                    debug!(session_id = %self.session_id, ticket, "Discarding stale snapshot");
                    return Ok(());
                }
                *applied = ticket;
                let participants = snapshot.participants.len();
                self.view.send_modify(|view| view.apply_snapshot(snapshot));
                debug!(session_id = %self.session_id, participants, "Reconciled session");
                Ok(())
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Reconcile fetch failed");
                self.view
                    .send_modify(|view| view.last_error = Some(e.clone()));
                Err(e)
            }
        }
    }

    /// Reconcile once per burst of notices until the notice sender or the
    /// consumer goes away.
    pub fn spawn_listener(
        self: Arc<Self>,
        mut notices: mpsc::Receiver<ChangeNotice>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let notice = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    notice = notices.recv() => notice,
                };
                let Some(notice) = notice else { break };

                let mut coalesced = 0usize;
                while notices.try_recv().is_ok() {
                    coalesced += 1;
                }
                debug!(
                    session_id = %self.session_id,
                    ?notice,
                    coalesced,
                    "Change notice, reconciling"
                );
                // Failures are already recorded on the view
                let _ = self.reconcile().await;
            }
            debug!(session_id = %self.session_id, "Reconcile listener ended");
        })
    }
}
