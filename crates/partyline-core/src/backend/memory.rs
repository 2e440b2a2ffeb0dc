//! In-process reference backend
//!
//! Implements the full [`SessionBackend`] contract over plain vectors, which
//! keep rows in insertion order (and therefore participants in join order).
//! It enforces per-app uniqueness of active codes and can inject the
//! transport faults a hosted store exhibits: going offline, refusing or never
//! acknowledging subscriptions, and dropping live channels.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    ChangeChannel, ChangeFilter, ChangeKind, ChannelSignal, RowChange, SessionBackend, Table,
};
use crate::error::{SessionError, SessionResult};
use crate::types::{AppType, Participant, ParticipantId, Session, SessionId};

/// Counters for asserting on backend traffic in tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// `open_channel` calls that reached the backend
    pub channels_opened: u64,
    /// `list_participants` calls (one per snapshot fetch)
    pub participant_reads: u64,
    /// Successful row writes
    pub writes: u64,
}

#[derive(Default)]
struct Tables {
    sessions: Vec<Session>,
    participants: Vec<Participant>,
}

struct ChannelEntry {
    filters: Vec<ChangeFilter>,
    tx: mpsc::UnboundedSender<ChannelSignal>,
    cancel: CancellationToken,
    acknowledged: bool,
}

impl ChannelEntry {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

#[derive(Default)]
struct Faults {
    offline: bool,
    refuse_subscriptions: u32,
    mute_subscriptions: u32,
}

#[derive(Default)]
struct Inner {
    tables: RwLock<Tables>,
    channels: Mutex<Vec<ChannelEntry>>,
    faults: Mutex<Faults>,
    stats: Mutex<BackendStats>,
}

/// Shared in-memory store; clones share the same tables
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `StoreUnavailable`
    pub fn set_offline(&self, offline: bool) {
        self.inner.faults.lock().offline = offline;
    }

    pub fn is_offline(&self) -> bool {
        self.inner.faults.lock().offline
    }

    /// The next `count` channels report an error instead of acknowledging
    pub fn refuse_next_subscriptions(&self, count: u32) {
        self.inner.faults.lock().refuse_subscriptions = count;
    }

    /// The next `count` channels open but are never acknowledged
    pub fn mute_next_subscriptions(&self, count: u32) {
        self.inner.faults.lock().mute_subscriptions = count;
    }

    /// Fail every live channel with a transport error; returns how many
    pub fn disconnect_channels(&self, reason: &str) -> usize {
        self.kill_channels(ChannelSignal::Error(reason.to_string()))
    }

    /// Fail every live channel with a timeout; returns how many
    pub fn time_out_channels(&self) -> usize {
        self.kill_channels(ChannelSignal::TimedOut)
    }

    /// Number of channels still receiving notifications
    pub fn live_channels(&self) -> usize {
        let mut channels = self.inner.channels.lock();
        channels.retain(ChannelEntry::is_live);
        channels.len()
    }

    pub fn stats(&self) -> BackendStats {
        *self.inner.stats.lock()
    }

    pub fn session_count(&self) -> usize {
        self.inner.tables.read().sessions.len()
    }

    fn kill_channels(&self, signal: ChannelSignal) -> usize {
        let drained: Vec<ChannelEntry> = {
            let mut channels = self.inner.channels.lock();
            channels.drain(..).filter(ChannelEntry::is_live).collect()
        };
        for entry in &drained {
            let _ = entry.tx.send(signal.clone());
        }
        debug!(count = drained.len(), ?signal, "Killed change channels");
        drained.len()
    }

    fn ensure_online(&self) -> SessionResult<()> {
        if self.inner.faults.lock().offline {
            return Err(SessionError::StoreUnavailable("backend offline".to_string()));
        }
        Ok(())
    }

    fn record_write(&self) {
        self.inner.stats.lock().writes += 1;
    }

    fn notify(&self, change: RowChange) {
        let mut channels = self.inner.channels.lock();
        channels.retain(ChannelEntry::is_live);
        for entry in channels.iter().filter(|e| e.acknowledged) {
            if entry.filters.iter().any(|f| f.matches(&change)) {
                let _ = entry.tx.send(ChannelSignal::Changed(change.clone()));
            }
        }
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn insert_session(&self, session: &Session) -> SessionResult<()> {
        self.ensure_online()?;
        {
            let mut tables = self.inner.tables.write();
            let taken = tables.sessions.iter().any(|s| {
                s.is_active && s.app_type == session.app_type && s.code == session.code
            });
            if taken {
                return Err(SessionError::DuplicateCode(session.code.clone()));
            }
            tables.sessions.push(session.clone());
        }
        self.record_write();
        self.notify(RowChange {
            table: Table::Sessions,
            kind: ChangeKind::Insert,
            session_id: session.id.clone(),
            row_id: session.id.to_key(),
        });
        Ok(())
    }

    async fn find_active_session(
        &self,
        code: &str,
        app_type: AppType,
    ) -> SessionResult<Option<Session>> {
        self.ensure_online()?;
        let tables = self.inner.tables.read();
        Ok(tables
            .sessions
            .iter()
            .find(|s| s.is_active && s.app_type == app_type && s.code == code)
            .cloned())
    }

    async fn get_session(&self, id: &SessionId) -> SessionResult<Option<Session>> {
        self.ensure_online()?;
        let tables = self.inner.tables.read();
        Ok(tables.sessions.iter().find(|s| &s.id == id).cloned())
    }

    async fn deactivate_session(&self, id: &SessionId) -> SessionResult<bool> {
        self.ensure_online()?;
        let found = {
            let mut tables = self.inner.tables.write();
            match tables.sessions.iter_mut().find(|s| &s.id == id) {
                Some(session) => {
                    session.is_active = false;
                    true
                }
                None => false,
            }
        };
        if found {
            self.record_write();
            self.notify(RowChange {
                table: Table::Sessions,
                kind: ChangeKind::Update,
                session_id: id.clone(),
                row_id: id.to_key(),
            });
        }
        Ok(found)
    }

    async fn insert_participant(&self, participant: &Participant) -> SessionResult<()> {
        self.ensure_online()?;
        self.inner
            .tables
            .write()
            .participants
            .push(participant.clone());
        self.record_write();
        self.notify(RowChange {
            table: Table::Participants,
            kind: ChangeKind::Insert,
            session_id: participant.session_id.clone(),
            row_id: participant.id.to_key(),
        });
        Ok(())
    }

    async fn overwrite_metadata(
        &self,
        id: &ParticipantId,
        metadata: &Value,
    ) -> SessionResult<bool> {
        self.ensure_online()?;
        let session_id = {
            let mut tables = self.inner.tables.write();
            tables
                .participants
                .iter_mut()
                .find(|p| &p.id == id)
                .map(|participant| {
                    participant.metadata = metadata.clone();
                    participant.session_id.clone()
                })
        };
        match session_id {
            Some(session_id) => {
                self.record_write();
                self.notify(RowChange {
                    table: Table::Participants,
                    kind: ChangeKind::Update,
                    session_id,
                    row_id: id.to_key(),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_participants(&self, session_id: &SessionId) -> SessionResult<Vec<Participant>> {
        self.ensure_online()?;
        self.inner.stats.lock().participant_reads += 1;
        let tables = self.inner.tables.read();
        Ok(tables
            .participants
            .iter()
            .filter(|p| &p.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn open_channel(&self, filters: Vec<ChangeFilter>) -> SessionResult<ChangeChannel> {
        self.ensure_online()?;
        self.inner.stats.lock().channels_opened += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let (refuse, mute) = {
            let mut faults = self.inner.faults.lock();
            if faults.refuse_subscriptions > 0 {
                faults.refuse_subscriptions -= 1;
                (true, false)
            } else if faults.mute_subscriptions > 0 {
                faults.mute_subscriptions -= 1;
                (false, true)
            } else {
                (false, false)
            }
        };

        if refuse {
            // tx drops here, so the channel ends right after the error
            let _ = tx.send(ChannelSignal::Error("subscription refused".to_string()));
            return Ok(ChangeChannel::new(rx, cancel));
        }

        if !mute {
            let _ = tx.send(ChannelSignal::Subscribed);
        }
        self.inner.channels.lock().push(ChannelEntry {
            filters,
            tx,
            cancel: cancel.clone(),
            acknowledged: !mute,
        });
        Ok(ChangeChannel::new(rx, cancel))
    }
}
