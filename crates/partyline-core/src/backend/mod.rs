//! Contract for the external session/participant store
//!
//! Partyline does not ship a production store. Anything that offers
//! equality-filtered point reads/writes on two tables plus a
//! subscribe-to-row-changes primitive can back it by implementing
//! [`SessionBackend`].
//!
//! ## Change channels
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  open_channel(filters) ──► ChangeChannel                         │
//! │  ├── Subscribed      store acknowledged the subscription         │
//! │  ├── Changed(row)    a row matching a filter was written         │
//! │  ├── Error(reason)   transport failure, channel is dead          │
//! │  └── TimedOut        transport timeout, channel is dead          │
//! │                                                                  │
//! │  unsubscribe() / drop  ──► backend stops delivering              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod memory;

pub use memory::{BackendStats, MemoryBackend};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SessionResult;
use crate::types::{AppType, Participant, ParticipantId, Session, SessionId};

/// Tables the store exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Sessions,
    Participants,
}

/// Equality filter scoping a channel to one session.
///
/// Matches `sessions.id = session_id` or `participants.session_id =
/// session_id` depending on `table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeFilter {
    pub table: Table,
    pub session_id: SessionId,
}

impl ChangeFilter {
    pub fn sessions(session_id: SessionId) -> Self {
        Self {
            table: Table::Sessions,
            session_id,
        }
    }

    pub fn participants(session_id: SessionId) -> Self {
        Self {
            table: Table::Participants,
            session_id,
        }
    }

    /// Both filters a session subscription needs
    pub fn for_session(session_id: &SessionId) -> Vec<ChangeFilter> {
        vec![
            Self::sessions(session_id.clone()),
            Self::participants(session_id.clone()),
        ]
    }

    pub fn matches(&self, change: &RowChange) -> bool {
        self.table == change.table && self.session_id == change.session_id
    }
}

/// Kind of row write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// A row-change notification
///
/// Only identifies the row; consumers re-fetch state rather than patching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowChange {
    pub table: Table,
    pub kind: ChangeKind,
    /// Session the row belongs to (its own id for the sessions table)
    pub session_id: SessionId,
    /// Primary key of the written row
    pub row_id: String,
}

/// Status and payload signals delivered on a change channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    Subscribed,
    Changed(RowChange),
    Error(String),
    TimedOut,
}

/// Handle to an open change channel
///
/// Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct ChangeChannel {
    signals: mpsc::UnboundedReceiver<ChannelSignal>,
    cancel: CancellationToken,
}

impl ChangeChannel {
    /// Wrap a signal stream; the backend watches `cancel` to stop delivery.
    pub fn new(signals: mpsc::UnboundedReceiver<ChannelSignal>, cancel: CancellationToken) -> Self {
        Self { signals, cancel }
    }

    /// Next signal, or `None` once the backend has hung up
    pub async fn recv(&mut self) -> Option<ChannelSignal> {
        self.signals.recv().await
    }

    /// Stop delivery. Idempotent.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ChangeChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The replaceable external store
///
/// Implementations must return participants in join order and must never
/// flip a deactivated session back to active.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Insert a new session row
    async fn insert_session(&self, session: &Session) -> SessionResult<()>;

    /// Active session with exactly this (already normalized) code and app type
    async fn find_active_session(
        &self,
        code: &str,
        app_type: AppType,
    ) -> SessionResult<Option<Session>>;

    /// Session by id, active or not
    async fn get_session(&self, id: &SessionId) -> SessionResult<Option<Session>>;

    /// Set `is_active = false`; returns whether the row exists
    async fn deactivate_session(&self, id: &SessionId) -> SessionResult<bool>;

    /// Insert a new participant row
    async fn insert_participant(&self, participant: &Participant) -> SessionResult<()>;

    /// Overwrite a participant's metadata; returns whether the row exists
    async fn overwrite_metadata(&self, id: &ParticipantId, metadata: &Value)
        -> SessionResult<bool>;

    /// Participants of a session in join order
    async fn list_participants(&self, session_id: &SessionId) -> SessionResult<Vec<Participant>>;

    /// Open a change channel for the given filters
    async fn open_channel(&self, filters: Vec<ChangeFilter>) -> SessionResult<ChangeChannel>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_table_and_session() {
        let session_id = SessionId::new();
        let change = RowChange {
            table: Table::Participants,
            kind: ChangeKind::Insert,
            session_id: session_id.clone(),
            row_id: "p1".to_string(),
        };

        assert!(ChangeFilter::participants(session_id.clone()).matches(&change));
        assert!(!ChangeFilter::sessions(session_id).matches(&change));
        assert!(!ChangeFilter::participants(SessionId::new()).matches(&change));
    }

    #[tokio::test]
    async fn test_channel_drop_cancels_token() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let channel = ChangeChannel::new(rx, cancel.clone());
        assert!(!cancel.is_cancelled());
        drop(channel);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_channel_unsubscribe_is_idempotent() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut channel = ChangeChannel::new(rx, CancellationToken::new());
        tx.send(ChannelSignal::Subscribed).unwrap();
        assert_eq!(channel.recv().await, Some(ChannelSignal::Subscribed));

        channel.unsubscribe();
        channel.unsubscribe();
        assert!(channel.is_unsubscribed());
    }
}
