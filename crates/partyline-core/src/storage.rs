//! Client-local persistent storage using redb.
//!
//! Holds local-mode sessions: the ones created or loaded while no shared store
//! was reachable (or the code was unknown to it). Nothing here is ever
//! synchronized to other devices.
//!
//! Participants are keyed `{session_id}/{join_index}` so a prefix range scan
//! returns them in join order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::code::normalize_code;
use crate::error::{SessionError, SessionResult};
use crate::sync::SnapshotSource;
use crate::types::{
    AppType, NewSession, Participant, ParticipantId, Session, SessionId, SessionSnapshot,
};

// Table definitions
const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("local_sessions");
const SESSION_KEYS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("local_session_keys");
const PARTICIPANTS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("local_participants");
const PARTICIPANT_KEYS_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("local_participant_keys");

fn session_key(app_type: AppType, code: &str) -> String {
    format!("{}:{}", app_type.as_str(), code)
}

fn participant_key(session_id: &SessionId, index: usize) -> String {
    format!("{}/{:08}", session_id.to_key(), index)
}

/// Half-open key range covering every participant of a session
fn participant_range(session_id: &SessionId) -> (String, String) {
    let id = session_id.to_key();
    // '0' sorts right after '/'
    (format!("{id}/"), format!("{id}0"))
}

fn encode<T: Serialize>(value: &T) -> SessionResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> SessionResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Local session store backed by a single redb file
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Database>,
}

impl LocalStore {
    /// Open (or create) the store at `path`.
    ///
    /// Creates the parent directory and all tables if missing.
    pub fn open(path: impl AsRef<Path>) -> SessionResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SESSIONS_TABLE)?;
            let _ = write_txn.open_table(SESSION_KEYS_TABLE)?;
            let _ = write_txn.open_table(PARTICIPANTS_TABLE)?;
            let _ = write_txn.open_table(PARTICIPANT_KEYS_TABLE)?;
        }
        write_txn.commit()?;

        debug!(path = %path.display(), "Opened local session store");
        Ok(Self { db: Arc::new(db) })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Session Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save a session, replacing any local session with the same app/code.
    pub fn save_session(&self, session: &Session) -> SessionResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let key = session_key(session.app_type, &session.code);
            let mut sessions = write_txn.open_table(SESSIONS_TABLE)?;
            let mut keys = write_txn.open_table(SESSION_KEYS_TABLE)?;
            sessions.insert(key.as_str(), encode(session)?.as_slice())?;
            keys.insert(session.id.to_key().as_str(), key.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Session by id, active or not
    pub fn get_session(&self, session_id: &SessionId) -> SessionResult<Option<Session>> {
        let read_txn = self.db.begin_read()?;
        let keys = read_txn.open_table(SESSION_KEYS_TABLE)?;
        let Some(key) = keys
            .get(session_id.to_key().as_str())?
            .map(|v| v.value().to_string())
        else {
            return Ok(None);
        };

        let sessions = read_txn.open_table(SESSIONS_TABLE)?;
        let session: Option<Session> = match sessions.get(key.as_str())? {
            Some(v) => Some(decode(v.value())?),
            None => None,
        };
        // The code slot may since have been reused by a newer local session
        Ok(session.filter(|s| &s.id == session_id))
    }

    /// Active local session for a code (case-insensitive) and app type
    pub fn find_active_session(
        &self,
        code: &str,
        app_type: AppType,
    ) -> SessionResult<Option<Session>> {
        let read_txn = self.db.begin_read()?;
        let sessions = read_txn.open_table(SESSIONS_TABLE)?;
        let key = session_key(app_type, &normalize_code(code));

        match sessions.get(key.as_str())? {
            Some(v) => {
                let session: Session = decode(v.value())?;
                Ok(Some(session).filter(|s| s.is_active))
            }
            None => Ok(None),
        }
    }

    /// Every stored local session
    pub fn list_sessions(&self) -> SessionResult<Vec<Session>> {
        let read_txn = self.db.begin_read()?;
        let sessions = read_txn.open_table(SESSIONS_TABLE)?;

        let mut result = Vec::new();
        for entry in sessions.iter()? {
            let (_, value) = entry?;
            result.push(decode(value.value())?);
        }
        Ok(result)
    }

    /// Set `is_active = false`; returns whether the session exists
    pub fn deactivate_session(&self, session_id: &SessionId) -> SessionResult<bool> {
        let Some(mut session) = self.get_session(session_id)? else {
            return Ok(false);
        };
        session.is_active = false;
        self.save_session(&session)?;
        Ok(true)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Participant Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Append a participant after the existing ones
    pub fn insert_participant(&self, participant: &Participant) -> SessionResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut participants = write_txn.open_table(PARTICIPANTS_TABLE)?;
            let mut keys = write_txn.open_table(PARTICIPANT_KEYS_TABLE)?;

            let (start, end) = participant_range(&participant.session_id);
            let index = participants.range(start.as_str()..end.as_str())?.count();
            let key = participant_key(&participant.session_id, index);

            participants.insert(key.as_str(), encode(participant)?.as_slice())?;
            keys.insert(participant.id.to_key().as_str(), key.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Participants of a session in join order
    pub fn participants(&self, session_id: &SessionId) -> SessionResult<Vec<Participant>> {
        let read_txn = self.db.begin_read()?;
        let participants = read_txn.open_table(PARTICIPANTS_TABLE)?;
        let (start, end) = participant_range(session_id);

        let mut result = Vec::new();
        for entry in participants.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            result.push(decode(value.value())?);
        }
        Ok(result)
    }

    /// Replace a participant's metadata; returns whether the row exists
    pub fn overwrite_metadata(
        &self,
        participant_id: &ParticipantId,
        metadata: &Value,
    ) -> SessionResult<bool> {
        let write_txn = self.db.begin_write()?;
        let found = {
            let keys = write_txn.open_table(PARTICIPANT_KEYS_TABLE)?;
            let mut participants = write_txn.open_table(PARTICIPANTS_TABLE)?;

            let key = keys
                .get(participant_id.to_key().as_str())?
                .map(|v| v.value().to_string());
            let row = match &key {
                Some(key) => participants
                    .get(key.as_str())?
                    .map(|v| v.value().to_vec()),
                None => None,
            };

            match (key, row) {
                (Some(key), Some(row)) => {
                    let mut participant: Participant = decode(&row)?;
                    participant.metadata = metadata.clone();
                    participants.insert(key.as_str(), encode(&participant)?.as_slice())?;
                    true
                }
                _ => false,
            }
        };
        write_txn.commit()?;
        Ok(found)
    }

    /// Session plus participants, if the session exists
    pub fn snapshot(&self, session_id: &SessionId) -> SessionResult<Option<SessionSnapshot>> {
        let Some(session) = self.get_session(session_id)? else {
            return Ok(None);
        };
        let participants = self.participants(session_id)?;
        Ok(Some(SessionSnapshot {
            session,
            participants,
        }))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Session lifecycle (mirrors the shared store's semantics)
    // ═══════════════════════════════════════════════════════════════════════

    /// Create and persist a local session under `code`
    pub fn create_session(&self, request: NewSession, code: &str) -> SessionResult<Session> {
        let session = Session::from_request(request, normalize_code(code));
        self.save_session(&session)?;
        info!(
            session_id = %session.id,
            code = %session.code,
            app_type = %session.app_type,
            "Created local session"
        );
        Ok(session)
    }

    /// Active local session for a code, with participants
    pub fn load_session(
        &self,
        code: &str,
        app_type: AppType,
    ) -> SessionResult<Option<SessionSnapshot>> {
        match self.find_active_session(code, app_type)? {
            Some(session) => {
                let participants = self.participants(&session.id)?;
                Ok(Some(SessionSnapshot {
                    session,
                    participants,
                }))
            }
            None => Ok(None),
        }
    }

    /// Add a participant; same rules as the shared store (no de-duplication,
    /// display name stored trimmed, blank names rejected)
    pub fn join_session(
        &self,
        session_id: &SessionId,
        display_name: &str,
        metadata: Value,
    ) -> SessionResult<Participant> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(SessionError::InvalidInput(
                "display name must not be empty".to_string(),
            ));
        }
        let session = self
            .get_session(session_id)?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if !session.is_active {
            return Err(SessionError::Closed(session.code));
        }

        let participant = Participant::new(session_id.clone(), display_name, metadata);
        self.insert_participant(&participant)?;
        debug!(%session_id, participant_id = %participant.id, "Local participant joined");
        Ok(participant)
    }

    /// Full metadata overwrite
    pub fn update_participant(
        &self,
        participant_id: &ParticipantId,
        metadata: Value,
    ) -> SessionResult<()> {
        if !self.overwrite_metadata(participant_id, &metadata)? {
            return Err(SessionError::ParticipantNotFound(participant_id.to_string()));
        }
        Ok(())
    }

    pub fn close_session(&self, session_id: &SessionId) -> SessionResult<()> {
        if !self.deactivate_session(session_id)? {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        info!(%session_id, "Closed local session");
        Ok(())
    }
}

#[async_trait]
impl SnapshotSource for LocalStore {
    async fn fetch(&self, session_id: &SessionId) -> SessionResult<SessionSnapshot> {
        self.snapshot(session_id)?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }
}
