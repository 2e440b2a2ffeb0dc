//! Session/participant CRUD against the injected backend
//!
//! `StoreClient` is constructed explicitly around an `Arc<dyn SessionBackend>`
//! and cloned into whatever needs it. After [`StoreClient::shutdown`] every
//! clone refuses further calls with `StoreUnavailable`.
//!
//! Metadata writes are full overwrites with last-write-wins semantics at row
//! granularity. There is no version token: two writers racing on the same
//! participant can silently lose an update, so callers read-modify-write from
//! the latest state they have.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::SessionBackend;
use crate::code::{normalize_code, CodeGenerator};
use crate::error::{SessionError, SessionResult};
use crate::types::{
    AppType, NewSession, Participant, ParticipantId, Session, SessionId, SessionSnapshot,
};

/// Client for the external session store
#[derive(Clone)]
pub struct StoreClient {
    backend: Arc<dyn SessionBackend>,
    codes: Arc<Mutex<CodeGenerator>>,
    shut_down: Arc<AtomicBool>,
}

impl StoreClient {
    /// Client drawing codes from OS entropy
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self::with_code_generator(backend, CodeGenerator::from_entropy())
    }

    /// Client with a caller-supplied (e.g. seeded) code generator
    pub fn with_code_generator(backend: Arc<dyn SessionBackend>, codes: CodeGenerator) -> Self {
        Self {
            backend,
            codes: Arc::new(Mutex::new(codes)),
            shut_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The backend this client talks to
    pub fn backend(&self) -> &Arc<dyn SessionBackend> {
        &self.backend
    }

    /// Draw a fresh code for `app_type`
    pub fn generate_code(&self, app_type: AppType) -> String {
        self.codes.lock().generate(app_type.code_length())
    }

    /// Refuse all further calls. Idempotent.
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            info!("Store client shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> SessionResult<()> {
        if self.is_shut_down() {
            return Err(SessionError::StoreUnavailable(
                "store client shut down".to_string(),
            ));
        }
        Ok(())
    }

    /// Insert a session row under a freshly generated code.
    ///
    /// A uniqueness violation from the backend is returned as-is; no retry
    /// with a different code is attempted.
    pub async fn create_session(&self, request: NewSession) -> SessionResult<Session> {
        self.ensure_running()?;
        let code = self.generate_code(request.app_type);
        let session = Session::from_request(request, code);

        if let Err(e) = self.backend.insert_session(&session).await {
            warn!(code = %session.code, app_type = %session.app_type, error = %e, "Create session failed");
            return Err(e);
        }

        info!(
            session_id = %session.id,
            code = %session.code,
            app_type = %session.app_type,
            "Created session"
        );
        Ok(session)
    }

    /// Load the active session for a code (case-insensitive) and app type.
    pub async fn load_session(
        &self,
        code: &str,
        app_type: AppType,
    ) -> SessionResult<SessionSnapshot> {
        self.ensure_running()?;
        let code = normalize_code(code);

        let session = self
            .backend
            .find_active_session(&code, app_type)
            .await?
            .ok_or_else(|| SessionError::NotFound(code.clone()))?;
        let participants = self.backend.list_participants(&session.id).await?;

        debug!(
            session_id = %session.id,
            %code,
            participants = participants.len(),
            "Loaded session"
        );
        Ok(SessionSnapshot {
            session,
            participants,
        })
    }

    /// Full snapshot by id, including sessions that have been closed.
    pub async fn fetch_snapshot(&self, session_id: &SessionId) -> SessionResult<SessionSnapshot> {
        self.ensure_running()?;
        let session = self
            .backend
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        let participants = self.backend.list_participants(session_id).await?;
        Ok(SessionSnapshot {
            session,
            participants,
        })
    }

    /// Insert a participant row.
    ///
    /// Not idempotent: joining twice with the same name yields two rows.
    /// `display_name` is stored trimmed of surrounding whitespace and must
    /// not be blank.
    pub async fn join_session(
        &self,
        session_id: &SessionId,
        display_name: &str,
        metadata: Value,
    ) -> SessionResult<Participant> {
        self.ensure_running()?;
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(SessionError::InvalidInput(
                "display name must not be empty".to_string(),
            ));
        }

        let session = self
            .backend
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if !session.is_active {
            return Err(SessionError::Closed(session.code));
        }

        let participant = Participant::new(session_id.clone(), display_name, metadata);
        self.backend.insert_participant(&participant).await?;

        info!(
            %session_id,
            participant_id = %participant.id,
            display_name = %participant.display_name,
            "Participant joined"
        );
        Ok(participant)
    }

    /// Overwrite a participant's metadata with `metadata` in full.
    pub async fn update_participant(
        &self,
        participant_id: &ParticipantId,
        metadata: Value,
    ) -> SessionResult<()> {
        self.ensure_running()?;
        if !self
            .backend
            .overwrite_metadata(participant_id, &metadata)
            .await?
        {
            return Err(SessionError::ParticipantNotFound(participant_id.to_string()));
        }
        debug!(%participant_id, "Participant metadata overwritten");
        Ok(())
    }

    /// Deactivate a session. Participant rows are left untouched.
    pub async fn close_session(&self, session_id: &SessionId) -> SessionResult<()> {
        self.ensure_running()?;
        if !self.backend.deactivate_session(session_id).await? {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        info!(%session_id, "Closed session");
        Ok(())
    }
}
