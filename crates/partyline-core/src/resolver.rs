//! Cloud-or-local session resolution
//!
//! Every load or create first tries the shared store. If the code is unknown
//! there (or the store cannot be reached) the session is served from the
//! client-local store instead, without any synchronization. The chosen mode
//! never changes for the lifetime of the resolved session.
//!
//! Local and cloud codes share one alphabet and format with no cross-check,
//! so a local code can coincide with a cloud code without anyone noticing.
//! "Code never existed" and "session was closed" are indistinguishable here:
//! both fall back to local.

use serde_json::Value;
use tracing::{info, warn};

use crate::code::{is_valid_code, normalize_code};
use crate::error::{SessionError, SessionResult};
use crate::storage::LocalStore;
use crate::store::StoreClient;
use crate::sync::SessionMode;
use crate::types::{AppType, NewSession, SessionSnapshot};

/// Outcome of a load/create attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSession {
    pub mode: SessionMode,
    pub snapshot: SessionSnapshot,
    /// Why the cloud attempt was abandoned, for local sessions
    pub fallback_reason: Option<SessionError>,
}

impl ResolvedSession {
    pub fn is_cloud_mode(&self) -> bool {
        self.mode == SessionMode::Cloud
    }
}

/// Chooses between the shared store and client-local storage
#[derive(Clone)]
pub struct DualModeResolver {
    store: StoreClient,
    local: LocalStore,
}

impl DualModeResolver {
    pub fn new(store: StoreClient, local: LocalStore) -> Self {
        Self { store, local }
    }

    pub fn store(&self) -> &StoreClient {
        &self.store
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Load a session by code, falling back to a local session.
    ///
    /// The fallback reuses a stored local session with this code when there
    /// is one, else creates an empty one under the requested code. A code
    /// that is not well-formed for `app_type` is rejected with `InvalidInput`
    /// instead of being stored locally.
    pub async fn load(&self, code: &str, app_type: AppType) -> SessionResult<ResolvedSession> {
        let reason = match self.store.load_session(code, app_type).await {
            Ok(snapshot) => {
                return Ok(ResolvedSession {
                    mode: SessionMode::Cloud,
                    snapshot,
                    fallback_reason: None,
                })
            }
            Err(e) if e.triggers_local_fallback() => e,
            Err(e) => return Err(e),
        };

        let normalized = normalize_code(code);
        if !is_valid_code(&normalized, app_type.code_length()) {
            warn!(code = %normalized, %app_type, "Refusing local fallback for malformed code");
            return Err(SessionError::InvalidInput(format!(
                "\"{}\" is not a valid {}-symbol {} code",
                normalized,
                app_type.code_length(),
                app_type
            )));
        }

        let snapshot = match self.local.load_session(&normalized, app_type)? {
            Some(snapshot) => snapshot,
            None => {
                let request = NewSession::new(app_type, String::new(), Value::Null);
                let session = self.local.create_session(request, &normalized)?;
                SessionSnapshot {
                    session,
                    participants: Vec::new(),
                }
            }
        };

        info!(
            code = %snapshot.session.code,
            %app_type,
            reason = %reason,
            "Using local session"
        );
        Ok(ResolvedSession {
            mode: SessionMode::Local,
            snapshot,
            fallback_reason: Some(reason),
        })
    }

    /// Create a session in the shared store, or locally if that fails for any
    /// reason.
    pub async fn create(&self, request: NewSession) -> SessionResult<ResolvedSession> {
        let reason = match self.store.create_session(request.clone()).await {
            Ok(session) => {
                return Ok(ResolvedSession {
                    mode: SessionMode::Cloud,
                    snapshot: SessionSnapshot {
                        session,
                        participants: Vec::new(),
                    },
                    fallback_reason: None,
                })
            }
            Err(e) => e,
        };

        warn!(error = %reason, "Cloud create failed, creating local session");
        let code = self.store.generate_code(request.app_type);
        let session = self.local.create_session(request, &code)?;
        Ok(ResolvedSession {
            mode: SessionMode::Local,
            snapshot: SessionSnapshot {
                session,
                participants: Vec::new(),
            },
            fallback_reason: Some(reason),
        })
    }
}
