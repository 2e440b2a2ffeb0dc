//! Typed payloads for individual apps
//!
//! The core stores `config` and `metadata` as opaque JSON. Each app describes
//! its shapes once with a `SessionAdapter` and converts at this boundary; a
//! payload that does not fit surfaces as `SessionError::InvalidPayload`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{SessionError, SessionResult};
use crate::session::LiveSession;
use crate::types::{AppType, NewSession, Participant, ParticipantId, Session};

/// Typed view of one app's session config and participant metadata
pub trait SessionAdapter {
    const APP_TYPE: AppType;

    /// Host-chosen settings, fixed at creation
    type Config: Serialize + DeserializeOwned + Send;

    /// Per-participant state; an empty (`null`) payload decodes to `Default`
    type Metadata: Serialize + DeserializeOwned + Default + Send;

    fn validate_config(_config: &Self::Config) -> SessionResult<()> {
        Ok(())
    }

    fn validate_metadata(_metadata: &Self::Metadata) -> SessionResult<()> {
        Ok(())
    }
}

fn invalid(what: &str, app_type: AppType, e: serde_json::Error) -> SessionError {
    SessionError::InvalidPayload(format!("{app_type} {what}: {e}"))
}

pub fn encode_config<A: SessionAdapter>(config: &A::Config) -> SessionResult<Value> {
    A::validate_config(config)?;
    serde_json::to_value(config).map_err(|e| invalid("config", A::APP_TYPE, e))
}

/// Decode a session's config, checking it belongs to this app
pub fn decode_config<A: SessionAdapter>(session: &Session) -> SessionResult<A::Config> {
    if session.app_type != A::APP_TYPE {
        return Err(SessionError::InvalidPayload(format!(
            "session {} is {}, not {}",
            session.code,
            session.app_type,
            A::APP_TYPE
        )));
    }
    let config: A::Config = serde_json::from_value(session.config.clone())
        .map_err(|e| invalid("config", A::APP_TYPE, e))?;
    A::validate_config(&config)?;
    Ok(config)
}

pub fn encode_metadata<A: SessionAdapter>(metadata: &A::Metadata) -> SessionResult<Value> {
    A::validate_metadata(metadata)?;
    serde_json::to_value(metadata).map_err(|e| invalid("metadata", A::APP_TYPE, e))
}

pub fn decode_metadata<A: SessionAdapter>(value: &Value) -> SessionResult<A::Metadata> {
    if value.is_null() {
        return Ok(A::Metadata::default());
    }
    let metadata: A::Metadata = serde_json::from_value(value.clone())
        .map_err(|e| invalid("metadata", A::APP_TYPE, e))?;
    A::validate_metadata(&metadata)?;
    Ok(metadata)
}

/// Build a creation request with an encoded config
pub fn new_session<A: SessionAdapter>(
    title: impl Into<String>,
    config: &A::Config,
) -> SessionResult<NewSession> {
    Ok(NewSession::new(A::APP_TYPE, title, encode_config::<A>(config)?))
}

impl LiveSession {
    /// This session's config as `A` sees it
    pub fn config<A: SessionAdapter>(&self) -> SessionResult<A::Config> {
        decode_config::<A>(&self.view().session)
    }

    /// Join with typed metadata
    pub async fn join_as<A: SessionAdapter>(
        &self,
        display_name: &str,
        metadata: &A::Metadata,
    ) -> SessionResult<Participant> {
        let value = encode_metadata::<A>(metadata)?;
        self.join(display_name, value).await
    }

    /// Read-modify-write a participant's metadata.
    ///
    /// Reads from the latest reconciled view (reloading once if the
    /// participant is not in it yet) and writes the result as a full
    /// overwrite. Concurrent writers are not merged: the last write wins.
    pub async fn modify_metadata<A, F>(
        &self,
        participant_id: &ParticipantId,
        modify: F,
    ) -> SessionResult<A::Metadata>
    where
        A: SessionAdapter,
        F: FnOnce(&mut A::Metadata),
    {
        let mut current = self.view().participant(participant_id).map(|p| p.metadata.clone());
        if current.is_none() {
            debug!(%participant_id, "Participant not in view, reloading");
            self.reload().await?;
            current = self.view().participant(participant_id).map(|p| p.metadata.clone());
        }
        let current = current
            .ok_or_else(|| SessionError::ParticipantNotFound(participant_id.to_string()))?;

        let mut metadata = decode_metadata::<A>(&current)?;
        modify(&mut metadata);
        let value = encode_metadata::<A>(&metadata)?;
        self.update_participant(participant_id, value).await?;
        Ok(metadata)
    }
}
