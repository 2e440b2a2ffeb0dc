//! Error types for Partyline
//!
//! Every variant carries owned strings so a `SessionError` can be cloned into
//! a consumer's view state (`SessionView::last_error`) instead of only being
//! returned once from the failing call.

use thiserror::Error;

/// Main error type for Partyline operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No active session exists for the given code and app type
    #[error("No active session for code {0}")]
    NotFound(String),

    /// The backend could not be reached or rejected the request
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The session has been deactivated by its host
    #[error("Session closed: {0}")]
    Closed(String),

    /// Change subscription lost its transport and is retrying
    #[error("Subscription degraded (retry {attempt})")]
    SubscriptionDegraded {
        /// 1-based retry counter
        attempt: u32,
    },

    /// Change subscription gave up after spending its retry budget
    #[error("Subscription exhausted after {attempts} retries")]
    SubscriptionExhausted {
        /// Retries spent before giving up
        attempts: u32,
    },

    /// Participant row does not exist
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Backend refused a session code already used by an active session
    #[error("Session code already in use: {0}")]
    DuplicateCode(String),

    /// Caller supplied an unusable argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An adapter could not interpret a config or metadata payload
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Client-local storage (redb) failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be parsed or failed validation
    #[error("Config error: {0}")]
    Config(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(String),
}

impl SessionError {
    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::StoreUnavailable(_) | SessionError::SubscriptionDegraded { .. }
        )
    }

    /// Whether this error should send a load down the local-fallback path.
    pub fn triggers_local_fallback(&self) -> bool {
        matches!(
            self,
            SessionError::NotFound(_) | SessionError::StoreUnavailable(_)
        )
    }
}

/// Result type alias using SessionError
pub type SessionResult<T> = Result<T, SessionError>;

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for SessionError {
    fn from(err: toml::de::Error) -> Self {
        SessionError::Config(err.to_string())
    }
}

macro_rules! storage_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for SessionError {
                fn from(err: $ty) -> Self {
                    SessionError::Storage(err.to_string())
                }
            }
        )*
    };
}

storage_error_from!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
