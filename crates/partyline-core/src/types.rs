//! Core types for Partyline

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::error::SessionError;

/// Current time as Unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Unique identifier for a session row
///
/// Uses ULID for time-ordered identifiers that sort lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Ulid);

impl SessionId {
    /// Create a new SessionId with current timestamp
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// String form used as a storage key
    pub fn to_key(&self) -> String {
        self.0.to_string()
    }

    /// Parse from the storage key form
    pub fn from_key(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ses_{}", self.0)
    }
}

/// Unique identifier for a participant row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub Ulid);

impl ParticipantId {
    /// Create a new ParticipantId with current timestamp
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// String form used as a storage key
    pub fn to_key(&self) -> String {
        self.0.to_string()
    }

    /// Parse from the storage key form
    pub fn from_key(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "par_{}", self.0)
    }
}

/// The mini-app a session belongs to
///
/// Codes are only unique within one app type, and each app has its own fixed
/// code length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppType {
    BalanceGame,
    Bingo,
    GroupOrder,
    HumanBingo,
    Quiz,
    RandomPicker,
    Networking,
}

impl AppType {
    /// Every known app type
    pub const ALL: [AppType; 7] = [
        AppType::BalanceGame,
        AppType::Bingo,
        AppType::GroupOrder,
        AppType::HumanBingo,
        AppType::Quiz,
        AppType::RandomPicker,
        AppType::Networking,
    ];

    /// Wire name, as stored in the `app_type` column
    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::BalanceGame => "balance_game",
            AppType::Bingo => "bingo",
            AppType::GroupOrder => "group_order",
            AppType::HumanBingo => "human_bingo",
            AppType::Quiz => "quiz",
            AppType::RandomPicker => "random_picker",
            AppType::Networking => "networking",
        }
    }

    /// Length of session codes issued for this app
    pub fn code_length(&self) -> usize {
        match self {
            AppType::GroupOrder | AppType::Networking => 8,
            _ => 6,
        }
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppType {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        AppType::ALL
            .into_iter()
            .find(|app| app.as_str() == wanted)
            .ok_or_else(|| SessionError::InvalidInput(format!("unknown app type: {s}")))
    }
}

/// Whether a session is listed publicly
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

impl Visibility {
    pub fn is_public(&self) -> bool {
        matches!(self, Visibility::Public)
    }
}

/// A shareable multiplayer context addressed by a short code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Upper-case code participants type to join
    pub code: String,
    pub app_type: AppType,
    pub title: String,
    /// Opaque app configuration, written once at creation
    pub config: Value,
    /// False once the host has closed the session; never flips back
    pub is_active: bool,
    pub is_public: bool,
    /// Unix milliseconds
    pub created_at: i64,
    /// Carried for the apps; nothing in the core enforces it
    pub expires_at: Option<i64>,
}

impl Session {
    /// Build an active session row from a create request and its code
    pub fn from_request(request: NewSession, code: impl Into<String>) -> Self {
        Self {
            id: SessionId::new(),
            code: code.into(),
            app_type: request.app_type,
            title: request.title,
            config: request.config,
            is_active: true,
            is_public: request.visibility.is_public(),
            created_at: now_millis(),
            expires_at: request.expires_at,
        }
    }
}

/// A joined member of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub session_id: SessionId,
    pub display_name: String,
    /// Opaque per-app progress blob, always overwritten in full
    pub metadata: Value,
    /// Unix milliseconds
    pub joined_at: i64,
}

impl Participant {
    pub fn new(session_id: SessionId, display_name: impl Into<String>, metadata: Value) -> Self {
        Self {
            id: ParticipantId::new(),
            session_id,
            display_name: display_name.into(),
            metadata,
            joined_at: now_millis(),
        }
    }
}

/// Request to create a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    pub app_type: AppType,
    pub title: String,
    pub config: Value,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl NewSession {
    /// Private session with no expiry
    pub fn new(app_type: AppType, title: impl Into<String>, config: Value) -> Self {
        Self {
            app_type,
            title: title.into(),
            config,
            visibility: Visibility::Private,
            expires_at: None,
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Full session state as fetched in one go
///
/// Participants are always in join order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub participants: Vec<Participant>,
}

impl SessionSnapshot {
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }
}
