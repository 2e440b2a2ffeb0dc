//! Partyline Core Library
//!
//! Session and participant sync for small real-time party apps.
//!
//! ## Overview
//!
//! A host creates a session and shares its short code; participants join by
//! typing that code on their own devices. The host's screen stays current by
//! subscribing to row changes and re-fetching the whole session snapshot on
//! every notice. When the shared store is unreachable, or does not know the
//! code, the session is served from client-local storage instead and never
//! syncs.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SessionClient                                                   │
//! │  └── DualModeResolver ── cloud ──► StoreClient ──► SessionBackend│
//! │                       └─ local ──► LocalStore (redb)             │
//! │                                                                  │
//! │  LiveSession (one per opened session)                            │
//! │  ├── ChangeSubscription ── ChangeNotice ──► Reconciler           │
//! │  └── SessionView  ◄── full snapshot replace ─┘                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use partyline_core::{
//!     AppType, ClientConfig, LocalStore, MemoryBackend, NewSession, Role, SessionClient,
//!     StoreClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = StoreClient::new(std::sync::Arc::new(MemoryBackend::new()));
//!     let local = LocalStore::open("partyline/local.redb")?;
//!     let client = SessionClient::new(store, local, ClientConfig::default());
//!
//!     let host = client
//!         .create(NewSession::new(AppType::Quiz, "Pub quiz", serde_json::json!({})))
//!         .await?;
//!     println!("Share this code: {}", host.code());
//!
//!     let guest = client.load(host.code(), AppType::Quiz, Role::Participant).await?;
//!     guest.join("Ann", serde_json::json!({})).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod backend;
pub mod code;
pub mod config;
pub mod error;
pub mod resolver;
pub mod session;
pub mod storage;
pub mod store;
pub mod sync;
pub mod types;

// Re-exports
pub use adapter::{
    decode_config, decode_metadata, encode_config, encode_metadata, new_session, SessionAdapter,
};
pub use backend::{
    BackendStats, ChangeChannel, ChangeFilter, ChangeKind, ChannelSignal, MemoryBackend, RowChange,
    SessionBackend, Table,
};
pub use code::{generate_code, is_valid_code, normalize_code, CodeGenerator, CODE_ALPHABET};
pub use config::{ClientConfig, RetryPolicy};
pub use error::{SessionError, SessionResult};
pub use resolver::{DualModeResolver, ResolvedSession};
pub use session::{LiveSession, Role, SessionClient};
pub use storage::LocalStore;
pub use store::StoreClient;
pub use sync::{
    ChangeNotice, ChangeSubscription, FailureKind, Reconciler, SessionMode, SessionView,
    SnapshotSource, StateTransition, SubscriptionSignal, SubscriptionState,
};
pub use types::*;
