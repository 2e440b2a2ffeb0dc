//! Change subscription and reconciliation
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ChangeSubscription (per session, per consumer)                  │
//! │  ├── retrying state machine (state.rs)                           │
//! │  └── emits ChangeNotice ──┐                                      │
//! │                           ▼                                      │
//! │  Reconciler                                                      │
//! │  ├── fetch full SessionSnapshot                                  │
//! │  └── replace SessionView wholesale (watch channel)               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two consumers of the same session each own an independent subscription.
//! That costs an extra channel but is safe, since every reconcile is an
//! idempotent snapshot read.

pub mod reconcile;
pub mod state;
pub mod subscription;
pub mod view;

pub use reconcile::{Reconciler, SnapshotSource};
pub use state::{FailureKind, StateTransition, SubscriptionSignal, SubscriptionState};
pub use subscription::{ChangeNotice, ChangeSubscription};
pub use view::{SessionMode, SessionView};
