//! Subscription state machine
//!
//! ```text
//!            Start           Acknowledged
//!   Idle ──────────► Subscribing ──────────► Subscribed
//!                     ▲      │ Failed            │ Failed
//!        RetryElapsed │      ▼                   ▼
//!                     └── Degraded(n) ◄──────────┘
//!                            │ n > max_retries
//!                            ▼
//!                        Exhausted
//!
//!   any state ── Teardown ──► Closed
//! ```
//!
//! `Degraded(n)` waits `n × base_delay` before the next attempt. A failure
//! while `Subscribing(n)` moves to `Degraded(n + 1)`; an acknowledgement
//! resets the count.

use std::fmt;

use tokio::time::Instant;

use crate::config::RetryPolicy;
use crate::error::SessionError;

/// Connection state of one change subscription
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Not started
    #[default]
    Idle,
    /// Waiting for the store to acknowledge; `attempt` 0 is the first try
    Subscribing { attempt: u32 },
    /// Receiving change notifications
    Subscribed,
    /// Transport failed; retry `attempt` is scheduled
    Degraded { attempt: u32 },
    /// Retry budget spent; needs a manual resubscribe or reload
    Exhausted { attempts: u32 },
    /// Torn down
    Closed,
}

impl SubscriptionState {
    /// Next state for `signal`, or `None` if the signal does not apply
    pub fn next(&self, signal: &SubscriptionSignal, policy: &RetryPolicy) -> Option<Self> {
        use SubscriptionSignal as Signal;

        match (self, signal) {
            (SubscriptionState::Closed, _) => None,
            (_, Signal::Teardown) => Some(SubscriptionState::Closed),
            (SubscriptionState::Idle, Signal::Start) => {
                Some(SubscriptionState::Subscribing { attempt: 0 })
            }
            (SubscriptionState::Subscribing { .. }, Signal::Acknowledged) => {
                Some(SubscriptionState::Subscribed)
            }
            (SubscriptionState::Subscribing { attempt }, Signal::Failed(_)) => {
                Some(Self::degrade(attempt + 1, policy))
            }
            (SubscriptionState::Subscribed, Signal::Failed(_)) => Some(Self::degrade(1, policy)),
            (SubscriptionState::Degraded { attempt }, Signal::RetryElapsed) => {
                Some(SubscriptionState::Subscribing { attempt: *attempt })
            }
            _ => None,
        }
    }

    fn degrade(attempt: u32, policy: &RetryPolicy) -> Self {
        if policy.allows(attempt) {
            SubscriptionState::Degraded { attempt }
        } else {
            SubscriptionState::Exhausted {
                attempts: attempt - 1,
            }
        }
    }

    pub fn is_subscribed(&self) -> bool {
        matches!(self, SubscriptionState::Subscribed)
    }

    /// Exhausted or closed: nothing will happen without caller action
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionState::Exhausted { .. } | SubscriptionState::Closed
        )
    }

    /// Error a consumer should surface for this state
    pub fn error(&self) -> Option<SessionError> {
        match self {
            SubscriptionState::Degraded { attempt } => {
                Some(SessionError::SubscriptionDegraded { attempt: *attempt })
            }
            SubscriptionState::Exhausted { attempts } => {
                Some(SessionError::SubscriptionExhausted {
                    attempts: *attempts,
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionState::Idle => write!(f, "Idle"),
            SubscriptionState::Subscribing { attempt: 0 } => write!(f, "Subscribing"),
            SubscriptionState::Subscribing { attempt } => {
                write!(f, "Subscribing (retry {})", attempt)
            }
            SubscriptionState::Subscribed => write!(f, "Subscribed"),
            SubscriptionState::Degraded { attempt } => write!(f, "Degraded (retry {})", attempt),
            SubscriptionState::Exhausted { attempts } => {
                write!(f, "Exhausted after {} retries", attempts)
            }
            SubscriptionState::Closed => write!(f, "Closed"),
        }
    }
}

/// How a transport attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Error(String),
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Error(reason) => write!(f, "error: {}", reason),
            FailureKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Inputs that drive the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionSignal {
    Start,
    Acknowledged,
    Failed(FailureKind),
    RetryElapsed,
    Teardown,
}

/// One state change, stamped with the (possibly paused) tokio clock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: SubscriptionState,
    pub to: SubscriptionState,
    pub at: Instant,
}
