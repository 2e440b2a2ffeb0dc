//! Consumer-facing session state
//!
//! A `SessionView` is what a screen renders from. Store failures land in
//! `last_error` instead of crossing the API as panics, so a consumer can check
//! a field after every update.

use crate::error::SessionError;
use crate::types::{Participant, ParticipantId, Session, SessionSnapshot};

use super::state::SubscriptionState;

/// Where a loaded session lives; fixed for the lifetime of the session object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Backed by the shared store, kept fresh by a change subscription
    Cloud,
    /// Client-local only, never synchronized
    Local,
}

/// Latest known state of one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub session: Session,
    /// Join order
    pub participants: Vec<Participant>,
    pub mode: SessionMode,
    pub subscription: SubscriptionState,
    pub last_error: Option<SessionError>,
    /// Bumped every time a snapshot is applied
    pub revision: u64,
}

impl SessionView {
    pub fn new(snapshot: SessionSnapshot, mode: SessionMode) -> Self {
        Self {
            session: snapshot.session,
            participants: snapshot.participants,
            mode,
            subscription: SubscriptionState::Idle,
            last_error: None,
            revision: 0,
        }
    }

    pub fn is_cloud_mode(&self) -> bool {
        self.mode == SessionMode::Cloud
    }

    pub fn is_active(&self) -> bool {
        self.session.is_active
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    /// Every participant with this display name, in join order
    pub fn participants_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Participant> + 'a {
        self.participants
            .iter()
            .filter(move |p| p.display_name == name)
    }

    /// Replace session and participants wholesale.
    ///
    /// Clears a store-level `last_error`; an exhausted subscription stays
    /// reported until the caller resubscribes.
    pub fn apply_snapshot(&mut self, snapshot: SessionSnapshot) {
        self.session = snapshot.session;
        self.participants = snapshot.participants;
        self.revision += 1;
        if !matches!(
            self.last_error,
            Some(SessionError::SubscriptionExhausted { .. })
        ) {
            self.last_error = None;
        }
    }

    /// Record a subscription state and the error it implies
    pub fn apply_subscription(&mut self, state: SubscriptionState) {
        match state.error() {
            Some(err) => self.last_error = Some(err),
            None => {
                if matches!(
                    self.last_error,
                    Some(SessionError::SubscriptionDegraded { .. })
                        | Some(SessionError::SubscriptionExhausted { .. })
                ) {
                    self.last_error = None;
                }
            }
        }
        self.subscription = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AppType, NewSession};
    use serde_json::json;

    fn view() -> SessionView {
        let session =
            Session::from_request(NewSession::new(AppType::Quiz, "Quiz", json!({})), "ABCDEF");
        SessionView::new(
            SessionSnapshot {
                session,
                participants: vec![],
            },
            SessionMode::Cloud,
        )
    }

    #[test]
    fn test_apply_snapshot_replaces_wholesale() {
        let mut view = view();
        let ann = Participant::new(view.session.id.clone(), "Ann", json!({}));
        let mut session = view.session.clone();
        session.is_active = false;

        view.last_error = Some(SessionError::StoreUnavailable("down".into()));
        view.apply_snapshot(SessionSnapshot {
            session,
            participants: vec![ann.clone()],
        });

        assert_eq!(view.participants, vec![ann]);
        assert!(!view.is_active());
        assert_eq!(view.revision, 1);
        assert_eq!(view.last_error, None);
    }

    #[test]
    fn test_exhaustion_survives_snapshot() {
        let mut view = view();
        view.apply_subscription(SubscriptionState::Exhausted { attempts: 3 });
        let snapshot = SessionSnapshot {
            session: view.session.clone(),
            participants: vec![],
        };
        view.apply_snapshot(snapshot);
        assert_eq!(
            view.last_error,
            Some(SessionError::SubscriptionExhausted { attempts: 3 })
        );
    }

    #[test]
    fn test_recovered_subscription_clears_error() {
        let mut view = view();
        view.apply_subscription(SubscriptionState::Degraded { attempt: 1 });
        assert_eq!(
            view.last_error,
            Some(SessionError::SubscriptionDegraded { attempt: 1 })
        );
        view.apply_subscription(SubscriptionState::Subscribed);
        assert_eq!(view.last_error, None);
        assert!(view.subscription.is_subscribed());
    }

    #[test]
    fn test_participants_named() {
        let mut view = view();
        let id = view.session.id.clone();
        view.participants = vec![
            Participant::new(id.clone(), "Ann", json!({})),
            Participant::new(id.clone(), "Bo", json!({})),
            Participant::new(id, "Ann", json!({})),
        ];
        assert_eq!(view.participants_named("Ann").count(), 2);
        assert_eq!(view.participants_named("Cy").count(), 0);
    }
}
