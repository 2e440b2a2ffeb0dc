//! End-to-end session flows against the in-memory backend
//!
//! Covers host/participant create-join-reconcile, local fallback, and the
//! write semantics (no join de-duplication, full metadata overwrite).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use partyline_core::{
    AppType, ClientConfig, CodeGenerator, LiveSession, LocalStore, MemoryBackend, Role,
    SessionAdapter, SessionClient, SessionError, SessionView, StoreClient, SubscriptionState,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// Quiz adapter used by the flows
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct QuizConfig {
    questions: Vec<String>,
    seconds_per_question: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct QuizMetadata {
    #[serde(default)]
    score: u32,
    /// Question number to chosen option
    #[serde(default)]
    answers: BTreeMap<u32, usize>,
}

struct Quiz;

impl SessionAdapter for Quiz {
    const APP_TYPE: AppType = AppType::Quiz;
    type Config = QuizConfig;
    type Metadata = QuizMetadata;
}

fn quiz_config() -> QuizConfig {
    QuizConfig {
        questions: vec![
            "Capital of France?".into(),
            "2 + 2?".into(),
            "Largest ocean?".into(),
            "Fastest land animal?".into(),
            "Boiling point of water in C?".into(),
        ],
        seconds_per_question: 20,
    }
}

// ============================================================================
// Helpers
// ============================================================================

struct TestEnv {
    client: SessionClient,
    backend: MemoryBackend,
    _temp: TempDir,
}

fn env_with_codes(codes: CodeGenerator) -> TestEnv {
    let backend = MemoryBackend::new();
    let store = StoreClient::with_code_generator(Arc::new(backend.clone()), codes);
    let temp = TempDir::new().unwrap();
    let local = LocalStore::open(temp.path().join("local.redb")).unwrap();
    TestEnv {
        client: SessionClient::new(store, local, ClientConfig::default()),
        backend,
        _temp: temp,
    }
}

fn env() -> TestEnv {
    env_with_codes(CodeGenerator::seeded(42))
}

/// Wait (bounded) until the session's view satisfies `check`
async fn wait_for_view(
    session: &LiveSession,
    check: impl Fn(&SessionView) -> bool,
) -> SessionView {
    let mut rx = session.watch();
    let view = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| check(v)))
        .await
        .expect("view did not converge in time")
        .unwrap()
        .clone();
    view
}

async fn quiz_host(env: &TestEnv) -> LiveSession {
    let request = partyline_core::new_session::<Quiz>("Friday quiz", &quiz_config()).unwrap();
    let host = env.client.create(request).await.unwrap();
    wait_for_view(&host, |v| v.subscription.is_subscribed()).await;
    host
}

// ============================================================================
// Host / participant flow
// ============================================================================

#[tokio::test]
async fn test_host_sees_participants_join() {
    let env = env_with_codes(CodeGenerator::scripted(["K3PQ7M"]));
    let host = quiz_host(&env).await;
    assert_eq!(host.code(), "K3PQ7M");
    assert!(host.is_cloud_mode());

    // Typed in lower case on a phone
    let ann_device = env
        .client
        .load("k3pq7m", AppType::Quiz, Role::Participant)
        .await
        .unwrap();
    let bo_device = env
        .client
        .load("K3PQ7M", AppType::Quiz, Role::Participant)
        .await
        .unwrap();
    assert!(ann_device.is_cloud_mode());
    assert_eq!(ann_device.config::<Quiz>().unwrap(), quiz_config());

    let ann = ann_device
        .join_as::<Quiz>("Ann", &QuizMetadata::default())
        .await
        .unwrap();
    let bo = bo_device
        .join_as::<Quiz>("Bo", &QuizMetadata::default())
        .await
        .unwrap();

    let view = wait_for_view(&host, |v| v.participants.len() == 2).await;
    let names: Vec<_> = view
        .participants
        .iter()
        .map(|p| p.display_name.as_str())
        .collect();
    assert_eq!(names, vec!["Ann", "Bo"]);
    assert_eq!(view.participants[0].id, ann.id);
    assert_eq!(view.participants[1].id, bo.id);
    assert!(view.last_error.is_none());

    // Ann answers question 1
    ann_device
        .modify_metadata::<Quiz, _>(&ann.id, |m| {
            m.answers.insert(1, 2);
        })
        .await
        .unwrap();

    let view = wait_for_view(&host, |v| {
        v.participant(&ann.id)
            .and_then(|p| partyline_core::decode_metadata::<Quiz>(&p.metadata).ok())
            .is_some_and(|m| m.answers.get(&1) == Some(&2))
    })
    .await;
    let bo_metadata =
        partyline_core::decode_metadata::<Quiz>(&view.participant(&bo.id).unwrap().metadata)
            .unwrap();
    assert!(bo_metadata.answers.is_empty());
}

#[tokio::test]
async fn test_simultaneous_joins_all_land() {
    let env = env();
    let host = quiz_host(&env).await;

    let mut devices = Vec::new();
    for _ in 0..5 {
        devices.push(
            env.client
                .load(host.code(), AppType::Quiz, Role::Participant)
                .await
                .unwrap(),
        );
    }
    let joins = devices
        .iter()
        .enumerate()
        .map(|(i, device)| async move { device.join(&format!("Player {}", i), json!({})).await });
    let joined = futures::future::join_all(joins).await;
    assert!(joined.iter().all(|r| r.is_ok()));

    let view = wait_for_view(&host, |v| v.participants.len() == 5).await;
    for joined in joined {
        let participant = joined.unwrap();
        assert!(view.participant(&participant.id).is_some());
    }
}

#[tokio::test]
async fn test_participant_reload_sees_others() {
    let env = env();
    let host = quiz_host(&env).await;
    let guest = env
        .client
        .load(host.code(), AppType::Quiz, Role::Participant)
        .await
        .unwrap();

    let other = env
        .client
        .load(host.code(), AppType::Quiz, Role::Participant)
        .await
        .unwrap();
    other.join("Cy", json!({})).await.unwrap();

    // Participants never subscribe; the view only moves on reload
    assert!(guest.view().participants.is_empty());
    guest.reload().await.unwrap();
    assert_eq!(guest.view().participants.len(), 1);
}

#[tokio::test]
async fn test_metadata_update_reaches_host() {
    let env = env();
    let host = quiz_host(&env).await;
    let guest = env
        .client
        .load(host.code(), AppType::Quiz, Role::Participant)
        .await
        .unwrap();
    let ann = guest.join("Ann", json!(null)).await.unwrap();

    let updated = guest
        .modify_metadata::<Quiz, _>(&ann.id, |m| {
            m.score += 10;
            m.answers.insert(2, 0);
        })
        .await
        .unwrap();
    assert_eq!(updated.score, 10);

    let view = wait_for_view(&host, |v| {
        v.participant(&ann.id)
            .is_some_and(|p| p.metadata == json!({"score": 10, "answers": {"2": 0}}))
    })
    .await;
    assert_eq!(view.participants.len(), 1);
}

#[tokio::test]
async fn test_close_is_visible_and_blocks_joins() {
    let env = env();
    let host = quiz_host(&env).await;
    let guest = env
        .client
        .load(host.code(), AppType::Quiz, Role::Participant)
        .await
        .unwrap();

    host.close().await.unwrap();
    wait_for_view(&host, |v| !v.is_active()).await;

    let err = guest.join("Late", json!({})).await.unwrap_err();
    assert_eq!(err, SessionError::Closed(host.code().to_string()));
    assert_eq!(guest.view().last_error, Some(err));
}

#[tokio::test]
async fn test_closed_code_falls_back_locally() {
    let env = env();
    let host = quiz_host(&env).await;
    let code = host.code().to_string();
    host.close().await.unwrap();

    let again = env
        .client
        .load(&code, AppType::Quiz, Role::Participant)
        .await
        .unwrap();
    assert!(!again.is_cloud_mode());
    assert_eq!(again.code(), code);
}

// ============================================================================
// Local mode
// ============================================================================

#[tokio::test]
async fn test_unknown_code_serves_local_session() {
    let env = env();
    let session = env
        .client
        .load("ZZZZZZ", AppType::Quiz, Role::Host)
        .await
        .unwrap();

    assert!(!session.is_cloud_mode());
    assert_eq!(session.subscription_state(), SubscriptionState::Idle);

    let ann = session.join("Ann", json!({"score": 1})).await.unwrap();
    let view = session.view();
    assert!(!view.is_cloud_mode());
    assert_eq!(view.participants.len(), 1);
    assert_eq!(view.participant(&ann.id).unwrap().metadata, json!({"score": 1}));
    assert!(view.last_error.is_none());

    // Nothing reached the shared store
    assert_eq!(env.backend.session_count(), 0);
    assert_eq!(env.backend.stats().channels_opened, 0);
}

#[tokio::test]
async fn test_malformed_code_is_not_stored_locally() {
    let env = env();
    for typed in ["", "hello!", "O0I1O0", "ABC"] {
        let err = env
            .client
            .load(typed, AppType::Quiz, Role::Participant)
            .await
            .err()
            .unwrap();
        assert!(
            matches!(err, SessionError::InvalidInput(_)),
            "{typed:?} gave {err:?}"
        );
    }
    assert!(env
        .client
        .resolver()
        .local()
        .list_sessions()
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_create_while_offline_is_local() {
    let env = env();
    env.backend.set_offline(true);

    let request = partyline_core::new_session::<Quiz>("Offline quiz", &quiz_config()).unwrap();
    let host = env.client.create(request).await.unwrap();
    assert!(!host.is_cloud_mode());
    assert_eq!(host.code().len(), AppType::Quiz.code_length());
    assert_eq!(host.config::<Quiz>().unwrap(), quiz_config());

    host.join("Ann", json!({})).await.unwrap();
    assert_eq!(host.view().participants.len(), 1);
}

#[tokio::test]
async fn test_shutdown_client_falls_back_locally() {
    let env = env();
    env.client.shutdown();
    let session = env
        .client
        .load("ABCDEF", AppType::Bingo, Role::Participant)
        .await
        .unwrap();
    assert!(!session.is_cloud_mode());
}

// ============================================================================
// Write semantics
// ============================================================================

#[tokio::test]
async fn test_duplicate_joins_are_kept() {
    let env = env();
    let host = quiz_host(&env).await;
    let guest = env
        .client
        .load(host.code(), AppType::Quiz, Role::Participant)
        .await
        .unwrap();

    let first = guest.join("Ann", json!({})).await.unwrap();
    let second = guest.join("Ann", json!({})).await.unwrap();
    assert_ne!(first.id, second.id);

    let view = wait_for_view(&host, |v| v.participants.len() == 2).await;
    assert_eq!(view.participants_named("Ann").count(), 2);
}

#[tokio::test]
async fn test_same_update_twice_is_idempotent() {
    let env = env();
    let host = quiz_host(&env).await;
    let ann = host.join("Ann", json!({})).await.unwrap();
    let metadata = json!({"score": 3, "answers": {"1": 0, "2": 1}});

    host.update_participant(&ann.id, metadata.clone()).await.unwrap();
    host.reload().await.unwrap();
    let once = host.view();

    host.update_participant(&ann.id, metadata.clone()).await.unwrap();
    host.reload().await.unwrap();
    let twice = host.view();

    assert_eq!(once.participants, twice.participants);
    assert_eq!(twice.participant(&ann.id).unwrap().metadata, metadata);
}

#[tokio::test]
async fn test_concurrent_writers_last_write_wins() {
    let env = env();
    let host = quiz_host(&env).await;
    let phone = env
        .client
        .load(host.code(), AppType::Quiz, Role::Participant)
        .await
        .unwrap();
    let tablet = env
        .client
        .load(host.code(), AppType::Quiz, Role::Participant)
        .await
        .unwrap();

    let ann = phone.join("Ann", json!({})).await.unwrap();
    tablet.reload().await.unwrap();

    // Both read the same starting state, each writes its own field
    phone
        .update_participant(&ann.id, json!({"score": 5}))
        .await
        .unwrap();
    tablet
        .update_participant(&ann.id, json!({"answers": {"1": 3}}))
        .await
        .unwrap();

    let view = wait_for_view(&host, |v| {
        v.participant(&ann.id)
            .is_some_and(|p| p.metadata == json!({"answers": {"1": 3}}))
    })
    .await;
    // The earlier write is gone, not merged
    assert!(view.participant(&ann.id).unwrap().metadata.get("score").is_none());
}

#[tokio::test]
async fn test_update_unknown_participant() {
    let env = env();
    let host = quiz_host(&env).await;
    let stranger = partyline_core::ParticipantId::new();

    let err = host
        .update_participant(&stranger, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ParticipantNotFound(_)));

    let err = host
        .modify_metadata::<Quiz, _>(&stranger, |m| m.score = 1)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ParticipantNotFound(_)));
}

#[tokio::test]
async fn test_blank_display_name_rejected() {
    let env = env();
    let host = quiz_host(&env).await;
    let err = host.join("   ", json!({})).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidInput(_)));
}

// ============================================================================
// Independent consumers
// ============================================================================

#[tokio::test]
async fn test_each_consumer_owns_its_subscription() {
    let env = env();
    let host = quiz_host(&env).await;
    let second_screen = env
        .client
        .load(host.code(), AppType::Quiz, Role::Host)
        .await
        .unwrap();
    wait_for_view(&second_screen, |v| v.subscription.is_subscribed()).await;
    assert_eq!(env.backend.live_channels(), 2);

    drop(second_screen);
    tokio::time::timeout(Duration::from_secs(5), async {
        while env.backend.live_channels() != 1 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    // The survivor keeps receiving changes
    host.join("Ann", json!({})).await.unwrap();
    wait_for_view(&host, |v| v.participants.len() == 1).await;
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let env = env();
    let host = quiz_host(&env).await;
    host.unsubscribe();
    host.unsubscribe();
    assert_eq!(host.subscription_state(), SubscriptionState::Closed);
    assert_eq!(host.view().subscription, SubscriptionState::Closed);

    // Resubscribing after an unsubscribe starts a fresh subscription
    assert!(host.subscribe());
    wait_for_view(&host, |v| v.subscription.is_subscribed()).await;
}

#[tokio::test]
async fn test_teardown_reports_closed_subscription() {
    let env = env();
    let host = quiz_host(&env).await;
    host.teardown();
    assert_eq!(host.subscription_state(), SubscriptionState::Closed);
    assert!(!host.subscribe());
    assert_eq!(host.subscription_state(), SubscriptionState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unsubscribe_during_reconnect_leaves_closed_view() {
    let env = env();
    for _ in 0..25 {
        let host = quiz_host(&env).await;
        env.backend.refuse_next_subscriptions(1);
        env.backend.disconnect_channels("network lost");
        host.unsubscribe();

        // Nothing from the stopped subscription may land after Closed
        tokio::time::sleep(Duration::from_millis(20)).await;
        let view = host.view();
        assert_eq!(view.subscription, SubscriptionState::Closed);
        assert!(view.last_error.is_none(), "stale error {:?}", view.last_error);
        assert_eq!(host.subscription_state(), SubscriptionState::Closed);
        host.close().await.unwrap();
        env.backend.refuse_next_subscriptions(0);
    }
}
