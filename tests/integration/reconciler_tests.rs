//! Reconciler tick behaviour against a scripted remote runner.

use std::sync::Arc;

use agent_relay::bus::Event;
use agent_relay::models::session::SessionStatus;
use agent_relay::workers::reconciler::Reconciler;
use tokio::sync::mpsc;

use super::test_helpers::{test_state, MockRunner};

async fn fixture(
    runner: Arc<MockRunner>,
) -> (Reconciler, Arc<agent_relay::http::AppState>, mpsc::Receiver<Event>) {
    let state = test_state(Arc::clone(&runner), agent_relay::config::Config::default()).await;
    let (_id, rx) = state.bus.subscribe(64);
    let reconciler = Reconciler {
        sessions: state.sessions.clone(),
        platform: state.platform.clone(),
        repo: state.session_repo.clone(),
        audit: state.audit.clone(),
        bus: Arc::clone(&state.bus),
    };
    (reconciler, state, rx)
}

#[tokio::test]
async fn discovers_live_sessions_as_active() {
    let runner = MockRunner::new();
    runner.respond("list-sessions", 0, "demo-b");
    let (reconciler, state, mut rx) = fixture(Arc::clone(&runner)).await;

    reconciler.tick().await.expect("tick");

    let session = state
        .session_repo
        .get("demo-b")
        .await
        .expect("query")
        .expect("discovered");
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.host.as_deref(), Some("testhost"));

    let event = rx.recv().await.expect("event");
    assert_eq!(event.kind, "session.created");
    assert_eq!(event.payload["name"], "demo-b");

    let audit = state.audit.recent(10).await.expect("audit");
    assert!(audit.iter().any(|row| row.event_type == "session.created"));
}

#[tokio::test]
async fn vanished_sessions_close_once_with_timestamp() {
    let runner = MockRunner::new();
    runner.respond("list-sessions", 0, "demo-b");
    let (reconciler, state, mut rx) = fixture(Arc::clone(&runner)).await;

    reconciler.tick().await.expect("discover tick");
    let _created = rx.recv().await.expect("created event");

    // The session disappears from the host listing.
    runner.clear_responses();
    reconciler.tick().await.expect("closing tick");

    let session = state
        .session_repo
        .get("demo-b")
        .await
        .expect("query")
        .expect("present");
    assert_eq!(session.status, SessionStatus::Closed);
    assert!(session.closed_at.is_some());

    let event = rx.recv().await.expect("event");
    assert_eq!(event.kind, "session.closed");

    // Further ticks with the session still absent change nothing.
    reconciler.tick().await.expect("idempotent tick");
    let unchanged = state
        .session_repo
        .get("demo-b")
        .await
        .expect("query")
        .expect("present");
    assert_eq!(unchanged.closed_at, session.closed_at);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn live_idle_session_returns_to_active() {
    let runner = MockRunner::new();
    runner.respond("list-sessions", 0, "demo-b");
    let (reconciler, state, mut rx) = fixture(Arc::clone(&runner)).await;

    reconciler.tick().await.expect("discover tick");
    let _ = rx.recv().await;
    state
        .session_repo
        .set_status("demo-b", SessionStatus::Idle)
        .await
        .expect("idle");

    reconciler.tick().await.expect("refresh tick");

    let session = state
        .session_repo
        .get("demo-b")
        .await
        .expect("query")
        .expect("present");
    assert_eq!(session.status, SessionStatus::Active);

    // status_changed then updated.
    let kinds: Vec<String> = [rx.recv().await, rx.recv().await]
        .into_iter()
        .flatten()
        .map(|e| e.kind)
        .collect();
    assert!(kinds.contains(&"session.status_changed".to_owned()));
    assert!(kinds.contains(&"session.updated".to_owned()));
}

#[tokio::test]
async fn rediscovery_reopens_a_closed_session() {
    let runner = MockRunner::new();
    runner.respond("list-sessions", 0, "demo-b");
    let (reconciler, state, mut _rx) = fixture(Arc::clone(&runner)).await;

    reconciler.tick().await.expect("discover");
    runner.clear_responses();
    reconciler.tick().await.expect("close");

    runner.respond("list-sessions", 0, "demo-b");
    reconciler.tick().await.expect("rediscover");

    let session = state
        .session_repo
        .get("demo-b")
        .await
        .expect("query")
        .expect("present");
    assert_eq!(session.status, SessionStatus::Active);
}
