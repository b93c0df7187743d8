use std::sync::Arc;

use agent_relay::models::session::{Session, SessionStatus};
use agent_relay::persistence::db;
use agent_relay::persistence::session_repo::{SessionFilter, SessionRepo};

async fn repo() -> SessionRepo {
    let pool = db::connect_memory().await.expect("in-memory db");
    SessionRepo::new(Arc::new(pool))
}

#[tokio::test]
async fn insert_and_get_roundtrip() {
    let repo = repo().await;
    assert!(repo.insert(&Session::new("demo", "testhost")).await.expect("insert"));

    let session = repo.get("demo").await.expect("query").expect("present");
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.host.as_deref(), Some("testhost"));
    assert!(session.closed_at.is_none());
}

#[tokio::test]
async fn insert_is_idempotent() {
    let repo = repo().await;
    assert!(repo.insert(&Session::new("demo", "a")).await.expect("first"));
    assert!(!repo.insert(&Session::new("demo", "b")).await.expect("second"));

    let session = repo.get("demo").await.expect("query").expect("present");
    assert_eq!(session.host.as_deref(), Some("a"));
}

#[tokio::test]
async fn get_missing_returns_none() {
    let repo = repo().await;
    assert!(repo.get("nope").await.expect("query").is_none());
}

#[tokio::test]
async fn closing_sets_closed_at_once() {
    let repo = repo().await;
    repo.insert(&Session::new("demo", "testhost")).await.expect("insert");

    let closed = repo
        .transition_status("demo", SessionStatus::Closed)
        .await
        .expect("close");
    assert_eq!(closed.status, SessionStatus::Closed);
    assert!(closed.closed_at.is_some());

    // A second identical transition is a no-op, not an error.
    let again = repo
        .transition_status("demo", SessionStatus::Closed)
        .await
        .expect("idempotent close");
    assert_eq!(again.closed_at, closed.closed_at);
}

#[tokio::test]
async fn reconciler_cannot_close_an_idle_session_directly() {
    let repo = repo().await;
    repo.insert(&Session::new("demo", "testhost")).await.expect("insert");
    repo.set_status("demo", SessionStatus::Idle).await.expect("idle");

    assert!(repo
        .transition_status("demo", SessionStatus::Closed)
        .await
        .is_err());
}

#[tokio::test]
async fn closed_sessions_reactivate_on_rediscovery() {
    let repo = repo().await;
    repo.insert(&Session::new("demo", "testhost")).await.expect("insert");
    repo.transition_status("demo", SessionStatus::Closed)
        .await
        .expect("close");

    let active = repo
        .transition_status("demo", SessionStatus::Active)
        .await
        .expect("reopen");
    assert_eq!(active.status, SessionStatus::Active);
}

#[tokio::test]
async fn list_filters_by_status_and_substring() {
    let repo = repo().await;
    repo.insert(&Session::new("alpha-one", "a")).await.expect("insert");
    repo.insert(&Session::new("alpha-two", "b")).await.expect("insert");
    repo.insert(&Session::new("beta", "a")).await.expect("insert");
    repo.set_status("beta", SessionStatus::Closed).await.expect("close");

    let filter = SessionFilter {
        status: Some(SessionStatus::Active),
        name_contains: Some("alpha".into()),
        limit: 50,
        ..SessionFilter::default()
    };
    let (sessions, total) = repo.list(&filter).await.expect("list");
    assert_eq!(total, 2);
    assert!(sessions.iter().all(|s| s.name.starts_with("alpha")));

    let filter = SessionFilter {
        host: Some("a".into()),
        limit: 50,
        ..SessionFilter::default()
    };
    let (_, total) = repo.list(&filter).await.expect("list");
    assert_eq!(total, 2);
}

#[tokio::test]
async fn unknown_sort_field_falls_back() {
    let repo = repo().await;
    repo.insert(&Session::new("a", "h")).await.expect("insert");
    repo.insert(&Session::new("b", "h")).await.expect("insert");

    // A hostile sort value must not reach the SQL text.
    let filter = SessionFilter {
        sort: Some("name; DROP TABLE sessions".into()),
        limit: 50,
        ..SessionFilter::default()
    };
    let (sessions, _) = repo.list(&filter).await.expect("list");
    assert_eq!(sessions.len(), 2);

    let filter = SessionFilter {
        sort: Some("name".into()),
        limit: 50,
        ..SessionFilter::default()
    };
    let (sessions, _) = repo.list(&filter).await.expect("list");
    assert_eq!(sessions[0].name, "a");
}

#[tokio::test]
async fn thread_anchor_updates_stick() {
    let repo = repo().await;
    repo.insert(&Session::new("demo", "h")).await.expect("insert");
    repo.set_thread_anchors("demo", Some("12345"), Some("1726.0001"), Some("C01"))
        .await
        .expect("anchors");
    repo.set_archived("demo", "discord").await.expect("archive");

    let session = repo.get("demo").await.expect("query").expect("present");
    assert_eq!(session.discord_thread_id.as_deref(), Some("12345"));
    assert_eq!(session.slack_thread_ts.as_deref(), Some("1726.0001"));
    assert_eq!(session.slack_channel_id.as_deref(), Some("C01"));
    assert!(session.discord_archived);
    assert!(!session.slack_archived);
}

#[tokio::test]
async fn status_counts_group_by_status() {
    let repo = repo().await;
    repo.insert(&Session::new("a", "h")).await.expect("insert");
    repo.insert(&Session::new("b", "h")).await.expect("insert");
    repo.set_status("b", SessionStatus::Closed).await.expect("close");

    let counts = repo.status_counts().await.expect("counts");
    assert!(counts.contains(&("active".to_owned(), 1)));
    assert!(counts.contains(&("closed".to_owned(), 1)));
}
