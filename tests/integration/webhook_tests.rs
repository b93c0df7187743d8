//! Webhook ingestion: fire-and-forget 202 contract and replay dedup.

use serde_json::json;

use super::test_helpers::{request, test_router, MockRunner};

#[tokio::test]
async fn replayed_event_yields_a_single_row() {
    let (router, state) = test_router(MockRunner::new()).await;
    state
        .session_repo
        .insert(&agent_relay::models::session::Session::new("demo", "testhost"))
        .await
        .expect("seed");

    let event = json!({
        "type": "message.relayed",
        "session_name": "demo",
        "platform": "discord",
        "content": "x",
        "source_id": "111",
        "role": "user",
    });
    for _ in 0..2 {
        let (status, body) =
            request(&router, "POST", "/api/hooks/event", Some(event.clone()), &[]).await;
        assert_eq!(status, 202);
        assert_eq!(body["accepted"], true);
    }

    let (status, body) =
        request(&router, "GET", "/api/sessions/demo/messages", None, &[]).await;
    assert_eq!(status, 200);
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn unknown_session_still_accepted() {
    let (router, _state) = test_router(MockRunner::new()).await;
    let (status, body) = request(
        &router,
        "POST",
        "/api/hooks/event",
        Some(json!({
            "type": "message.relayed",
            "session_name": "ghost",
            "platform": "slack",
            "content": "x",
        })),
        &[],
    )
    .await;
    assert_eq!(status, 202);
    assert_eq!(body["accepted"], true);
}

#[tokio::test]
async fn malformed_body_is_invalid_json() {
    use tower::ServiceExt;

    let (router, _state) = test_router(MockRunner::new()).await;
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/hooks/event")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .expect("request");
    let response = router.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn session_killed_events_land_in_the_audit_log() {
    let (router, state) = test_router(MockRunner::new()).await;
    state
        .session_repo
        .insert(&agent_relay::models::session::Session::new("demo", "testhost"))
        .await
        .expect("seed");

    let (status, _) = request(
        &router,
        "POST",
        "/api/hooks/event",
        Some(json!({
            "type": "session.killed",
            "session_name": "demo",
            "platform": "slack",
            "host": "testhost",
            "tmux_killed": true,
        })),
        &[],
    )
    .await;
    assert_eq!(status, 202);

    let audit = state.audit.recent(10).await.expect("audit");
    assert!(audit.iter().any(|row| row.event_type == "session.killed"));
}
