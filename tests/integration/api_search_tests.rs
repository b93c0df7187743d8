//! Full-text search endpoint behaviour.

use serde_json::json;

use super::test_helpers::{request, test_router, MockRunner};

async fn seed(state: &agent_relay::http::AppState, content: &str, id: &str) {
    state
        .messages
        .ingest_bridge_event(&json!({
            "type": "message.relayed",
            "session_name": "demo",
            "platform": "discord",
            "content": content,
            "role": "user",
            "source_id": id,
        }))
        .await
        .expect("ingest");
}

#[tokio::test]
async fn short_queries_are_rejected() {
    let (router, _state) = test_router(MockRunner::new()).await;

    let (status, _) = request(&router, "GET", "/api/messages/search?q=", None, &[]).await;
    assert_eq!(status, 400);

    let (status, _) = request(&router, "GET", "/api/messages/search?q=a", None, &[]).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn finds_matching_content() {
    let (router, state) = test_router(MockRunner::new()).await;
    state
        .session_repo
        .insert(&agent_relay::models::session::Session::new("demo", "testhost"))
        .await
        .expect("seed session");
    seed(&state, "the deploy pipeline failed", "1").await;
    seed(&state, "lunch plans", "2").await;

    let (status, body) =
        request(&router, "GET", "/api/messages/search?q=deploy", None, &[]).await;
    assert_eq!(status, 200);
    assert_eq!(body["total"], 1);
    assert_eq!(body["query"], "deploy");
    assert!(body["results"][0]["snippet"]
        .as_str()
        .expect("snippet")
        .contains("deploy"));
}

#[tokio::test]
async fn quoted_queries_are_fts_safe() {
    let (router, state) = test_router(MockRunner::new()).await;
    state
        .session_repo
        .insert(&agent_relay::models::session::Session::new("demo", "testhost"))
        .await
        .expect("seed session");
    seed(&state, "say \"hello\" politely", "1").await;

    // A lone quote must not produce an FTS syntax error.
    let (status, _) =
        request(&router, "GET", "/api/messages/search?q=%22h", None, &[]).await;
    assert_eq!(status, 200);
}
