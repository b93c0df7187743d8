//! End-to-end session lifecycle through the JSON API with a scripted
//! remote runner.

use serde_json::json;

use super::test_helpers::{request, test_router, MockRunner};

#[tokio::test]
async fn create_send_kill_lifecycle() {
    let runner = MockRunner::new();
    // has-session answers "found" only after creation would have
    // happened; scripted positive throughout for the send/kill path.
    runner.respond("has-session", 0, "found");
    let (router, _state) = test_router(std::sync::Arc::clone(&runner)).await;

    // Create.
    let (status, body) = request(
        &router,
        "POST",
        "/api/sessions",
        Some(json!({ "name": "demo", "host": "testhost" })),
        &[],
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(body["session"]["status"], "active");
    assert_eq!(body["session"]["name"], "demo");

    // Detail shows zero messages.
    let (status, body) = request(&router, "GET", "/api/sessions/demo", None, &[]).await;
    assert_eq!(status, 200);
    assert_eq!(body["session"]["message_count"], 0);

    // Send.
    let (status, body) = request(
        &router,
        "POST",
        "/api/sessions/demo/send",
        Some(json!({ "message": "hello" })),
        &[],
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["sent"], true);
    assert_eq!(body["host"], "testhost");

    // The remote transcript shows the two-stage send contract: the
    // payload first, the Enter keystroke as a separate invocation.
    let commands = runner.commands();
    let send_commands: Vec<&String> = commands
        .iter()
        .filter(|cmd| cmd.contains("send-keys"))
        .collect();
    assert_eq!(send_commands.len(), 2);
    assert!(send_commands[0].contains("send-keys -t 'demo' 'hello'"));
    assert!(send_commands[1].contains("send-keys -t 'demo' Enter"));

    // Kill.
    let (status, body) = request(&router, "DELETE", "/api/sessions/demo", None, &[]).await;
    assert_eq!(status, 200);
    assert_eq!(body["deleted"], true);
    assert_eq!(body["tmux_killed"], true);
    assert_eq!(body["threads_archived"], json!([]));
    assert!(runner.commands().iter().any(|cmd| cmd.contains("kill-session -t 'demo'")));

    let (_, body) = request(&router, "GET", "/api/sessions/demo", None, &[]).await;
    assert_eq!(body["session"]["status"], "closed");
}

#[tokio::test]
async fn create_rejects_invalid_names() {
    let (router, _state) = test_router(MockRunner::new()).await;

    let (status, body) = request(
        &router,
        "POST",
        "/api/sessions",
        Some(json!({ "name": "bad name!" })),
        &[],
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "INVALID_NAME");

    let long = "a".repeat(65);
    let (status, body) = request(
        &router,
        "POST",
        "/api/sessions",
        Some(json!({ "name": long })),
        &[],
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "INVALID_NAME");

    let (status, body) = request(&router, "POST", "/api/sessions", Some(json!({})), &[]).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "MISSING_NAME");
}

#[tokio::test]
async fn create_rejects_unknown_host_and_duplicates() {
    let (router, _state) = test_router(MockRunner::new()).await;

    let (status, body) = request(
        &router,
        "POST",
        "/api/sessions",
        Some(json!({ "name": "demo", "host": "nowhere" })),
        &[],
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "INVALID_HOST");

    let (status, _) = request(
        &router,
        "POST",
        "/api/sessions",
        Some(json!({ "name": "demo" })),
        &[],
    )
    .await;
    assert_eq!(status, 201);

    let (status, body) = request(
        &router,
        "POST",
        "/api/sessions",
        Some(json!({ "name": "demo" })),
        &[],
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "ALREADY_EXISTS");
}

#[tokio::test]
async fn send_to_unknown_session_is_404() {
    let runner = MockRunner::new();
    // has-session never answers "found".
    let (router, _state) = test_router(runner).await;

    let (status, body) = request(
        &router,
        "POST",
        "/api/sessions/ghost/send",
        Some(json!({ "message": "hi" })),
        &[],
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn list_filters_and_rejects_bad_status() {
    let (router, state) = test_router(MockRunner::new()).await;
    state
        .session_repo
        .insert(&agent_relay::models::session::Session::new("one", "testhost"))
        .await
        .expect("seed");

    let (status, body) = request(&router, "GET", "/api/sessions?status=active", None, &[]).await;
    assert_eq!(status, 200);
    assert_eq!(body["total"], 1);

    let (status, body) = request(&router, "GET", "/api/sessions?status=bogus", None, &[]).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "INVALID_STATUS");
}

#[tokio::test]
async fn patch_updates_metadata_and_requires_fields() {
    let (router, state) = test_router(MockRunner::new()).await;
    state
        .session_repo
        .insert(&agent_relay::models::session::Session::new("demo", "testhost"))
        .await
        .expect("seed");

    let (status, body) = request(
        &router,
        "PATCH",
        "/api/sessions/demo",
        Some(json!({ "agent_type": "claude", "status": "unreachable" })),
        &[],
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["session"]["agent_type"], "claude");
    assert_eq!(body["session"]["status"], "unreachable");

    let (status, body) =
        request(&router, "PATCH", "/api/sessions/demo", Some(json!({})), &[]).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "NO_UPDATES");

    let (status, body) = request(
        &router,
        "PATCH",
        "/api/sessions/demo",
        Some(json!({ "status": "bogus" })),
        &[],
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "INVALID_STATUS");
}

#[tokio::test]
async fn bulk_delete_caps_at_twenty() {
    let (router, _state) = test_router(MockRunner::new()).await;

    let names: Vec<String> = (0..21).map(|i| format!("s{i}")).collect();
    let (status, body) = request(
        &router,
        "POST",
        "/api/sessions/bulk-delete",
        Some(json!({ "names": names })),
        &[],
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn export_returns_session_and_messages() {
    let (router, state) = test_router(MockRunner::new()).await;
    state
        .session_repo
        .insert(&agent_relay::models::session::Session::new("demo", "testhost"))
        .await
        .expect("seed");
    state
        .messages
        .ingest_bridge_event(&json!({
            "type": "message.relayed",
            "session_name": "demo",
            "platform": "discord",
            "content": "hello",
            "role": "user",
            "source_id": "1",
        }))
        .await
        .expect("ingest");

    let (status, body) = request(&router, "GET", "/api/sessions/demo/export", None, &[]).await;
    assert_eq!(status, 200);
    assert_eq!(body["session"]["name"], "demo");
    assert_eq!(body["messages"].as_array().expect("messages").len(), 1);
}
