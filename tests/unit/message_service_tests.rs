use std::sync::Arc;

use agent_relay::bus::EventBus;
use agent_relay::models::session::Session;
use agent_relay::persistence::db;
use agent_relay::persistence::event_repo::EventRepo;
use agent_relay::persistence::message_repo::MessageRepo;
use agent_relay::persistence::session_repo::SessionRepo;
use agent_relay::services::message::MessageService;
use serde_json::json;

struct Fixture {
    bus: Arc<EventBus>,
    service: MessageService,
    messages: MessageRepo,
    audit: EventRepo,
}

async fn fixture() -> Fixture {
    let pool = Arc::new(db::connect_memory().await.expect("in-memory db"));
    let bus = Arc::new(EventBus::new());
    let sessions = SessionRepo::new(Arc::clone(&pool));
    sessions
        .insert(&Session::new("demo", "testhost"))
        .await
        .expect("seed session");
    let messages = MessageRepo::new(Arc::clone(&pool));
    let audit = EventRepo::new(Arc::clone(&pool));
    let service = MessageService::new(
        Arc::clone(&bus),
        sessions,
        messages.clone(),
        audit.clone(),
        5000,
    );
    Fixture {
        bus,
        service,
        messages,
        audit,
    }
}

#[tokio::test]
async fn replayed_bridge_event_persists_once_and_publishes_once() {
    let fx = fixture().await;
    let (_id, mut rx) = fx.bus.subscribe(16);

    let event = json!({
        "type": "message.relayed",
        "session_name": "demo",
        "platform": "discord",
        "content": "x",
        "role": "user",
        "source_id": "111",
    });
    fx.service.ingest_bridge_event(&event).await.expect("first");
    fx.service.ingest_bridge_event(&event).await.expect("replay");

    assert_eq!(fx.messages.count_for_session("demo").await.expect("count"), 1);

    let published = rx.recv().await.expect("event");
    assert_eq!(published.kind, "message.new");
    assert!(rx.try_recv().is_err(), "replay must not re-publish");

    // The audit log still records both deliveries.
    let audit_rows = fx.audit.recent(10).await.expect("audit");
    assert_eq!(audit_rows.len(), 2);
}

#[tokio::test]
async fn unknown_session_is_a_silent_skip() {
    let fx = fixture().await;
    let event = json!({
        "type": "message.relayed",
        "session_name": "ghost",
        "platform": "discord",
        "content": "x",
        "role": "user",
    });
    fx.service.ingest_bridge_event(&event).await.expect("no error");
    assert_eq!(fx.messages.count_for_session("ghost").await.expect("count"), 0);
}

#[tokio::test]
async fn typing_events_republish_without_persisting() {
    let fx = fixture().await;
    let (_id, mut rx) = fx.bus.subscribe(16);

    let event = json!({ "type": "typing.start", "session_name": "demo" });
    fx.service.ingest_bridge_event(&event).await.expect("ok");

    let published = rx.recv().await.expect("event");
    assert_eq!(published.kind, "typing.start");
    assert_eq!(fx.messages.count_for_session("demo").await.expect("count"), 0);
}

#[tokio::test]
async fn discord_batch_detects_roles_against_bot_identity() {
    let fx = fixture().await;
    let batch = vec![
        json!({ "id": "1", "content": "from human", "author": { "id": "U1", "bot": false, "username": "human" } }),
        json!({ "id": "2", "content": "from own bot", "author": { "id": "BOT", "bot": true, "username": "relay" } }),
        json!({ "id": "3", "content": "from other bot", "author": { "id": "OTHER", "bot": true, "username": "ci" } }),
    ];
    let count = fx
        .service
        .ingest_discord_batch("demo", &batch, Some("BOT"))
        .await
        .expect("ingest");
    assert_eq!(count, 3);

    let (stored, _) = fx.messages.list_for_session("demo", 50, 0).await.expect("list");
    let roles: Vec<&str> = stored.iter().map(|m| m.role.as_str()).collect();
    assert!(roles.contains(&"user"));
    assert!(roles.contains(&"assistant"));
    assert!(roles.contains(&"system"));
}

#[tokio::test]
async fn slack_batch_normalises_unix_float_timestamps() {
    let fx = fixture().await;
    let batch = vec![json!({ "ts": "1726000000.000100", "text": "hello", "user": "U1" })];
    let count = fx
        .service
        .ingest_slack_batch("demo", &batch, Some("UBOT"))
        .await
        .expect("ingest");
    assert_eq!(count, 1);

    let (stored, _) = fx.messages.list_for_session("demo", 50, 0).await.expect("list");
    assert_eq!(stored[0].timestamp.timestamp(), 1_726_000_000);
    assert_eq!(stored[0].source_id.as_deref(), Some("1726000000.000100"));
}

#[tokio::test]
async fn slack_bot_role_is_assistant_only_for_own_bot() {
    let fx = fixture().await;
    let batch = vec![
        json!({ "ts": "1.1", "text": "own", "user": "UBOT", "bot_id": "B1" }),
        json!({ "ts": "1.2", "text": "foreign", "user": "UX", "subtype": "bot_message" }),
    ];
    fx.service
        .ingest_slack_batch("demo", &batch, Some("UBOT"))
        .await
        .expect("ingest");

    let (stored, _) = fx.messages.list_for_session("demo", 50, 0).await.expect("list");
    let own = stored.iter().find(|m| m.content == "own").expect("own");
    let foreign = stored.iter().find(|m| m.content == "foreign").expect("foreign");
    assert_eq!(own.role.as_str(), "assistant");
    assert_eq!(foreign.role.as_str(), "system");
}

#[tokio::test]
async fn transcript_lines_ingest_with_line_hash_dedup() {
    let fx = fixture().await;
    let lines = vec![
        r#"{"type":"user","message":{"content":"question"}}"#.to_owned(),
        r#"{"type":"assistant","message":{"content":[{"type":"text","text":"answer"}]}}"#.to_owned(),
        r#"{"type":"tool_result","content":"skipped"}"#.to_owned(),
    ];
    let count = fx
        .service
        .ingest_transcript_lines("demo", &lines)
        .await
        .expect("ingest");
    assert_eq!(count, 2);

    // Re-ingesting the same tail is the idempotent common case.
    let count = fx
        .service
        .ingest_transcript_lines("demo", &lines)
        .await
        .expect("replay");
    assert_eq!(count, 0);
}
