use std::sync::Arc;

use agent_relay::models::message::{MessageRole, MessageSource, NewMessage};
use agent_relay::models::session::Session;
use agent_relay::persistence::db;
use agent_relay::persistence::message_repo::MessageRepo;
use agent_relay::persistence::session_repo::SessionRepo;
use agent_relay::services::message::dedup_hash;
use chrono::Utc;

async fn repos() -> (SessionRepo, MessageRepo) {
    let pool = Arc::new(db::connect_memory().await.expect("in-memory db"));
    let sessions = SessionRepo::new(Arc::clone(&pool));
    sessions
        .insert(&Session::new("demo", "testhost"))
        .await
        .expect("seed session");
    (sessions, MessageRepo::new(pool))
}

fn message(content: &str, source_id: Option<&str>) -> NewMessage {
    NewMessage {
        session_name: "demo".into(),
        role: MessageRole::User,
        content: content.to_owned(),
        source: MessageSource::Discord,
        source_id: source_id.map(str::to_owned),
        source_author: Some("user1".into()),
        timestamp: Utc::now(),
        dedup_hash: dedup_hash("demo", MessageSource::Discord, source_id, content),
    }
}

#[tokio::test]
async fn duplicate_fingerprint_inserts_once() {
    let (_sessions, messages) = repos().await;

    assert!(messages.insert_or_ignore(&message("hi", Some("111"))).await.expect("first"));
    assert!(!messages.insert_or_ignore(&message("hi", Some("111"))).await.expect("replay"));

    let total = messages.count_for_session("demo").await.expect("count");
    assert_eq!(total, 1);
}

#[tokio::test]
async fn listing_orders_by_timestamp_and_paginates() {
    let (_sessions, messages) = repos().await;
    for i in 0..5 {
        let mut msg = message(&format!("msg {i}"), Some(&format!("id-{i}")));
        msg.timestamp = Utc::now() + chrono::Duration::seconds(i);
        messages.insert_or_ignore(&msg).await.expect("insert");
    }

    let (page, total) = messages.list_for_session("demo", 2, 1).await.expect("page");
    assert_eq!(total, 5);
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].content, "msg 1");
    assert_eq!(page[1].content, "msg 2");
}

#[tokio::test]
async fn latest_source_id_is_the_sync_cursor() {
    let (_sessions, messages) = repos().await;
    for i in 0..3 {
        let mut msg = message(&format!("m{i}"), Some(&format!("{i}")));
        msg.timestamp = Utc::now() + chrono::Duration::seconds(i);
        messages.insert_or_ignore(&msg).await.expect("insert");
    }

    let cursor = messages
        .latest_source_id("demo", MessageSource::Discord)
        .await
        .expect("cursor");
    assert_eq!(cursor.as_deref(), Some("2"));

    let none = messages
        .latest_source_id("demo", MessageSource::Slack)
        .await
        .expect("cursor");
    assert!(none.is_none());
}

#[tokio::test]
async fn fts_search_finds_and_ranks() {
    let (_sessions, messages) = repos().await;
    messages
        .insert_or_ignore(&message("the deploy failed with a panic", Some("1")))
        .await
        .expect("insert");
    messages
        .insert_or_ignore(&message("all tests passed", Some("2")))
        .await
        .expect("insert");

    let (hits, total) = messages
        .search("\"deploy\"", None, None, 50, 0)
        .await
        .expect("search");
    assert_eq!(total, 1);
    assert!(hits[0].snippet.contains("deploy"));
}

#[tokio::test]
async fn fts_search_with_doubled_quotes_is_safe() {
    let (_sessions, messages) = repos().await;
    messages
        .insert_or_ignore(&message("say \"hello\" to the team", Some("1")))
        .await
        .expect("insert");

    // The handler doubles inner quotes and wraps the term; the repo must
    // treat the result as a single FTS string.
    let (_, total) = messages
        .search("\"say \"\"hello\"\"\"", None, None, 50, 0)
        .await
        .expect("search");
    assert_eq!(total, 1);
}

#[tokio::test]
async fn search_filters_by_session_and_role() {
    let (_sessions, messages) = repos().await;
    messages
        .insert_or_ignore(&message("needle in demo", Some("1")))
        .await
        .expect("insert");

    let (_, total) = messages
        .search("\"needle\"", Some("demo"), Some(MessageRole::User), 50, 0)
        .await
        .expect("search");
    assert_eq!(total, 1);

    let (_, total) = messages
        .search("\"needle\"", Some("other"), None, 50, 0)
        .await
        .expect("search");
    assert_eq!(total, 0);
}
