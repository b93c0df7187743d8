use std::sync::Arc;

use agent_relay::models::queue::QueueStatus;
use agent_relay::persistence::db;
use agent_relay::persistence::queue_repo::QueueRepo;

async fn repo() -> QueueRepo {
    QueueRepo::new(Arc::new(db::connect_memory().await.expect("in-memory db")))
}

#[tokio::test]
async fn enqueue_starts_pending() {
    let repo = repo().await;
    let entry = repo.enqueue("demo", "testhost", "retry", 0).await.expect("enqueue");
    assert_eq!(entry.status, QueueStatus::Pending);
    assert_eq!(entry.session_name, "demo");
    assert!(entry.executed_at.is_none());
}

#[tokio::test]
async fn pending_drains_priority_desc_then_oldest_first() {
    let repo = repo().await;
    repo.enqueue("demo", "h", "first-low", 0).await.expect("enqueue");
    repo.enqueue("demo", "h", "second-low", 0).await.expect("enqueue");
    repo.enqueue("demo", "h", "high", 5).await.expect("enqueue");

    let pending = repo.pending(50).await.expect("pending");
    let commands: Vec<&str> = pending.iter().map(|e| e.command.as_str()).collect();
    assert_eq!(commands, vec!["high", "first-low", "second-low"]);
}

#[tokio::test]
async fn terminal_statuses_record_executed_at_and_error() {
    let repo = repo().await;
    let entry = repo.enqueue("demo", "h", "x", 0).await.expect("enqueue");

    repo.set_status(entry.id, QueueStatus::Executing, None).await.expect("executing");
    repo.set_status(entry.id, QueueStatus::Failed, Some("send failed"))
        .await
        .expect("failed");

    let stored = repo.get(entry.id).await.expect("get").expect("present");
    assert_eq!(stored.status, QueueStatus::Failed);
    assert!(stored.executed_at.is_some());
    assert_eq!(stored.error.as_deref(), Some("send failed"));
}

#[tokio::test]
async fn cancel_only_applies_to_pending() {
    let repo = repo().await;
    let pending = repo.enqueue("demo", "h", "a", 0).await.expect("enqueue");
    let done = repo.enqueue("demo", "h", "b", 0).await.expect("enqueue");
    repo.set_status(done.id, QueueStatus::Completed, None).await.expect("complete");

    repo.cancel(pending.id).await.expect("cancel pending");
    assert!(repo.cancel(done.id).await.is_err());
    assert!(repo.cancel(9999).await.is_err());

    let stored = repo.get(pending.id).await.expect("get").expect("present");
    assert_eq!(stored.status, QueueStatus::Cancelled);
}

#[tokio::test]
async fn list_puts_pending_and_executing_first() {
    let repo = repo().await;
    let a = repo.enqueue("demo", "h", "done", 0).await.expect("enqueue");
    repo.set_status(a.id, QueueStatus::Completed, None).await.expect("complete");
    repo.enqueue("demo", "h", "waiting", 0).await.expect("enqueue");

    let (entries, total) = repo.list(None, 50, 0).await.expect("list");
    assert_eq!(total, 2);
    assert_eq!(entries[0].command, "waiting");
}

#[tokio::test]
async fn stats_group_by_status() {
    let repo = repo().await;
    repo.enqueue("demo", "h", "a", 0).await.expect("enqueue");
    repo.enqueue("demo", "h", "b", 0).await.expect("enqueue");

    let stats = repo.stats().await.expect("stats");
    assert!(stats.contains(&("pending".to_owned(), 2)));
}
