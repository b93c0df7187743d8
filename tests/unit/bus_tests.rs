use agent_relay::bus::{Event, EventBus};
use serde_json::json;

#[tokio::test]
async fn subscriber_receives_published_event() {
    let bus = EventBus::new();
    let (_id, mut rx) = bus.subscribe(16);

    let delivered = bus.publish(&Event::heartbeat());
    assert_eq!(delivered, 1);

    let event = rx.recv().await.expect("event");
    assert_eq!(event.kind, "heartbeat");
}

#[tokio::test]
async fn full_queue_drops_for_that_subscriber_only() {
    let bus = EventBus::new();
    let (_slow_id, mut slow_rx) = bus.subscribe(1);
    let (_fast_id, mut fast_rx) = bus.subscribe(16);

    // First publish fills the slow queue; the second overflows it.
    assert_eq!(bus.publish(&Event::typing_start("a")), 2);
    assert_eq!(bus.publish(&Event::typing_start("b")), 1);

    // The fast subscriber saw both.
    assert_eq!(fast_rx.recv().await.expect("first").kind, "typing.start");
    let second = fast_rx.recv().await.expect("second");
    assert_eq!(second.payload["session_name"], "b");

    // The slow subscriber saw only the first.
    let only = slow_rx.recv().await.expect("only event");
    assert_eq!(only.payload["session_name"], "a");
    assert!(slow_rx.try_recv().is_err());
}

#[tokio::test]
async fn unsubscribe_removes_subscriber() {
    let bus = EventBus::new();
    let (id, _rx) = bus.subscribe(16);
    assert_eq!(bus.subscriber_count(), 1);

    bus.unsubscribe(id);
    assert_eq!(bus.subscriber_count(), 0);
    assert_eq!(bus.publish(&Event::heartbeat()), 0);
}

#[test]
fn session_name_reads_name_then_session_name() {
    let named = Event::new("session.created", json!({ "name": "demo" }));
    assert_eq!(named.session_name(), Some("demo"));

    let message = Event::new("message.new", json!({ "session_name": "demo" }));
    assert_eq!(message.session_name(), Some("demo"));

    let neither = Event::heartbeat();
    assert_eq!(neither.session_name(), None);
}

#[test]
fn status_changed_carries_old_and_new() {
    let event = Event::session_status_changed(json!({ "name": "demo" }), "idle", "active");
    assert_eq!(event.payload["old_status"], "idle");
    assert_eq!(event.payload["new_status"], "active");
    assert_eq!(event.payload["name"], "demo");
}

#[test]
fn to_json_has_type_payload_timestamp() {
    let event = Event::sync_complete("demo", "slack", 3);
    let value: serde_json::Value = serde_json::from_str(&event.to_json()).expect("json");
    assert_eq!(value["type"], "sync.complete");
    assert_eq!(value["payload"]["new_messages"], 3);
    assert!(value["timestamp"].is_number());
}
