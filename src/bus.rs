//! In-process pub/sub for real-time event distribution.
//!
//! Each WebSocket connection (and any internal listener) registers a
//! bounded queue as a subscriber. When an event is published it is
//! `try_send`-ed into every subscriber's queue; a full queue drops the
//! event for that subscriber only.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default per-subscriber queue capacity.
pub const QUEUE_CAPACITY: usize = 256;

/// An event distributed through the [`EventBus`].
#[derive(Debug, Clone)]
pub struct Event {
    /// Event type, e.g. `session.created`.
    pub kind: String,
    /// Structured event payload.
    pub payload: Value,
    /// Publication time, Unix seconds.
    pub timestamp: f64,
}

impl Event {
    /// Construct an event with the current timestamp.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // sub-second precision is cosmetic here
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        }
    }

    /// Serialize for WebSocket transmission.
    #[must_use]
    pub fn to_json(&self) -> String {
        json!({
            "type": self.kind,
            "payload": self.payload,
            "timestamp": self.timestamp,
        })
        .to_string()
    }

    /// The session this event concerns, if any (`payload.name` or
    /// `payload.session_name`).
    #[must_use]
    pub fn session_name(&self) -> Option<&str> {
        self.payload
            .get("name")
            .or_else(|| self.payload.get("session_name"))
            .and_then(Value::as_str)
    }

    #[must_use]
    pub fn session_created(session: Value) -> Self {
        Self::new("session.created", session)
    }

    #[must_use]
    pub fn session_updated(session: Value) -> Self {
        Self::new("session.updated", session)
    }

    #[must_use]
    pub fn session_closed(session: Value) -> Self {
        Self::new("session.closed", session)
    }

    /// Session status transition with before/after state.
    #[must_use]
    pub fn session_status_changed(mut session: Value, old: &str, new: &str) -> Self {
        if let Some(map) = session.as_object_mut() {
            map.insert("old_status".into(), json!(old));
            map.insert("new_status".into(), json!(new));
        }
        Self::new("session.status_changed", session)
    }

    #[must_use]
    pub fn message_new(message: Value) -> Self {
        Self::new("message.new", message)
    }

    #[must_use]
    pub fn typing_start(session_name: &str) -> Self {
        Self::new("typing.start", json!({ "session_name": session_name }))
    }

    #[must_use]
    pub fn typing_stop(session_name: &str) -> Self {
        Self::new("typing.stop", json!({ "session_name": session_name }))
    }

    /// A user is typing in the browser; relayed to other subscribers.
    #[must_use]
    pub fn typing_user(session_name: &str) -> Self {
        Self::new("typing.user", json!({ "session_name": session_name }))
    }

    #[must_use]
    pub fn sync_complete(session_name: &str, source: &str, count: u64) -> Self {
        Self::new(
            "sync.complete",
            json!({
                "session_name": session_name,
                "source": source,
                "new_messages": count,
            }),
        )
    }

    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new("heartbeat", json!({}))
    }

    #[must_use]
    pub fn usage_updated(provider: &str, snapshot: Value) -> Self {
        Self::new(
            "usage.updated",
            merge(json!({ "provider": provider }), snapshot),
        )
    }

    #[must_use]
    pub fn usage_limit_reached(provider: &str, limit_kind: &str, snapshot: Value) -> Self {
        Self::new(
            "usage.limit_reached",
            merge(
                json!({ "provider": provider, "limit_type": limit_kind }),
                snapshot,
            ),
        )
    }

    #[must_use]
    pub fn usage_reset(provider: &str, limit_kind: &str, snapshot: Value) -> Self {
        Self::new(
            "usage.reset",
            merge(
                json!({ "provider": provider, "limit_type": limit_kind }),
                snapshot,
            ),
        )
    }

    #[must_use]
    pub fn command_queued(entry: Value) -> Self {
        Self::new("command.queued", entry)
    }

    #[must_use]
    pub fn command_executed(entry: Value) -> Self {
        Self::new("command.executed", entry)
    }

    #[must_use]
    pub fn command_failed(entry: Value) -> Self {
        Self::new("command.failed", entry)
    }
}

fn merge(mut base: Value, extra: Value) -> Value {
    if let (Some(base_map), Value::Object(extra_map)) = (base.as_object_mut(), extra) {
        for (key, value) in extra_map {
            base_map.insert(key, value);
        }
    }
    base
}

/// Bounded-queue subscriber registry.
///
/// The mutex guards only registration and the publish-time snapshot;
/// no lock is held across an await point.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Event>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and return its id plus the receiving end of
    /// its bounded queue.
    pub fn subscribe(&self, capacity: usize) -> (u64, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.insert(id, tx);
            debug!(id, total = subscribers.len(), "subscriber registered");
        }
        (id, rx)
    }

    /// Remove a subscriber by id.
    pub fn unsubscribe(&self, id: u64) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.remove(&id);
            debug!(id, total = subscribers.len(), "subscriber removed");
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event. A full
    /// queue drops the event for that subscriber only.
    pub fn publish(&self, event: &Event) -> usize {
        let snapshot: Vec<(u64, mpsc::Sender<Event>)> = match self.subscribers.lock() {
            Ok(subscribers) => subscribers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect(),
            Err(_) => return 0,
        };

        let mut delivered = 0;
        for (id, tx) in snapshot {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber = id, kind = %event.kind, "dropping event for slow subscriber");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Stale entry; the owning task unsubscribes on exit.
                }
            }
        }
        delivered
    }

    /// Current number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}
