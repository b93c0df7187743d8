//! WebSocket transport for real-time event streaming.
//!
//! Each connection subscribes to the event bus with its own bounded
//! queue. A send loop drains the queue (emitting a heartbeat after 30 s
//! of silence and applying the client's session filter); a receive loop
//! handles client frames. On shutdown the socket closes with 1001.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::bus::{Event, QUEUE_CAPACITY};

use super::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Close code sent on server shutdown.
const GOING_AWAY: u16 = 1001;

/// `GET /ws` — upgrade to the event-stream protocol. Auth happened in
/// the middleware (token query parameter or cookie).
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (subscriber_id, queue) = state.bus.subscribe(QUEUE_CAPACITY);
    info!(
        subscriber_id,
        total = state.bus.subscriber_count(),
        "websocket client connected"
    );

    let (mut sink, stream) = socket.split();

    // Initial heartbeat confirms the stream before any event flows.
    if sink
        .send(Message::Text(Event::heartbeat().to_json().into()))
        .await
        .is_err()
    {
        state.bus.unsubscribe(subscriber_id);
        return;
    }

    // The session filter is owned by the send loop; the receive loop
    // updates it through this channel.
    let (filter_tx, filter_rx) = mpsc::unbounded_channel();

    let shutdown = state.shutdown.clone();
    let send_task = tokio::spawn(async move {
        send_loop(&mut sink, queue, filter_rx, &shutdown).await;
    });

    receive_loop(stream, &state, &filter_tx).await;

    send_task.abort();
    state.bus.unsubscribe(subscriber_id);
    info!(
        subscriber_id,
        total = state.bus.subscriber_count(),
        "websocket client disconnected"
    );
}

/// Messages from the receive loop to the send loop.
enum SendCommand {
    SetFilter(HashSet<String>),
    Reply(String),
}

async fn send_loop(
    sink: &mut SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Event>,
    mut commands: mpsc::UnboundedReceiver<SendCommand>,
    shutdown: &tokio_util::sync::CancellationToken,
) {
    let mut filter: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: GOING_AWAY,
                        reason: "server shutting down".into(),
                    })))
                    .await;
                break;
            }
            command = commands.recv() => {
                match command {
                    Some(SendCommand::SetFilter(sessions)) => filter = sessions,
                    Some(SendCommand::Reply(text)) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            event = tokio::time::timeout(HEARTBEAT_INTERVAL, queue.recv()) => {
                match event {
                    Ok(Some(event)) => {
                        // Session filter: an empty set receives all.
                        if !filter.is_empty() {
                            if let Some(name) = event.session_name() {
                                if !filter.contains(name) {
                                    continue;
                                }
                            }
                        }
                        if sink.send(Message::Text(event.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        if sink
                            .send(Message::Text(Event::heartbeat().to_json().into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        }
    }
}

async fn receive_loop(
    mut stream: SplitStream<WebSocket>,
    state: &Arc<AppState>,
    commands: &mpsc::UnboundedSender<SendCommand>,
) {
    while let Some(frame) = stream.next().await {
        let Ok(message) = frame else { break };
        match message {
            Message::Text(text) => {
                let Ok(data) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                handle_client_frame(&data, state, commands).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn handle_client_frame(
    data: &Value,
    state: &Arc<AppState>,
    commands: &mpsc::UnboundedSender<SendCommand>,
) {
    match data.get("type").and_then(Value::as_str) {
        Some("ping") => {
            let _ = commands.send(SendCommand::Reply(json!({ "type": "pong" }).to_string()));
        }
        Some("subscribe") => {
            let sessions: HashSet<String> = data
                .get("sessions")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default();
            debug!(?sessions, "websocket filter updated");
            let _ = commands.send(SendCommand::SetFilter(sessions));
        }
        Some("fetch_history") => {
            let session = data
                .get("session")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_owned();
            if session.is_empty() {
                return;
            }
            let limit = data
                .get("limit")
                .and_then(Value::as_i64)
                .unwrap_or(50)
                .clamp(1, 200);
            let offset = data.get("offset").and_then(Value::as_i64).unwrap_or(0).max(0);

            if let Ok((messages, total)) = state
                .message_repo
                .list_for_session(&session, limit, offset)
                .await
            {
                let reply = json!({
                    "type": "history",
                    "payload": {
                        "session": session,
                        "messages": messages,
                        "total": total,
                        "limit": limit,
                        "offset": offset,
                    },
                });
                let _ = commands.send(SendCommand::Reply(reply.to_string()));
            }
        }
        Some("typing") => {
            if let Some(session) = data.get("session").and_then(Value::as_str) {
                if !session.is_empty() {
                    state.bus.publish(&Event::typing_user(session));
                }
            }
        }
        _ => {}
    }
}
