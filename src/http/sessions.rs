//! Session CRUD, send, message listing, sync triggers, and export.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::bus::Event;
use crate::config::ThreadCleanup;
use crate::models::session::{is_valid_session_name, AgentKind, Session, SessionStatus};
use crate::persistence::session_repo::SessionFilter;

use super::error::ApiError;
use super::AppState;

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    status: Option<String>,
    host: Option<String>,
    q: Option<String>,
    sort: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// `GET /api/sessions` — filtered, sorted, paginated listing.
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(SessionStatus::parse(raw).ok_or_else(|| {
            ApiError::bad_request("INVALID_STATUS", format!("Unknown status: {raw}"))
        })?),
    };

    let filter = SessionFilter {
        status,
        host: query.host.filter(|h| !h.is_empty()),
        name_contains: query.q.map(|q| q.trim().to_owned()).filter(|q| !q.is_empty()),
        sort: query.sort,
        limit: query.limit.unwrap_or(50).clamp(1, 200),
        offset: query.offset.unwrap_or(0).max(0),
    };

    let (sessions, total) = state.session_repo.list(&filter).await?;
    Ok(Json(json!({
        "sessions": sessions,
        "total": total,
        "limit": filter.limit,
        "offset": filter.offset,
    })))
}

/// `GET /api/sessions/{name}` — detail with message count.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let session = require_session(&state, &name).await?;
    let message_count = state.message_repo.count_for_session(&name).await?;

    let mut body = serde_json::to_value(&session).map_err(crate::AppError::from)?;
    if let Some(map) = body.as_object_mut() {
        map.insert("message_count".into(), json!(message_count));
    }
    Ok(Json(json!({ "session": body })))
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    name: Option<String>,
    host: Option<String>,
    working_dir: Option<String>,
}

/// `POST /api/sessions` — create the tmux session and record it.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Ok(Json(body)) = body else {
        return Err(ApiError::bad_request("INVALID_JSON", "Request body must be JSON"));
    };

    let name = body.name.unwrap_or_default().trim().to_owned();
    if name.is_empty() {
        return Err(ApiError::bad_request("MISSING_NAME", "Session name is required"));
    }
    if !is_valid_session_name(&name) {
        return Err(ApiError::bad_request(
            "INVALID_NAME",
            "Name must be alphanumeric/dash/underscore, max 64 chars",
        ));
    }

    let host = match body.host.filter(|h| !h.trim().is_empty()) {
        Some(host) => host.trim().to_owned(),
        None => state.sessions.default_host().to_owned(),
    };
    if !state.sessions.is_known_host(&host) {
        return Err(ApiError::bad_request(
            "INVALID_HOST",
            format!("Unknown host '{host}'. Available: {:?}", state.sessions.hosts()),
        ));
    }

    if state.session_repo.get(&name).await?.is_some() {
        return Err(ApiError::conflict(
            "ALREADY_EXISTS",
            format!("Session '{name}' already exists"),
        ));
    }

    let created = state
        .sessions
        .create(&name, &host, body.working_dir.as_deref())
        .await
        .unwrap_or(false);
    if !created {
        return Err(ApiError::internal(
            "TMUX_CREATE_FAILED",
            format!("Failed to create tmux session '{name}' on '{host}'"),
        ));
    }

    let mut session = Session::new(&name, &host);
    session.working_dir = body.working_dir;
    state.session_repo.insert(&session).await?;

    let stored = require_session(&state, &name).await?;
    let payload = serde_json::to_value(&stored).map_err(crate::AppError::from)?;
    state.bus.publish(&Event::session_created(payload.clone()));

    Ok((StatusCode::CREATED, Json(json!({ "session": payload }))))
}

/// `DELETE /api/sessions/{name}` — kill tmux, clean platform threads,
/// mark closed.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let session = require_session(&state, &name).await?;

    let (tmux_killed, _host) = state.sessions.kill(&name).await;
    let threads_archived = cleanup_threads(&state, &session).await;

    state.session_repo.set_status(&name, SessionStatus::Closed).await?;
    if let Some(closed) = state.session_repo.get(&name).await? {
        let payload = serde_json::to_value(&closed).map_err(crate::AppError::from)?;
        state.bus.publish(&Event::session_closed(payload));
    }

    Ok(Json(json!({
        "deleted": true,
        "tmux_killed": tmux_killed,
        "threads_archived": threads_archived,
    })))
}

/// Archive or delete platform threads per configuration, returning the
/// platforms that were cleaned.
async fn cleanup_threads(state: &AppState, session: &Session) -> Vec<&'static str> {
    let mut cleaned = Vec::new();

    if let Some(thread_id) = session.discord_thread_id.as_deref() {
        if state.platform.has_discord() {
            let result = match state.config.thread_cleanup {
                ThreadCleanup::Archive => state.platform.archive_discord_thread(thread_id).await,
                ThreadCleanup::Delete => state.platform.delete_discord_thread(thread_id).await,
            };
            if result.is_ok() {
                let _ = state.session_repo.set_archived(&session.name, "discord").await;
                cleaned.push("discord");
            }
        }
    }

    if let Some(thread_ts) = session.slack_thread_ts.as_deref() {
        if state.platform.has_slack() {
            let channel = session
                .slack_channel_id
                .as_deref()
                .unwrap_or_else(|| state.platform.slack_channel());
            let result = match state.config.thread_cleanup {
                ThreadCleanup::Archive => {
                    state.platform.archive_slack_thread(channel, thread_ts).await
                }
                ThreadCleanup::Delete => {
                    state.platform.delete_slack_thread(channel, thread_ts).await
                }
            };
            if result.is_ok() {
                let _ = state.session_repo.set_archived(&session.name, "slack").await;
                cleaned.push("slack");
            }
        }
    }

    cleaned
}

#[derive(Debug, Deserialize)]
pub struct PatchBody {
    agent_type: Option<String>,
    working_dir: Option<String>,
    status: Option<String>,
}

/// `PATCH /api/sessions/{name}` — metadata patches; clients own the
/// orphan/unreachable statuses.
pub async fn patch_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Result<Json<PatchBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Ok(Json(body)) = body else {
        return Err(ApiError::bad_request("INVALID_JSON", "Request body must be JSON"));
    };
    require_session(&state, &name).await?;

    let agent_type = match body.agent_type.as_deref() {
        None => None,
        Some(raw) => {
            if !matches!(raw, "claude" | "codex" | "gemini" | "other" | "unknown") {
                return Err(ApiError::bad_request(
                    "INVALID_INPUT",
                    format!("Unknown agent_type: {raw}"),
                ));
            }
            Some(AgentKind::parse(raw))
        }
    };
    let status = match body.status.as_deref() {
        None => None,
        Some(raw) => Some(SessionStatus::parse(raw).ok_or_else(|| {
            ApiError::bad_request("INVALID_STATUS", format!("Unknown status: {raw}"))
        })?),
    };

    if agent_type.is_none() && body.working_dir.is_none() && status.is_none() {
        return Err(ApiError::bad_request("NO_UPDATES", "No updatable fields provided"));
    }

    state
        .session_repo
        .patch(&name, agent_type, body.working_dir.as_deref())
        .await?;
    if let Some(status) = status {
        let before = require_session(&state, &name).await?.status;
        state.session_repo.set_status(&name, status).await?;
        if before != status {
            if let Some(updated) = state.session_repo.get(&name).await? {
                let payload = serde_json::to_value(&updated).map_err(crate::AppError::from)?;
                state.bus.publish(&Event::session_status_changed(
                    payload,
                    before.as_str(),
                    status.as_str(),
                ));
            }
        }
    }

    let session = require_session(&state, &name).await?;
    let payload = serde_json::to_value(&session).map_err(crate::AppError::from)?;
    state.bus.publish(&Event::session_updated(payload.clone()));
    Ok(Json(json!({ "session": payload })))
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteBody {
    names: Option<Vec<String>>,
}

/// `POST /api/sessions/bulk-delete` — close up to 20 sessions at once.
pub async fn bulk_delete_sessions(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BulkDeleteBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Ok(Json(body)) = body else {
        return Err(ApiError::bad_request("INVALID_JSON", "Request body must be JSON"));
    };
    let names = body.names.unwrap_or_default();
    if names.is_empty() {
        return Err(ApiError::bad_request("MISSING_NAME", "names is required"));
    }
    if names.len() > 20 {
        return Err(ApiError::bad_request(
            "INVALID_INPUT",
            "At most 20 names per bulk delete",
        ));
    }

    let mut deleted = Vec::new();
    let mut missing = Vec::new();
    for name in names {
        if !is_valid_session_name(&name) {
            return Err(ApiError::bad_request(
                "INVALID_NAME",
                format!("Invalid session name '{name}'"),
            ));
        }
        match state.session_repo.get(&name).await? {
            Some(session) => {
                let (_killed, _host) = state.sessions.kill(&name).await;
                cleanup_threads(&state, &session).await;
                state.session_repo.set_status(&name, SessionStatus::Closed).await?;
                if let Some(closed) = state.session_repo.get(&name).await? {
                    let payload =
                        serde_json::to_value(&closed).map_err(crate::AppError::from)?;
                    state.bus.publish(&Event::session_closed(payload));
                }
                deleted.push(name);
            }
            None => missing.push(name),
        }
    }

    Ok(Json(json!({ "deleted": deleted, "missing": missing })))
}

#[derive(Debug, Deserialize)]
pub struct SendBody {
    message: Option<String>,
}

/// `POST /api/sessions/{name}/send` — type a message into the session.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Result<Json<SendBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Ok(Json(body)) = body else {
        return Err(ApiError::bad_request("INVALID_JSON", "Request body must be JSON"));
    };
    let message = body.message.unwrap_or_default().trim().to_owned();
    if message.is_empty() {
        return Err(ApiError::bad_request("MISSING_MESSAGE", "Message text is required"));
    }

    let Some(host) = state.sessions.find_host(&name).await else {
        return Err(ApiError::not_found(
            "SESSION_NOT_FOUND",
            format!("tmux session '{name}' not found on any host"),
        ));
    };

    if !state.sessions.send(&host, &name, &message).await {
        return Err(ApiError::internal(
            "SEND_FAILED",
            "Failed to send message to tmux session",
        ));
    }

    Ok(Json(json!({ "sent": true, "host": host })))
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

/// `GET /api/sessions/{name}/messages` — paginated message history.
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Json<Value>> {
    require_session(&state, &name).await?;
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let (messages, total) = state.message_repo.list_for_session(&name, limit, offset).await?;
    Ok(Json(json!({
        "messages": messages,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

/// `POST /api/sessions/{name}/sync` — pull platform messages now.
pub async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let session = require_session(&state, &name).await?;

    let mut ingested = 0;
    if state.platform.has_discord() {
        if let Some(thread_id) = session.discord_thread_id.as_deref() {
            let bot = state.platform.discord_bot_user_id().await;
            let after = state
                .message_repo
                .latest_source_id(&name, crate::models::message::MessageSource::Discord)
                .await?;
            let batch = state
                .platform
                .fetch_all_discord_messages(thread_id, after.as_deref())
                .await;
            ingested += state
                .messages
                .ingest_discord_batch(&name, &batch, bot.as_deref())
                .await?;
        }
    }
    if state.platform.has_slack() {
        if let Some(thread_ts) = session.slack_thread_ts.as_deref() {
            let channel = session
                .slack_channel_id
                .as_deref()
                .unwrap_or_else(|| state.platform.slack_channel());
            let bot = state.platform.slack_bot_user_id().await;
            let after = state
                .message_repo
                .latest_source_id(&name, crate::models::message::MessageSource::Slack)
                .await?;
            let batch = state
                .platform
                .fetch_all_slack_replies(channel, thread_ts, after.as_deref())
                .await;
            ingested += state
                .messages
                .ingest_slack_batch(&name, &batch, bot.as_deref())
                .await?;
        }
    }

    Ok(Json(json!({ "synced": true, "ingested": ingested })))
}

/// `POST /api/sessions/{name}/ingest` — tail the agent transcript now.
pub async fn trigger_transcript_ingest(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let session = require_session(&state, &name).await?;
    let Some(host) = session.host.as_deref() else {
        return Err(ApiError::not_found(
            "SESSION_NOT_FOUND",
            format!("Session '{name}' has no host"),
        ));
    };

    let ingested = state
        .transcripts
        .ingest_for_session(host, &name, session.working_dir.as_deref())
        .await?;
    Ok(Json(json!({ "ingested": ingested })))
}

/// `GET /api/sessions/{name}/export` — full session record with every
/// message, for offline archival.
pub async fn export_session(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let session = require_session(&state, &name).await?;
    let messages = state.message_repo.list_all_for_session(&name).await?;
    Ok(Json(json!({
        "session": session,
        "messages": messages,
        "exported_at": chrono::Utc::now().to_rfc3339(),
    })))
}

async fn require_session(state: &AppState, name: &str) -> ApiResult<Session> {
    state
        .session_repo
        .get(name)
        .await?
        .ok_or_else(|| ApiError::not_found("NOT_FOUND", format!("Session '{name}' not found")))
}
