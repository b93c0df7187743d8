//! Usage monitoring and command queue endpoints.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::queue::QueueStatus;
use crate::services::usage::UsageService;

use super::error::ApiError;
use super::AppState;

fn require_usage(state: &AppState) -> Result<&UsageService, ApiError> {
    state
        .usage
        .as_ref()
        .ok_or_else(|| ApiError::disabled("Usage monitoring is not enabled"))
}

/// `GET /api/usage` — latest snapshot per provider plus queue stats.
pub async fn get_current(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let usage = require_usage(&state)?;

    let mut snapshots = serde_json::Map::new();
    for snapshot in usage.snapshots().latest_per_provider().await? {
        snapshots.insert(
            snapshot.provider.clone(),
            serde_json::to_value(&snapshot).map_err(crate::AppError::from)?,
        );
    }
    let queue_stats = usage.queue_stats().await?;

    Ok(Json(json!({
        "usage": snapshots,
        "queue_stats": queue_stats,
    })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    provider: Option<String>,
    since: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// `GET /api/usage/history` — paginated snapshot history.
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let usage = require_usage(&state)?;
    let limit = query.limit.unwrap_or(60).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);
    let provider = query.provider.filter(|p| !p.is_empty());
    let since = query.since.filter(|s| !s.is_empty());

    let (snapshots, total) = usage
        .snapshots()
        .history(provider.as_deref(), since.as_deref(), limit, offset)
        .await?;

    Ok(Json(json!({
        "snapshots": snapshots,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    hours: Option<i64>,
    provider: Option<String>,
}

/// `GET /api/usage/summary` — aggregates over a time window.
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<Value>, ApiError> {
    let usage = require_usage(&state)?;
    let hours = query.hours.unwrap_or(24).clamp(1, 168);
    let provider = query.provider.filter(|p| !p.is_empty());

    let summary = usage.snapshots().summary(hours, provider.as_deref()).await?;
    Ok(Json(json!({ "summary": summary, "hours": hours })))
}

#[derive(Debug, Deserialize)]
pub struct QueueListQuery {
    status: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// `GET /api/usage/queue` — list queue entries.
pub async fn list_queue(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QueueListQuery>,
) -> Result<Json<Value>, ApiError> {
    let usage = require_usage(&state)?;
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(QueueStatus::parse(raw).ok_or_else(|| {
            ApiError::bad_request("INVALID_STATUS", format!("Unknown status: {raw}"))
        })?),
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let (commands, total) = usage.queue().list(status, limit, offset).await?;
    Ok(Json(json!({
        "commands": commands,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueBody {
    session_name: Option<String>,
    command: Option<String>,
    host: Option<String>,
    priority: Option<i64>,
}

/// `POST /api/usage/queue` — enqueue a deferred command.
pub async fn enqueue_command(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EnqueueBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let usage = require_usage(&state)?;
    let Ok(Json(body)) = body else {
        return Err(ApiError::bad_request("INVALID_JSON", "Request body must be JSON"));
    };

    let session_name = body.session_name.unwrap_or_default().trim().to_owned();
    if session_name.is_empty() {
        return Err(ApiError::bad_request("MISSING_SESSION", "session_name is required"));
    }
    let command = body.command.unwrap_or_default().trim().to_owned();
    if command.is_empty() {
        return Err(ApiError::bad_request("MISSING_COMMAND", "command is required"));
    }

    let host = match body.host.filter(|h| !h.trim().is_empty()) {
        Some(host) => host.trim().to_owned(),
        None => {
            let session = state.session_repo.get(&session_name).await?;
            session.and_then(|s| s.host).ok_or_else(|| {
                ApiError::not_found(
                    "SESSION_NOT_FOUND",
                    format!("Session '{session_name}' not found or has no host"),
                )
            })?
        }
    };

    let entry = usage
        .enqueue_command(&session_name, &host, &command, body.priority.unwrap_or(0))
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "command": entry }))))
}

/// `DELETE /api/usage/queue/{id}` — cancel a pending command.
pub async fn cancel_command(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let usage = require_usage(&state)?;
    let id: i64 = id
        .parse()
        .map_err(|_| ApiError::bad_request("INVALID_ID", "Command ID must be an integer"))?;

    usage.queue().cancel(id).await.map_err(|err| match err {
        crate::AppError::NotFound(_) => {
            ApiError::not_found("NOT_FOUND", "Command not found or not in pending status")
        }
        other => other.into(),
    })?;
    Ok(Json(json!({ "cancelled": true, "id": id })))
}

/// `POST /api/usage/queue/execute` — drain the pending set now.
pub async fn execute_queue(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let usage = require_usage(&state)?;
    let results = usage.execute_pending().await?;
    Ok(Json(json!({
        "executed": results.len(),
        "results": results,
    })))
}
