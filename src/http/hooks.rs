//! Bridge webhook receiver.
//!
//! Fire-and-forget contract: bridges never retry on dashboard errors,
//! so this endpoint answers 202 regardless of downstream outcome.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};
use tracing::error;

use super::AppState;

/// `POST /api/hooks/event` — ingest a bridge event. No auth; always
/// 202 once the body parses as JSON.
pub async fn receive_event(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> impl IntoResponse {
    let Ok(Json(event)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": { "code": "INVALID_JSON", "message": "Request body must be JSON" }
            })),
        );
    };

    if let Err(err) = state.messages.ingest_bridge_event(&event).await {
        error!(%err, "bridge event ingestion failed");
    }

    (StatusCode::ACCEPTED, Json(json!({ "accepted": true })))
}
