//! Full-text message search over the FTS5 index.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::message::MessageRole;

use super::error::ApiError;
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: Option<String>,
    session: Option<String>,
    role: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// `GET /api/messages/search` — ranked FTS search with snippets.
///
/// The raw query has inner double quotes doubled and is then wrapped in
/// quotes, so user input is a single FTS term rather than FTS syntax.
pub async fn search_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, ApiError> {
    let q = query.q.unwrap_or_default().trim().to_owned();
    if q.len() < 2 {
        return Err(ApiError::bad_request(
            "BAD_REQUEST",
            "Query must be at least 2 characters",
        ));
    }

    let fts_query = format!("\"{}\"", q.replace('"', "\"\""));

    let session = query.session.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty());
    let role = query
        .role
        .as_deref()
        .filter(|r| matches!(*r, "user" | "assistant" | "system"))
        .map(MessageRole::parse);
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let (results, total) = state
        .message_repo
        .search(&fts_query, session.as_deref(), role, limit, offset)
        .await?;

    Ok(Json(json!({
        "results": results,
        "total": total,
        "query": q,
        "limit": limit,
        "offset": offset,
    })))
}
