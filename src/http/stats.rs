//! Aggregate dashboard statistics.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::error::ApiError;
use super::AppState;

const SESSION_STATUSES: [&str; 5] = ["active", "idle", "closed", "orphan", "unreachable"];

/// `GET /api/stats` — session/message counts, hosts, platform flags.
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let mut status_counts: BTreeMap<&str, i64> =
        SESSION_STATUSES.iter().map(|s| (*s, 0)).collect();
    let mut total_sessions = 0;
    for (status, count) in state.session_repo.status_counts().await? {
        total_sessions += count;
        if let Some(entry) = status_counts.get_mut(status.as_str()) {
            *entry = count;
        }
    }

    let (total_messages, recent_messages) = state.message_repo.totals().await?;
    let hosts = state.session_repo.active_hosts().await?;

    let mut sessions = json!({ "total": total_sessions });
    if let Some(map) = sessions.as_object_mut() {
        for (status, count) in status_counts {
            map.insert(status.to_owned(), json!(count));
        }
    }

    Ok(Json(json!({
        "sessions": sessions,
        "messages": { "total": total_messages, "last_24h": recent_messages },
        "hosts": hosts,
        "configured_hosts": state.config.ssh_hosts,
        "platforms": {
            "discord": state.config.has_discord(),
            "slack": state.config.has_slack(),
        },
    })))
}
