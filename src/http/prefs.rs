//! User preferences and administrator settings over the kv table.
//!
//! Preferences live under the `pref:` key family with an enumerated key
//! set; settings live under `setting:` and split between user-writable
//! and runtime-derived read-only keys.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use super::error::ApiError;
use super::AppState;

const PREF_PREFIX: &str = "pref:";
const SETTING_PREFIX: &str = "setting:";

/// Preference defaults; the key set doubles as the allow-list.
const PREF_DEFAULTS: [(&str, &str); 7] = [
    ("theme", "dark"),
    ("sidebar_collapsed", "false"),
    ("message_font_size", "14"),
    ("notifications_enabled", "true"),
    ("auto_scroll", "true"),
    ("show_system_messages", "true"),
    ("compact_mode", "false"),
];

/// User-writable setting keys.
const WRITABLE_SETTINGS: [&str; 6] = [
    "dashboard_url",
    "ssh_hosts",
    "enable_session_poller",
    "poll_interval",
    "enable_jsonl_ingester",
    "jsonl_scan_interval",
];

fn pref_allowed(key: &str) -> bool {
    PREF_DEFAULTS.iter().any(|(name, _)| *name == key)
}

/// `GET /api/preferences` — all preferences merged with defaults.
pub async fn get_preferences(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let mut prefs: BTreeMap<String, String> = PREF_DEFAULTS
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect();
    for (key, value) in state.kv.list_prefix(PREF_PREFIX).await? {
        if pref_allowed(&key) {
            prefs.insert(key, value);
        }
    }
    Ok(Json(json!({ "preferences": prefs })))
}

/// `PUT /api/preferences` — merge provided preferences; unknown keys
/// are skipped.
pub async fn set_preferences(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Ok(Json(body)) = body else {
        return Err(ApiError::bad_request("INVALID_JSON", "Request body must be JSON"));
    };
    let Some(map) = body.as_object() else {
        return Err(ApiError::bad_request("INVALID_JSON", "Expected a JSON object"));
    };

    let mut updated = Vec::new();
    for (key, value) in map {
        if !pref_allowed(key) {
            continue;
        }
        let value = json_scalar_to_string(value);
        state.kv.set(&format!("{PREF_PREFIX}{key}"), &value).await?;
        updated.push(key.clone());
    }
    Ok(Json(json!({ "updated": updated })))
}

/// `GET /api/preferences/{key}`.
pub async fn get_preference(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !pref_allowed(&key) {
        return Err(ApiError::not_found(
            "UNKNOWN_KEY",
            format!("Unknown preference: {key}"),
        ));
    }
    let stored = state.kv.get(&format!("{PREF_PREFIX}{key}")).await?;
    let value = stored.unwrap_or_else(|| {
        PREF_DEFAULTS
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, default)| (*default).to_owned())
            .unwrap_or_default()
    });
    Ok(Json(json!({ "key": key, "value": value })))
}

/// `PUT /api/preferences/{key}` with body `{"value": ...}`.
pub async fn set_preference(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    if !pref_allowed(&key) {
        return Err(ApiError::not_found(
            "UNKNOWN_KEY",
            format!("Unknown preference: {key}"),
        ));
    }
    let Ok(Json(body)) = body else {
        return Err(ApiError::bad_request("INVALID_JSON", "Request body must be JSON"));
    };
    let value = body
        .get("value")
        .map(json_scalar_to_string)
        .unwrap_or_default();
    state.kv.set(&format!("{PREF_PREFIX}{key}"), &value).await?;
    Ok(Json(json!({ "key": key, "value": value })))
}

/// `GET /api/settings` — stored settings merged with runtime-derived
/// read-only values.
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let mut settings: BTreeMap<String, String> = BTreeMap::new();

    for (key, value) in state.kv.list_prefix(SETTING_PREFIX).await? {
        if WRITABLE_SETTINGS.contains(&key.as_str()) {
            settings.insert(key, value);
        }
    }

    let config = &state.config;
    settings
        .entry("ssh_hosts".into())
        .or_insert_with(|| config.ssh_hosts.join(","));
    settings
        .entry("dashboard_url".into())
        .or_insert_with(|| config.dashboard_url.clone());
    settings.insert(
        "enable_session_poller".into(),
        config.enable_session_poller.to_string(),
    );
    settings.insert("poll_interval".into(), config.poll_interval.to_string());
    settings.insert(
        "enable_jsonl_ingester".into(),
        config.enable_jsonl_ingester.to_string(),
    );
    settings.insert(
        "jsonl_scan_interval".into(),
        config.transcript_interval.to_string(),
    );

    // Runtime-derived, read-only.
    settings.insert(
        "discord_configured".into(),
        config.has_discord().to_string(),
    );
    settings.insert("slack_configured".into(), config.has_slack().to_string());

    Ok(Json(json!({ "settings": settings })))
}

/// `PUT /api/settings` — merge writable settings; read-only keys are
/// skipped.
pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Ok(Json(body)) = body else {
        return Err(ApiError::bad_request("INVALID_JSON", "Request body must be JSON"));
    };
    let Some(map) = body.as_object() else {
        return Err(ApiError::bad_request("INVALID_JSON", "Expected a JSON object"));
    };

    let mut updated = Vec::new();
    for (key, value) in map {
        if !WRITABLE_SETTINGS.contains(&key.as_str()) {
            continue;
        }
        let value = json_scalar_to_string(value);
        state
            .kv
            .set(&format!("{SETTING_PREFIX}{key}"), &value)
            .await?;
        updated.push(key.clone());
    }
    Ok(Json(json!({ "updated": updated })))
}

fn json_scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
