//! Dashboard webhook and REST client used by the bridges.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Fire-and-forget webhook deadline.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for `!queue` proxy calls.
const API_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the control plane's webhook and queue endpoints. A missing
/// base URL silently disables every call.
#[derive(Clone)]
pub struct DashboardClient {
    http: reqwest::Client,
    base_url: String,
}

impl DashboardClient {
    /// Build the client. `base_url` may be empty (dashboard not
    /// configured).
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Whether a dashboard URL is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    /// POST an event to `/api/hooks/event`. Fire-and-forget: failures
    /// are logged and swallowed.
    pub async fn emit_event(&self, event: &Value) {
        if !self.is_configured() {
            return;
        }
        let url = format!("{}/api/hooks/event", self.base_url);
        match self
            .http
            .post(&url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(event)
            .send()
            .await
        {
            Ok(response) if response.status().is_client_error() || response.status().is_server_error() => {
                warn!(status = %response.status(), "dashboard webhook rejected");
            }
            Ok(_) => debug!("dashboard webhook delivered"),
            Err(err) => warn!(%err, "dashboard webhook failed"),
        }
    }

    /// Emit the `message.relayed` event for a forwarded utterance.
    pub async fn emit_message_relayed(
        &self,
        session_name: &str,
        platform: &str,
        content: &str,
        source_id: &str,
        source_author: &str,
    ) {
        self.emit_event(&json!({
            "type": "message.relayed",
            "session_name": session_name,
            "platform": platform,
            "content": content,
            "role": "user",
            "source_id": source_id,
            "source_author": source_author,
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .await;
    }

    /// Emit the `session.killed` event after `!kill`.
    pub async fn emit_session_killed(
        &self,
        session_name: &str,
        platform: &str,
        host: &str,
        tmux_killed: bool,
        thread_cleanup: &str,
    ) {
        self.emit_event(&json!({
            "type": "session.killed",
            "session_name": session_name,
            "platform": platform,
            "host": host,
            "tmux_killed": tmux_killed,
            "thread_cleanup": thread_cleanup,
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .await;
    }

    /// Call a control-plane REST endpoint, returning the parsed body or
    /// `None` on any failure.
    pub async fn api(&self, method: reqwest::Method, path: &str, body: Option<&Value>) -> Option<Value> {
        if !self.is_configured() {
            return None;
        }
        let url = format!("{}{path}", self.base_url);
        let mut request = self.http.request(method.clone(), &url).timeout(API_TIMEOUT);
        if let Some(body) = body {
            request = request.json(body);
        }
        match request.send().await {
            Ok(response) if response.status().is_success() => response.json().await.ok(),
            Ok(response) => {
                warn!(%method, path, status = %response.status(), "dashboard api call rejected");
                None
            }
            Err(err) => {
                warn!(%method, path, %err, "dashboard api call failed");
                None
            }
        }
    }
}
