//! Provider quota monitoring and the deferred command queue.
//!
//! Each poll issues a minimal API call whose only purpose is to return
//! rate-limit headers cheaply, records a snapshot, and compares it to
//! the previous comparable snapshot to detect limit/reset transitions.
//! On reset the pending command queue drains through the session
//! service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use crate::bus::{Event, EventBus};
use crate::models::queue::QueueStatus;
use crate::models::usage::UsageSnapshot;
use crate::persistence::queue_repo::QueueRepo;
use crate::persistence::usage_repo::UsageRepo;
use crate::services::session::SessionService;
use crate::Result;

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const OPENAI_API_BASE: &str = "https://api.openai.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic rate-limit headers mapped to snapshot fields.
const ANTHROPIC_HEADERS: [(&str, &str); 12] = [
    ("anthropic-ratelimit-requests-limit", "requests_limit"),
    ("anthropic-ratelimit-requests-remaining", "requests_remaining"),
    ("anthropic-ratelimit-requests-reset", "requests_reset"),
    ("anthropic-ratelimit-input-tokens-limit", "input_tokens_limit"),
    (
        "anthropic-ratelimit-input-tokens-remaining",
        "input_tokens_remaining",
    ),
    ("anthropic-ratelimit-input-tokens-reset", "input_tokens_reset"),
    (
        "anthropic-ratelimit-output-tokens-limit",
        "output_tokens_limit",
    ),
    (
        "anthropic-ratelimit-output-tokens-remaining",
        "output_tokens_remaining",
    ),
    (
        "anthropic-ratelimit-output-tokens-reset",
        "output_tokens_reset",
    ),
    ("anthropic-ratelimit-tokens-limit", "tokens_limit"),
    ("anthropic-ratelimit-tokens-remaining", "tokens_remaining"),
    ("anthropic-ratelimit-tokens-reset", "tokens_reset"),
];

/// OpenAI rate-limit headers mapped to snapshot fields.
const OPENAI_HEADERS: [(&str, &str); 6] = [
    ("x-ratelimit-limit-requests", "requests_limit"),
    ("x-ratelimit-remaining-requests", "requests_remaining"),
    ("x-ratelimit-reset-requests", "requests_reset"),
    ("x-ratelimit-limit-tokens", "tokens_limit"),
    ("x-ratelimit-remaining-tokens", "tokens_remaining"),
    ("x-ratelimit-reset-tokens", "tokens_reset"),
];

/// Quota monitor plus deferred command queue.
#[derive(Clone)]
pub struct UsageService {
    http: reqwest::Client,
    bus: Arc<EventBus>,
    snapshots: UsageRepo,
    queue: QueueRepo,
    sessions: SessionService,
    anthropic_api_key: String,
    openai_api_key: String,
    poll_model_anthropic: String,
    poll_model_openai: String,
    enable_command_queue: bool,
    retention_hours: u32,
}

impl UsageService {
    /// Build the service.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be built.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<EventBus>,
        snapshots: UsageRepo,
        queue: QueueRepo,
        sessions: SessionService,
        anthropic_api_key: String,
        openai_api_key: String,
        poll_model_anthropic: String,
        poll_model_openai: String,
        enable_command_queue: bool,
        retention_hours: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|err| crate::AppError::Config(format!("http client: {err}")))?;
        Ok(Self {
            http,
            bus,
            snapshots,
            queue,
            sessions,
            anthropic_api_key,
            openai_api_key,
            poll_model_anthropic,
            poll_model_openai,
            enable_command_queue,
            retention_hours,
        })
    }

    /// Providers with configured credentials.
    #[must_use]
    pub fn providers(&self) -> Vec<&'static str> {
        let mut providers = Vec::new();
        if !self.anthropic_api_key.is_empty() {
            providers.push("anthropic");
        }
        if !self.openai_api_key.is_empty() {
            providers.push("openai");
        }
        providers
    }

    /// Whether the deferred command queue is enabled.
    #[must_use]
    pub fn command_queue_enabled(&self) -> bool {
        self.enable_command_queue
    }

    /// Snapshot retention horizon in hours.
    #[must_use]
    pub fn retention_hours(&self) -> u32 {
        self.retention_hours
    }

    /// The queue repository, for the HTTP layer.
    #[must_use]
    pub fn queue(&self) -> &QueueRepo {
        &self.queue
    }

    /// The snapshot repository, for the HTTP layer.
    #[must_use]
    pub fn snapshots(&self) -> &UsageRepo {
        &self.snapshots
    }

    // ── Polling ─────────────────────────────────────────

    /// Issue the minimal poll call for a provider and parse its headers.
    /// Transport failure yields a snapshot with status code 0 and error
    /// text rather than an error.
    pub async fn poll_provider(&self, provider: &str) -> UsageSnapshot {
        let mut snapshot = UsageSnapshot {
            provider: provider.to_owned(),
            polled_at: Some(Utc::now()),
            ..UsageSnapshot::default()
        };

        let result = match provider {
            "anthropic" => self.poll_anthropic(&mut snapshot).await,
            "openai" => self.poll_openai(&mut snapshot).await,
            other => {
                snapshot.error_message = Some(format!("unknown provider: {other}"));
                return snapshot;
            }
        };

        if let Err(err) = result {
            snapshot.poll_status_code = 0;
            snapshot.error_message = Some(truncate(&err.to_string(), 500));
            error!(provider, %err, "usage poll failed");
        }
        snapshot
    }

    async fn poll_anthropic(&self, snapshot: &mut UsageSnapshot) -> Result<()> {
        snapshot.poll_model = Some(self.poll_model_anthropic.clone());
        let response = self
            .http
            .post(format!("{ANTHROPIC_API_BASE}/v1/messages/count_tokens"))
            .header("x-api-key", &self.anthropic_api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&json!({
                "model": self.poll_model_anthropic,
                "messages": [{ "role": "user", "content": "hi" }],
            }))
            .send()
            .await?;

        snapshot.poll_status_code = i64::from(response.status().as_u16());
        apply_headers(snapshot, response.headers(), &ANTHROPIC_HEADERS);

        if !matches!(snapshot.poll_status_code, 200 | 429) {
            let body = response.text().await.unwrap_or_default();
            snapshot.error_message = Some(format!(
                "HTTP {}: {}",
                snapshot.poll_status_code,
                truncate(&body, 200)
            ));
        }
        Ok(())
    }

    async fn poll_openai(&self, snapshot: &mut UsageSnapshot) -> Result<()> {
        snapshot.poll_model = Some(self.poll_model_openai.clone());
        let response = self
            .http
            .post(format!("{OPENAI_API_BASE}/v1/chat/completions"))
            .header("Authorization", format!("Bearer {}", self.openai_api_key))
            .json(&json!({
                "model": self.poll_model_openai,
                "messages": [{ "role": "user", "content": "hi" }],
                "max_tokens": 1,
            }))
            .send()
            .await?;

        snapshot.poll_status_code = i64::from(response.status().as_u16());
        apply_headers(snapshot, response.headers(), &OPENAI_HEADERS);

        if !matches!(snapshot.poll_status_code, 200 | 429) {
            let body = response.text().await.unwrap_or_default();
            snapshot.error_message = Some(format!(
                "HTTP {}: {}",
                snapshot.poll_status_code,
                truncate(&body, 200)
            ));
        }
        Ok(())
    }

    // ── Transition handling ─────────────────────────────

    /// Persist a snapshot, publish usage events, and drain the queue on
    /// reset. Returns the limit kinds that reset.
    ///
    /// Snapshots with status code 0 are persisted for the record but
    /// produce no events: a failed poll says nothing about the limits.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failure.
    pub async fn process_snapshot(
        &self,
        snapshot: &UsageSnapshot,
        previous: Option<&UsageSnapshot>,
    ) -> Result<Vec<&'static str>> {
        self.snapshots.insert(snapshot).await?;

        if snapshot.poll_status_code == 0 {
            return Ok(Vec::new());
        }

        let payload = serde_json::to_value(snapshot)?;
        self.bus
            .publish(&Event::usage_updated(&snapshot.provider, payload.clone()));

        for kind in snapshot.kinds_at_limit() {
            warn!(provider = %snapshot.provider, kind, "rate limit reached");
            self.bus.publish(&Event::usage_limit_reached(
                &snapshot.provider,
                kind,
                payload.clone(),
            ));
        }

        let resets = match previous {
            Some(prior) => snapshot.kinds_reset_since(prior),
            None => Vec::new(),
        };
        for kind in &resets {
            info!(provider = %snapshot.provider, kind, "rate limit reset detected");
            self.bus
                .publish(&Event::usage_reset(&snapshot.provider, kind, payload.clone()));
        }

        if !resets.is_empty() && self.enable_command_queue {
            self.execute_pending().await?;
        }
        Ok(resets)
    }

    /// Most recent prior snapshot usable for reset comparison.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failure.
    pub async fn previous_snapshot(&self, provider: &str) -> Result<Option<UsageSnapshot>> {
        self.snapshots.latest_comparable(provider).await
    }

    // ── Command queue ───────────────────────────────────

    /// Enqueue a deferred command and publish `command.queued`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failure.
    pub async fn enqueue_command(
        &self,
        session_name: &str,
        host: &str,
        command: &str,
        priority: i64,
    ) -> Result<crate::models::queue::QueueEntry> {
        let entry = self
            .queue
            .enqueue(session_name, host, command, priority)
            .await?;
        self.bus
            .publish(&Event::command_queued(serde_json::to_value(&entry)?));
        Ok(entry)
    }

    /// Drain the pending set in (priority desc, created_at asc) order,
    /// sending each command into its session. Returns the processed
    /// entries with their final status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failure; individual send failures
    /// mark the entry failed and continue.
    pub async fn execute_pending(&self) -> Result<Vec<crate::models::queue::QueueEntry>> {
        let pending = self.queue.pending(50).await?;
        let mut processed = Vec::with_capacity(pending.len());

        for entry in pending {
            self.queue
                .set_status(entry.id, QueueStatus::Executing, None)
                .await?;

            let sent = self
                .sessions
                .send(&entry.host, &entry.session_name, &entry.command)
                .await;

            let final_status = if sent {
                self.queue
                    .set_status(entry.id, QueueStatus::Completed, None)
                    .await?;
                QueueStatus::Completed
            } else {
                self.queue
                    .set_status(entry.id, QueueStatus::Failed, Some("send to session failed"))
                    .await?;
                QueueStatus::Failed
            };

            if let Some(updated) = self.queue.get(entry.id).await? {
                let payload = serde_json::to_value(&updated)?;
                let event = if final_status == QueueStatus::Completed {
                    Event::command_executed(payload)
                } else {
                    Event::command_failed(payload)
                };
                self.bus.publish(&event);
                processed.push(updated);
            }
        }
        Ok(processed)
    }

    /// Queue entry counts per status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failure.
    pub async fn queue_stats(&self) -> Result<HashMap<String, i64>> {
        Ok(self.queue.stats().await?.into_iter().collect())
    }
}

fn apply_headers(
    snapshot: &mut UsageSnapshot,
    headers: &reqwest::header::HeaderMap,
    mapping: &[(&str, &str)],
) {
    for (header_name, field) in mapping {
        let Some(raw) = headers.get(*header_name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        if field.ends_with("_reset") {
            set_reset_field(snapshot, field, raw);
        } else if let Ok(value) = raw.parse::<i64>() {
            set_numeric_field(snapshot, field, value);
        }
    }
}

fn set_numeric_field(snapshot: &mut UsageSnapshot, field: &str, value: i64) {
    match field {
        "requests_limit" => snapshot.requests_limit = Some(value),
        "requests_remaining" => snapshot.requests_remaining = Some(value),
        "input_tokens_limit" => snapshot.input_tokens_limit = Some(value),
        "input_tokens_remaining" => snapshot.input_tokens_remaining = Some(value),
        "output_tokens_limit" => snapshot.output_tokens_limit = Some(value),
        "output_tokens_remaining" => snapshot.output_tokens_remaining = Some(value),
        "tokens_limit" => snapshot.tokens_limit = Some(value),
        "tokens_remaining" => snapshot.tokens_remaining = Some(value),
        _ => {}
    }
}

fn set_reset_field(snapshot: &mut UsageSnapshot, field: &str, value: &str) {
    let value = value.to_owned();
    match field {
        "requests_reset" => snapshot.requests_reset = Some(value),
        "input_tokens_reset" => snapshot.input_tokens_reset = Some(value),
        "output_tokens_reset" => snapshot.output_tokens_reset = Some(value),
        "tokens_reset" => snapshot.tokens_reset = Some(value),
        _ => {}
    }
}

fn truncate(text: &str, max: usize) -> String {
    let mut cut = text.len().min(max);
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_owned()
}
