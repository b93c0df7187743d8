//! Message ingestion and deduplication.
//!
//! Three entry points feed the message table: bridge webhook events,
//! platform batch pulls, and agent transcript lines. All three converge
//! on insert-or-ignore keyed by a content-derived fingerprint, so replays
//! are the common-case idempotent path rather than a failure.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::bus::{Event, EventBus};
use crate::models::message::{MessageRole, MessageSource, NewMessage};
use crate::persistence::event_repo::EventRepo;
use crate::persistence::message_repo::MessageRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::Result;

/// Compute the deduplication fingerprint for a message.
///
/// With a platform-stable identifier the key is `{source}:{source_id}`,
/// globally unique per platform. Without one it degrades to
/// content-addressed identity: `{session}:{source}:{content[:200]}`
/// (byte prefix, backed off to a char boundary).
#[must_use]
pub fn dedup_hash(
    session_name: &str,
    source: MessageSource,
    source_id: Option<&str>,
    content: &str,
) -> String {
    let key = match source_id {
        Some(id) if !id.is_empty() => format!("{}:{id}", source.as_str()),
        _ => {
            let mut cut = content.len().min(200);
            while cut > 0 && !content.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{session_name}:{}:{}", source.as_str(), &content[..cut])
        }
    };
    let digest = Sha256::digest(key.as_bytes());
    format!("{digest:x}")
}

/// Short line hash used as a transcript pseudo source-id and as the tail
/// high-watermark.
#[must_use]
pub fn line_hash(line: &str) -> String {
    let digest = Sha256::digest(line.as_bytes());
    let hex = format!("{digest:x}");
    hex[..32].to_owned()
}

/// Handles message ingestion from all sources.
#[derive(Clone)]
pub struct MessageService {
    bus: Arc<EventBus>,
    sessions: SessionRepo,
    messages: MessageRepo,
    audit: EventRepo,
    /// Content ceiling for transcript-derived bodies.
    max_transcript_content: usize,
}

impl MessageService {
    #[must_use]
    pub fn new(
        bus: Arc<EventBus>,
        sessions: SessionRepo,
        messages: MessageRepo,
        audit: EventRepo,
        max_transcript_content: usize,
    ) -> Self {
        Self {
            bus,
            sessions,
            messages,
            audit,
            max_transcript_content,
        }
    }

    /// Ingest an event pushed by a bridge webhook.
    ///
    /// Typing transitions are re-published on the bus and returned early.
    /// Unknown sessions and empty content are warning-level skips, not
    /// errors — the webhook endpoint answers 202 regardless.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` only on store failure; callers at the
    /// webhook layer swallow and log it.
    pub async fn ingest_bridge_event(&self, event: &Value) -> Result<()> {
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
        let session_name = event
            .get("session_name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();

        if event_type == "typing.start" || event_type == "typing.stop" {
            if !session_name.is_empty() {
                let typing = if event_type == "typing.start" {
                    Event::typing_start(session_name)
                } else {
                    Event::typing_stop(session_name)
                };
                self.bus.publish(&typing);
            }
            return Ok(());
        }

        if session_name.is_empty() {
            warn!("bridge event missing session_name; ignoring");
            return Ok(());
        }
        if self.sessions.get(session_name).await?.is_none() {
            debug!(session_name, "bridge event for unknown session; ignoring");
            return Ok(());
        }

        let content = event
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_owned();

        if !content.is_empty() {
            let platform = event
                .get("platform")
                .and_then(Value::as_str)
                .unwrap_or("hook");
            let source = MessageSource::parse(platform);
            let role = MessageRole::parse(
                event.get("role").and_then(Value::as_str).unwrap_or("user"),
            );
            let source_id = event
                .get("source_id")
                .or_else(|| event.get("external_id"))
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_owned);
            let source_author = event
                .get("source_author")
                .and_then(Value::as_str)
                .map(str::to_owned);
            let timestamp = event
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(parse_iso_timestamp)
                .unwrap_or_else(Utc::now);

            let message = NewMessage {
                session_name: session_name.to_owned(),
                role,
                content: content.clone(),
                source,
                source_id: source_id.clone(),
                source_author,
                timestamp,
                dedup_hash: dedup_hash(session_name, source, source_id.as_deref(), &content),
            };

            if self.messages.insert_or_ignore(&message).await? {
                info!(session_name, source = source.as_str(), "ingested bridge message");
                let mut preview = content;
                if preview.len() > 200 {
                    let mut cut = 200;
                    while cut > 0 && !preview.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    preview.truncate(cut);
                }
                self.bus.publish(&Event::message_new(json!({
                    "session_name": session_name,
                    "role": role.as_str(),
                    "content": preview,
                    "source": source.as_str(),
                    "timestamp": message.timestamp.to_rfc3339(),
                })));
            }
        }

        // The audit row is appended for every bridge event, duplicate or
        // not, so the activity feed reflects what the bridges saw.
        let audit_type = if event_type.is_empty() {
            "bridge.event"
        } else {
            event_type
        };
        self.audit
            .append(audit_type, Some(session_name), event)
            .await?;
        Ok(())
    }

    /// Ingest a batch of Discord thread messages. Returns the number of
    /// fresh rows.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failure.
    pub async fn ingest_discord_batch(
        &self,
        session_name: &str,
        batch: &[Value],
        bot_user_id: Option<&str>,
    ) -> Result<u64> {
        let mut inserted = 0;
        for message in batch {
            let content = message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim();
            if content.is_empty() {
                continue;
            }
            let author = message.get("author").cloned().unwrap_or(Value::Null);
            let author_id = author.get("id").and_then(Value::as_str).unwrap_or("");
            let is_bot = author.get("bot").and_then(Value::as_bool).unwrap_or(false);
            let role = if is_bot {
                if Some(author_id) == bot_user_id {
                    MessageRole::Assistant
                } else {
                    MessageRole::System
                }
            } else {
                MessageRole::User
            };

            let source_id = message
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_owned);
            let timestamp = message
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(parse_iso_timestamp)
                .unwrap_or_else(Utc::now);
            let source_author = author
                .get("username")
                .and_then(Value::as_str)
                .map(str::to_owned);

            let new_message = NewMessage {
                session_name: session_name.to_owned(),
                role,
                content: content.to_owned(),
                source: MessageSource::Discord,
                source_id: source_id.clone(),
                source_author,
                timestamp,
                dedup_hash: dedup_hash(
                    session_name,
                    MessageSource::Discord,
                    source_id.as_deref(),
                    content,
                ),
            };
            if self.messages.insert_or_ignore(&new_message).await? {
                inserted += 1;
                self.publish_new(&new_message);
            }
        }
        Ok(inserted)
    }

    /// Ingest a batch of Slack thread replies. Returns the number of
    /// fresh rows.
    ///
    /// Role detection is asymmetric with Discord on purpose: a message
    /// with `bot_id` or `subtype == "bot_message"` is assistant iff the
    /// sending user matches the own-bot identity, else system.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failure.
    pub async fn ingest_slack_batch(
        &self,
        session_name: &str,
        batch: &[Value],
        bot_user_id: Option<&str>,
    ) -> Result<u64> {
        let mut inserted = 0;
        for message in batch {
            let content = message
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim();
            if content.is_empty() {
                continue;
            }
            let user = message.get("user").and_then(Value::as_str).unwrap_or("");
            let is_bot = message.get("bot_id").is_some()
                || message.get("subtype").and_then(Value::as_str) == Some("bot_message");
            let role = if is_bot {
                if !user.is_empty() && Some(user) == bot_user_id {
                    MessageRole::Assistant
                } else {
                    MessageRole::System
                }
            } else {
                MessageRole::User
            };

            let ts = message.get("ts").and_then(Value::as_str).unwrap_or("");
            let timestamp = parse_slack_ts(ts).unwrap_or_else(Utc::now);
            let source_id = if ts.is_empty() {
                None
            } else {
                Some(ts.to_owned())
            };

            let new_message = NewMessage {
                session_name: session_name.to_owned(),
                role,
                content: content.to_owned(),
                source: MessageSource::Slack,
                source_id: source_id.clone(),
                source_author: if user.is_empty() {
                    None
                } else {
                    Some(user.to_owned())
                },
                timestamp,
                dedup_hash: dedup_hash(
                    session_name,
                    MessageSource::Slack,
                    source_id.as_deref(),
                    content,
                ),
            };
            if self.messages.insert_or_ignore(&new_message).await? {
                inserted += 1;
                self.publish_new(&new_message);
            }
        }
        Ok(inserted)
    }

    /// Ingest parsed transcript lines. Returns the number of fresh rows.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failure.
    pub async fn ingest_transcript_lines(
        &self,
        session_name: &str,
        lines: &[String],
    ) -> Result<u64> {
        let mut inserted = 0;
        for line in lines {
            let Some(parsed) = parse_transcript_line(line, self.max_transcript_content) else {
                continue;
            };
            let source_id = line_hash(line);
            let new_message = NewMessage {
                session_name: session_name.to_owned(),
                role: parsed.role,
                content: parsed.content.clone(),
                source: MessageSource::Transcript,
                source_id: Some(source_id.clone()),
                source_author: Some(
                    match parsed.role {
                        MessageRole::Assistant => "claude",
                        _ => "user",
                    }
                    .to_owned(),
                ),
                timestamp: parsed.timestamp.unwrap_or_else(Utc::now),
                dedup_hash: dedup_hash(
                    session_name,
                    MessageSource::Transcript,
                    Some(&source_id),
                    &parsed.content,
                ),
            };
            if self.messages.insert_or_ignore(&new_message).await? {
                inserted += 1;
                self.publish_new(&new_message);
            }
        }
        Ok(inserted)
    }

    fn publish_new(&self, message: &NewMessage) {
        self.bus.publish(&Event::message_new(json!({
            "session_name": message.session_name,
            "role": message.role.as_str(),
            "content": message.content,
            "source": message.source.as_str(),
            "timestamp": message.timestamp.to_rfc3339(),
        })));
    }
}

/// One parsed transcript entry.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Parse one newline-delimited transcript line into a visible message.
///
/// Only `user` and `assistant` entries contribute; of their content
/// blocks only `text`-typed ones are kept (`tool_use` / `tool_result`
/// are the agent's internal traffic). Returns `None` for anything else.
#[must_use]
pub fn parse_transcript_line(line: &str, max_content: usize) -> Option<TranscriptEntry> {
    let parsed: Value = serde_json::from_str(line.trim()).ok()?;
    let entry_type = parsed.get("type").and_then(Value::as_str)?;

    let (role, content) = match entry_type {
        "user" => (
            MessageRole::User,
            extract_content(parsed.get("message")?.get("content")?, true),
        ),
        "assistant" => (
            MessageRole::Assistant,
            extract_content(parsed.get("message")?.get("content")?, false),
        ),
        _ => return None,
    };
    if content.is_empty() {
        return None;
    }

    let mut content = content;
    if content.len() > max_content {
        let mut cut = max_content;
        while cut > 0 && !content.is_char_boundary(cut) {
            cut -= 1;
        }
        content.truncate(cut);
        content.push_str("...(truncated)");
    }

    let timestamp = parsed
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_iso_timestamp)
        .or_else(|| {
            parsed
                .get("costInMillis")
                .and_then(Value::as_i64)
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        });

    Some(TranscriptEntry {
        role,
        content,
        timestamp,
    })
}

/// Collect text from a content field that is either a plain string or a
/// list of blocks. Bare strings in user-entry lists are accepted.
fn extract_content(content: &Value, allow_bare_strings: bool) -> String {
    match content {
        Value::String(s) => s.trim().to_owned(),
        Value::Array(blocks) => {
            let mut texts = Vec::new();
            for block in blocks {
                match block {
                    Value::Object(map) => {
                        if map.get("type").and_then(Value::as_str) == Some("text") {
                            if let Some(text) = map.get("text").and_then(Value::as_str) {
                                let text = text.trim();
                                if !text.is_empty() {
                                    texts.push(text.to_owned());
                                }
                            }
                        }
                    }
                    Value::String(s) if allow_bare_strings => {
                        let s = s.trim();
                        if !s.is_empty() {
                            texts.push(s.to_owned());
                        }
                    }
                    _ => {}
                }
            }
            texts.join("\n")
        }
        _ => String::new(),
    }
}

fn parse_iso_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Normalise a Slack `ts` ("1726000000.000100", Unix float) to UTC.
#[must_use]
pub fn parse_slack_ts(ts: &str) -> Option<DateTime<Utc>> {
    let seconds: f64 = ts.parse().ok()?;
    #[allow(clippy::cast_possible_truncation)]
    let micros = (seconds * 1_000_000.0) as i64;
    Utc.timestamp_micros(micros).single()
}
