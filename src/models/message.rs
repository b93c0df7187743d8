//! Message model: one utterance belonging to a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced the utterance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Parse a role string; anything unrecognized falls back to `User`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => Self::Assistant,
            "system" => Self::System,
            _ => Self::User,
        }
    }
}

/// Where the utterance was observed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    Discord,
    Slack,
    /// Agent transcript file tail.
    Transcript,
    /// Bridge webhook without a platform identity.
    Hook,
    /// Captured tmux pane output.
    Tmux,
}

impl MessageSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Slack => "slack",
            Self::Transcript => "transcript",
            Self::Hook => "hook",
            Self::Tmux => "tmux",
        }
    }

    /// Parse a source tag; unknown platforms degrade to `Hook`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "discord" => Self::Discord,
            "slack" => Self::Slack,
            "transcript" => Self::Transcript,
            "tmux" => Self::Tmux,
            _ => Self::Hook,
        }
    }
}

/// A persisted message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Monotonic row id.
    pub id: i64,
    pub session_name: String,
    pub role: MessageRole,
    pub content: String,
    pub source: MessageSource,
    /// Platform-stable identifier, when one exists.
    pub source_id: Option<String>,
    pub source_author: Option<String>,
    /// Event time (ISO-8601 UTC).
    pub timestamp: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    /// Content-derived deduplication fingerprint. Unique.
    pub dedup_hash: String,
}

/// A message prepared for insertion (no row id yet).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session_name: String,
    pub role: MessageRole,
    pub content: String,
    pub source: MessageSource,
    pub source_id: Option<String>,
    pub source_author: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub dedup_hash: String,
}
