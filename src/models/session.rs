//! Session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of a session name in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// Lifecycle status for a tmux-hosted agent session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session is live in tmux.
    Active,
    /// Session is live but quiet; set by external clients.
    Idle,
    /// Session is gone from tmux. Terminal state.
    Closed,
    /// Thread exists with no backing session; set by external clients.
    Orphan,
    /// The owning host cannot be reached; set by external clients.
    Unreachable,
}

impl SessionStatus {
    /// Database string for the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Closed => "closed",
            Self::Orphan => "orphan",
            Self::Unreachable => "unreachable",
        }
    }

    /// Parse a database string into the status enum.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "idle" => Some(Self::Idle),
            "closed" => Some(Self::Closed),
            "orphan" => Some(Self::Orphan),
            "unreachable" => Some(Self::Unreachable),
            _ => None,
        }
    }

    /// Whether the reconciler may drive this transition. The reconciler
    /// owns {active ↔ idle} ∪ {* → active on rediscovery} ∪
    /// {active → closed}; orphan and unreachable are client-set only.
    #[must_use]
    pub fn reconciler_may_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Idle | Self::Closed | Self::Orphan | Self::Unreachable,
                Self::Active
            ) | (Self::Active, Self::Idle | Self::Closed)
        )
    }
}

/// Which agent runs inside the session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Claude,
    Codex,
    Gemini,
    Other,
    Unknown,
}

impl AgentKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Other => "other",
            Self::Unknown => "unknown",
        }
    }

    /// Parse an agent name; anything unrecognized is `Other`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "claude" => Self::Claude,
            "codex" => Self::Codex,
            "gemini" => Self::Gemini,
            "unknown" | "" => Self::Unknown,
            _ => Self::Other,
        }
    }
}

/// A named, long-running interactive agent session on a remote host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// Unique name, `^[A-Za-z0-9_-]+$`, at most 64 bytes. Primary key.
    pub name: String,
    /// Remote host currently owning the session. May change while active.
    pub host: Option<String>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Agent class running inside the session.
    pub agent_type: Option<AgentKind>,
    /// Working directory of the session's active pane.
    pub working_dir: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the session reaches `closed`.
    pub closed_at: Option<DateTime<Utc>>,
    /// Discord thread anchor.
    pub discord_thread_id: Option<String>,
    pub discord_archived: bool,
    /// Slack thread anchor: parent message timestamp plus channel.
    pub slack_thread_ts: Option<String>,
    pub slack_channel_id: Option<String>,
    pub slack_archived: bool,
}

impl Session {
    /// Construct a fresh active session.
    #[must_use]
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            host: Some(host.into()),
            status: SessionStatus::Active,
            agent_type: None,
            working_dir: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            discord_thread_id: None,
            discord_archived: false,
            slack_thread_ts: None,
            slack_channel_id: None,
            slack_archived: false,
        }
    }
}

/// Whether a session name is safe for interpolation into shell commands
/// and thread names: `^[A-Za-z0-9_-]+$`, at most 64 bytes.
#[must_use]
pub fn is_valid_session_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
