//! Discord and Slack REST operations: thread discovery, creation,
//! archival, deletion, and paginated message fetch.
//!
//! Each platform keeps a single long-lived HTTP client to amortise TLS
//! cost and preserve bucket-scoped rate-limit state.

use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{AppError, Result};

const DISCORD_API: &str = "https://discord.com/api/v10";
const SLACK_API: &str = "https://slack.com/api";

/// Legacy prefix-only thread name variant, accepted on the read path.
pub const AGENT_PREFIX: &str = "[agent] ";

/// Byte ceiling for a Discord message, truncation marker included.
pub const DISCORD_MAX_BYTES: usize = 1900;
/// Byte ceiling for a Slack message, truncation marker included.
pub const SLACK_MAX_BYTES: usize = 3800;

const TRUNCATION_MARKER: &str = "\n...(truncated)";

/// Truncate a message body to a platform byte ceiling, annotating the
/// cut. The boundary is backed off to a UTF-8 character edge.
#[must_use]
pub fn truncate_for_platform(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_owned();
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &text[..cut], TRUNCATION_MARKER)
}

/// Thread-name template handling (`[agent] {session} - {host}`).
#[derive(Debug, Clone)]
pub struct ThreadNameFormat {
    template: String,
    parse_re: Regex,
}

impl ThreadNameFormat {
    /// Compile the reverse-parse regex for a template containing
    /// `{session}` and `{host}` placeholders.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the derived regex fails to compile.
    pub fn new(template: &str) -> Result<Self> {
        let escaped = regex::escape(template)
            .replace(&regex::escape("{session}"), "([A-Za-z0-9_-]+)")
            .replace(&regex::escape("{host}"), ".+");
        let parse_re = Regex::new(&format!("^{escaped}$"))
            .map_err(|err| AppError::Config(format!("bad thread name format: {err}")))?;
        Ok(Self {
            template: template.to_owned(),
            parse_re,
        })
    }

    /// Render the thread name for a session on a host.
    #[must_use]
    pub fn render(&self, session: &str, host: &str) -> String {
        self.template
            .replace("{session}", session)
            .replace("{host}", host)
    }

    /// Derive the session name from a thread name, accepting the legacy
    /// prefix-only variant.
    #[must_use]
    pub fn parse(&self, thread_name: &str) -> Option<String> {
        if let Some(captures) = self.parse_re.captures(thread_name) {
            return captures.get(1).map(|m| m.as_str().to_owned());
        }
        thread_name
            .strip_prefix(AGENT_PREFIX)
            .map(|rest| rest.split_whitespace().next().unwrap_or(rest).to_owned())
            .filter(|name| !name.is_empty())
    }
}

/// Platform REST client pair with optional per-platform availability.
#[derive(Clone)]
pub struct PlatformService {
    http: reqwest::Client,
    discord_token: String,
    discord_channel_id: String,
    slack_token: String,
    slack_channel_id: String,
    thread_format: ThreadNameFormat,
}

impl PlatformService {
    /// Build the service; either credential set may be empty, disabling
    /// that platform's operations.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the thread-name template is invalid
    /// or the HTTP client cannot be constructed.
    pub fn new(
        discord_token: &str,
        discord_channel_id: &str,
        slack_token: &str,
        slack_channel_id: &str,
        thread_name_format: &str,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|err| AppError::Config(format!("http client: {err}")))?;
        Ok(Self {
            http,
            discord_token: discord_token.to_owned(),
            discord_channel_id: discord_channel_id.to_owned(),
            slack_token: slack_token.to_owned(),
            slack_channel_id: slack_channel_id.to_owned(),
            thread_format: ThreadNameFormat::new(thread_name_format)?,
        })
    }

    /// Whether Discord operations are available.
    #[must_use]
    pub fn has_discord(&self) -> bool {
        !self.discord_token.is_empty() && !self.discord_channel_id.is_empty()
    }

    /// Whether Slack operations are available.
    #[must_use]
    pub fn has_slack(&self) -> bool {
        !self.slack_token.is_empty() && !self.slack_channel_id.is_empty()
    }

    /// The configured Slack channel.
    #[must_use]
    pub fn slack_channel(&self) -> &str {
        &self.slack_channel_id
    }

    /// Thread-name template handling.
    #[must_use]
    pub fn thread_format(&self) -> &ThreadNameFormat {
        &self.thread_format
    }

    // ── Discord ──────────────────────────────────────────

    async fn discord_get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let response = self
            .http
            .get(format!("{DISCORD_API}{path}"))
            .header("Authorization", format!("Bot {}", self.discord_token))
            .query(query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Platform(format!(
                "discord GET {path} -> {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn discord_send(&self, method: reqwest::Method, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .http
            .request(method.clone(), format!("{DISCORD_API}{path}"))
            .header("Authorization", format!("Bot {}", self.discord_token))
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Platform(format!(
                "discord {method} {path} -> {}",
                response.status()
            )));
        }
        let text = response.text().await?;
        if text.is_empty() {
            Ok(Value::Null)
        } else {
            Ok(serde_json::from_str(&text)?)
        }
    }

    /// Locate a Discord thread for a session: active threads first, then
    /// archived, then recent channel messages.
    pub async fn find_discord_thread(&self, session_name: &str) -> Option<String> {
        if !self.has_discord() {
            return None;
        }

        let channel = self
            .discord_get(&format!("/channels/{}", self.discord_channel_id), &[])
            .await
            .ok()?;
        let guild_id = channel.get("guild_id").and_then(Value::as_str);

        if let Some(guild_id) = guild_id {
            if let Ok(data) = self
                .discord_get(&format!("/guilds/{guild_id}/threads/active"), &[])
                .await
            {
                if let Some(id) = self.match_thread_list(&data, session_name, true) {
                    return Some(id);
                }
            }
        }

        if let Ok(data) = self
            .discord_get(
                &format!(
                    "/channels/{}/threads/archived/public",
                    self.discord_channel_id
                ),
                &[],
            )
            .await
        {
            if let Some(id) = self.match_thread_list(&data, session_name, false) {
                return Some(id);
            }
        }

        None
    }

    fn match_thread_list(
        &self,
        data: &Value,
        session_name: &str,
        require_parent: bool,
    ) -> Option<String> {
        for thread in data.get("threads")?.as_array()? {
            let name = thread.get("name").and_then(Value::as_str).unwrap_or("");
            if self.thread_format.parse(name).as_deref() != Some(session_name) {
                continue;
            }
            if require_parent
                && thread.get("parent_id").and_then(Value::as_str)
                    != Some(self.discord_channel_id.as_str())
            {
                continue;
            }
            return thread
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_owned);
        }
        None
    }

    /// Create a Discord thread for a session: post a parent message,
    /// start a thread on it, post a welcome. Returns the thread id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Platform` if any step fails.
    pub async fn create_discord_thread(&self, session_name: &str, host: &str) -> Result<String> {
        let thread_name = self.thread_format.render(session_name, host);

        let parent = self
            .discord_send(
                reqwest::Method::POST,
                &format!("/channels/{}/messages", self.discord_channel_id),
                &json!({ "content": format!("tmux session: **{thread_name}**") }),
            )
            .await?;
        let parent_id = parent
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Platform("discord parent message has no id".into()))?;

        let thread = self
            .discord_send(
                reqwest::Method::POST,
                &format!(
                    "/channels/{}/messages/{parent_id}/threads",
                    self.discord_channel_id
                ),
                &json!({ "name": thread_name }),
            )
            .await?;
        let thread_id = thread
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Platform("discord thread creation returned no id".into()))?
            .to_owned();

        let welcome = format!(
            "**Welcome to {thread_name}**\n\nType a message here to forward it to the tmux \
             session.\n\n**Commands:**\n`!sessions` — list all sessions\n`!kill {session_name}` \
             — kill this session + close thread"
        );
        self.discord_send(
            reqwest::Method::POST,
            &format!("/channels/{thread_id}/messages"),
            &json!({ "content": truncate_for_platform(&welcome, DISCORD_MAX_BYTES) }),
        )
        .await?;

        info!(session_name, thread_id, "created discord thread");
        Ok(thread_id)
    }

    /// Set the archived flag on a Discord thread.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Platform` if the PATCH fails.
    pub async fn archive_discord_thread(&self, thread_id: &str) -> Result<()> {
        self.discord_send(
            reqwest::Method::PATCH,
            &format!("/channels/{thread_id}"),
            &json!({ "archived": true }),
        )
        .await?;
        info!(thread_id, "archived discord thread");
        Ok(())
    }

    /// Delete a Discord thread.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Platform` if the DELETE fails.
    pub async fn delete_discord_thread(&self, thread_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{DISCORD_API}/channels/{thread_id}"))
            .header("Authorization", format!("Bot {}", self.discord_token))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Platform(format!(
                "discord thread delete -> {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// One page of thread messages after a cursor, oldest first after
    /// reversal (Discord returns newest first).
    pub async fn fetch_discord_messages(
        &self,
        thread_id: &str,
        limit: u32,
        after: Option<&str>,
    ) -> Vec<Value> {
        if !self.has_discord() {
            return Vec::new();
        }
        let mut query = vec![("limit", limit.min(100).to_string())];
        if let Some(cursor) = after {
            query.push(("after", cursor.to_owned()));
        }
        match self
            .discord_get(&format!("/channels/{thread_id}/messages"), &query)
            .await
        {
            Ok(Value::Array(mut messages)) => {
                messages.reverse();
                messages
            }
            Ok(_) => Vec::new(),
            Err(err) => {
                warn!(thread_id, %err, "discord message fetch failed");
                Vec::new()
            }
        }
    }

    /// All thread messages after a cursor, paging by the last message id.
    pub async fn fetch_all_discord_messages(
        &self,
        thread_id: &str,
        after: Option<&str>,
    ) -> Vec<Value> {
        let mut all = Vec::new();
        let mut cursor = after.map(str::to_owned);

        loop {
            let batch = self
                .fetch_discord_messages(thread_id, 100, cursor.as_deref())
                .await;
            if batch.is_empty() {
                break;
            }
            let short_page = batch.len() < 100;
            cursor = batch
                .last()
                .and_then(|m| m.get("id"))
                .and_then(Value::as_str)
                .map(str::to_owned);
            all.extend(batch);
            if short_page || cursor.is_none() {
                break;
            }
        }
        all
    }

    /// The Discord bot's own user id, for role detection.
    pub async fn discord_bot_user_id(&self) -> Option<String> {
        if !self.has_discord() {
            return None;
        }
        self.discord_get("/users/@me", &[])
            .await
            .ok()?
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    // ── Slack ────────────────────────────────────────────

    async fn slack_get(&self, method: &str, query: &[(&str, String)]) -> Result<Value> {
        let response = self
            .http
            .get(format!("{SLACK_API}/{method}"))
            .header("Authorization", format!("Bearer {}", self.slack_token))
            .query(query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Platform(format!(
                "slack {method} -> {}",
                response.status()
            )));
        }
        let data: Value = response.json().await?;
        if data.get("ok").and_then(Value::as_bool) != Some(true) {
            let error = data
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(AppError::Platform(format!("slack {method}: {error}")));
        }
        Ok(data)
    }

    async fn slack_post(&self, method: &str, body: &Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{SLACK_API}/{method}"))
            .header("Authorization", format!("Bearer {}", self.slack_token))
            .json(body)
            .send()
            .await?;
        let data: Value = response.json().await?;
        if data.get("ok").and_then(Value::as_bool) != Some(true) {
            let error = data
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(AppError::Platform(format!("slack {method}: {error}")));
        }
        Ok(data)
    }

    /// Find a Slack thread for a session by scanning channel history for
    /// a parent message whose first line matches the thread name.
    pub async fn find_slack_thread(&self, session_name: &str) -> Option<String> {
        if !self.has_slack() {
            return None;
        }
        let data = self
            .slack_get(
                "conversations.history",
                &[
                    ("channel", self.slack_channel_id.clone()),
                    ("limit", "200".into()),
                ],
            )
            .await
            .ok()?;
        for message in data.get("messages")?.as_array()? {
            let text = message.get("text").and_then(Value::as_str).unwrap_or("");
            let first_line = text.lines().next().unwrap_or("").trim();
            if self.thread_format.parse(first_line).as_deref() == Some(session_name) {
                return message
                    .get("ts")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
            }
        }
        None
    }

    /// Create a Slack thread: post the parent message, reply with a
    /// welcome. Returns the parent timestamp.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Platform` if posting fails.
    pub async fn create_slack_thread(&self, session_name: &str, host: &str) -> Result<String> {
        let thread_name = self.thread_format.render(session_name, host);
        let parent = self
            .slack_post(
                "chat.postMessage",
                &json!({
                    "channel": self.slack_channel_id,
                    "text": format!("tmux session: *{thread_name}*"),
                }),
            )
            .await?;
        let parent_ts = parent
            .get("ts")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Platform("slack parent message has no ts".into()))?
            .to_owned();

        let welcome = format!(
            "*Welcome to {thread_name}*\n\nType a message here to forward it to the tmux \
             session.\n\n*Commands:*\n`!sessions` — list all sessions\n`!kill {session_name}` \
             — kill this session + close thread"
        );
        self.slack_post(
            "chat.postMessage",
            &json!({
                "channel": self.slack_channel_id,
                "thread_ts": parent_ts,
                "text": truncate_for_platform(&welcome, SLACK_MAX_BYTES),
            }),
        )
        .await?;

        info!(session_name, parent_ts, "created slack thread");
        Ok(parent_ts)
    }

    /// Archive a Slack thread: closing notice plus a lock reaction.
    /// Slack has no native thread archival.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Platform` if posting fails.
    pub async fn archive_slack_thread(&self, channel_id: &str, thread_ts: &str) -> Result<()> {
        self.slack_post(
            "chat.postMessage",
            &json!({
                "channel": channel_id,
                "thread_ts": thread_ts,
                "text": ":lock: Thread archived. Session closed.",
            }),
        )
        .await?;
        self.slack_post(
            "reactions.add",
            &json!({
                "channel": channel_id,
                "timestamp": thread_ts,
                "name": "lock",
            }),
        )
        .await?;
        info!(thread_ts, "archived slack thread");
        Ok(())
    }

    /// Delete a Slack thread by removing its parent message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Platform` if the deletion fails.
    pub async fn delete_slack_thread(&self, channel_id: &str, thread_ts: &str) -> Result<()> {
        self.slack_post(
            "chat.delete",
            &json!({ "channel": channel_id, "ts": thread_ts }),
        )
        .await?;
        Ok(())
    }

    /// One page of thread replies. Returns `(messages, next_cursor)`;
    /// the parent row is skipped.
    pub async fn fetch_slack_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> (Vec<Value>, Option<String>) {
        if !self.has_slack() {
            return (Vec::new(), None);
        }
        let mut query = vec![
            ("channel", channel_id.to_owned()),
            ("ts", thread_ts.to_owned()),
            ("limit", limit.min(200).to_string()),
        ];
        if let Some(c) = cursor {
            query.push(("cursor", c.to_owned()));
        }
        match self.slack_get("conversations.replies", &query).await {
            Ok(data) => {
                let mut messages: Vec<Value> = data
                    .get("messages")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                if messages
                    .first()
                    .and_then(|m| m.get("ts"))
                    .and_then(Value::as_str)
                    == Some(thread_ts)
                {
                    messages.remove(0);
                }
                let next_cursor = data
                    .get("response_metadata")
                    .and_then(|m| m.get("next_cursor"))
                    .and_then(Value::as_str)
                    .filter(|c| !c.is_empty())
                    .map(str::to_owned);
                (messages, next_cursor)
            }
            Err(err) => {
                warn!(thread_ts, %err, "slack replies fetch failed");
                (Vec::new(), None)
            }
        }
    }

    /// All thread replies after a timestamp, following pagination
    /// cursors with a one-second pause per page.
    pub async fn fetch_all_slack_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
        after_ts: Option<&str>,
    ) -> Vec<Value> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let (batch, next_cursor) = self
                .fetch_slack_replies(channel_id, thread_ts, 200, cursor.as_deref())
                .await;
            if batch.is_empty() {
                break;
            }
            for message in batch {
                let ts = message.get("ts").and_then(Value::as_str).unwrap_or("");
                if after_ts.is_none_or(|after| ts > after) {
                    all.push(message);
                }
            }
            match next_cursor {
                Some(next) => {
                    cursor = Some(next);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                None => break,
            }
        }
        all
    }

    /// The first line of a Slack thread's parent message, for deriving
    /// the owning session from an incoming reply.
    pub async fn slack_thread_parent_text(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Option<String> {
        if !self.has_slack() {
            return None;
        }
        let data = self
            .slack_get(
                "conversations.replies",
                &[
                    ("channel", channel_id.to_owned()),
                    ("ts", thread_ts.to_owned()),
                    ("limit", "1".into()),
                ],
            )
            .await
            .ok()?;
        data.get("messages")?
            .as_array()?
            .first()?
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    /// The Slack bot's own user id via `auth.test`.
    pub async fn slack_bot_user_id(&self) -> Option<String> {
        if !self.has_slack() {
            return None;
        }
        self.slack_get("auth.test", &[])
            .await
            .ok()?
            .get("user_id")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }
}
