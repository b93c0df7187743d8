//! Global configuration from environment variables.
//!
//! Every knob binds to an environment variable, with an optional
//! `key=value` env-file fallback (the same file format the bridges read)
//! for values not already present in the process environment.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::{AppError, Result};

/// Thread cleanup behaviour when a session is killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadCleanup {
    /// Post a closing notice and mark the thread archived (default).
    Archive,
    /// Delete the thread outright.
    Delete,
}

/// Global configuration for the control plane and bridges.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind host.
    pub host: String,
    /// HTTP bind port.
    pub port: u16,
    /// On-disk path for the `SQLite` store.
    pub db_path: String,
    /// Ordered remote host identifiers; the first is the default.
    pub ssh_hosts: Vec<String>,

    /// Discord bot token; empty disables Discord.
    pub discord_bot_token: String,
    /// Discord channel that owns the agent threads.
    pub discord_channel_id: String,
    /// Slack bot token; empty disables Slack.
    pub slack_bot_token: String,
    /// Slack app-level token (Socket Mode).
    pub slack_app_token: String,
    /// Slack channel that owns the agent threads.
    pub slack_channel_id: String,

    /// Dashboard auth token; empty means dev mode (all requests allowed).
    pub dashboard_token: String,
    /// Control-plane base URL the bridges post webhooks to.
    pub dashboard_url: String,

    /// Reconciler cadence in seconds.
    pub poll_interval: u64,
    /// Message-sync cadence in seconds.
    pub sync_interval: u64,
    /// Transcript-ingest cadence in seconds.
    pub transcript_interval: u64,
    /// Lines tailed from a transcript file per pass.
    pub transcript_max_lines: u32,
    /// Content ceiling for transcript-derived message bodies.
    pub transcript_max_content: usize,

    /// Whether the session reconciler runs.
    pub enable_session_poller: bool,
    /// Whether the transcript tailer runs.
    pub enable_jsonl_ingester: bool,
    /// Whether the usage poller runs.
    pub enable_usage_poller: bool,
    /// Whether the deferred command queue drains on reset.
    pub enable_command_queue: bool,

    /// Agent auto-launched in sessions created via `!new` ("" disables).
    pub new_session_agent: String,
    /// What happens to platform threads on kill.
    pub thread_cleanup: ThreadCleanup,
    /// Thread name template with `{session}` and `{host}` placeholders.
    pub thread_name_format: String,

    /// Usage poll cadence in seconds.
    pub usage_poll_interval: u64,
    /// Usage snapshot retention horizon in hours.
    pub usage_retention_hours: u32,
    /// Model used for the minimal Anthropic poll call.
    pub usage_poll_model_anthropic: String,
    /// Model used for the minimal OpenAI poll call.
    pub usage_poll_model_openai: String,
    /// Anthropic API key; empty disables that provider.
    pub anthropic_api_key: String,
    /// OpenAI API key; empty disables that provider.
    pub openai_api_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            db_path: "data/agent-relay.db".into(),
            ssh_hosts: vec!["localhost".into()],
            discord_bot_token: String::new(),
            discord_channel_id: String::new(),
            slack_bot_token: String::new(),
            slack_app_token: String::new(),
            slack_channel_id: String::new(),
            dashboard_token: String::new(),
            dashboard_url: String::new(),
            poll_interval: 30,
            sync_interval: 300,
            transcript_interval: 60,
            transcript_max_lines: 500,
            transcript_max_content: 5000,
            enable_session_poller: true,
            enable_jsonl_ingester: false,
            enable_usage_poller: false,
            enable_command_queue: false,
            new_session_agent: String::new(),
            thread_cleanup: ThreadCleanup::Archive,
            thread_name_format: "[agent] {session} - {host}".into(),
            usage_poll_interval: 60,
            usage_retention_hours: 168,
            usage_poll_model_anthropic: "claude-haiku-4-5-20251001".into(),
            usage_poll_model_openai: "gpt-4o-mini".into(),
            anthropic_api_key: String::new(),
            openai_api_key: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment, falling back to an
    /// env-file named by `AGENT_BRIDGE_ENV` for values not already set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a numeric value fails to parse or
    /// validation fails.
    pub fn from_env() -> Result<Self> {
        let mut env: HashMap<String, String> = std::env::vars().collect();

        if let Some(path) = env.get("AGENT_BRIDGE_ENV").cloned() {
            if Path::new(&path).exists() {
                let fallback = load_env_file(&path)?;
                for (key, value) in fallback {
                    env.entry(key).or_insert(value);
                }
                info!(path, "loaded env-file fallback");
            }
        }

        Self::from_map(&env)
    }

    /// Build configuration from a prepared key/value map.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a numeric value fails to parse or
    /// validation fails.
    pub fn from_map(env: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env.get("DASHBOARD_HOST") {
            config.host.clone_from(v);
        }
        config.port = parse_num(env, "DASHBOARD_PORT", config.port)?;
        if let Some(v) = env.get("DASHBOARD_DB_PATH") {
            config.db_path.clone_from(v);
        }
        if let Some(v) = env.get("SSH_HOSTS") {
            let hosts: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_owned)
                .collect();
            if !hosts.is_empty() {
                config.ssh_hosts = hosts;
            }
        }

        config.discord_bot_token = env.get("DISCORD_BOT_TOKEN").cloned().unwrap_or_default();
        config.discord_channel_id = env.get("DISCORD_CHANNEL_ID").cloned().unwrap_or_default();
        config.slack_bot_token = env.get("SLACK_BOT_TOKEN").cloned().unwrap_or_default();
        config.slack_app_token = env.get("SLACK_APP_TOKEN").cloned().unwrap_or_default();
        config.slack_channel_id = env.get("SLACK_CHANNEL_ID").cloned().unwrap_or_default();
        config.dashboard_token = env.get("DASHBOARD_TOKEN").cloned().unwrap_or_default();
        config.dashboard_url = env.get("DASHBOARD_URL").cloned().unwrap_or_default();

        config.poll_interval = parse_num(env, "POLL_INTERVAL", config.poll_interval)?;
        config.sync_interval = parse_num(env, "SYNC_INTERVAL", config.sync_interval)?;
        config.transcript_interval =
            parse_num(env, "JSONL_SCAN_INTERVAL", config.transcript_interval)?;
        config.transcript_max_lines =
            parse_num(env, "JSONL_MAX_LINES", config.transcript_max_lines)?;

        config.enable_session_poller =
            parse_flag(env, "ENABLE_SESSION_POLLER", config.enable_session_poller);
        config.enable_jsonl_ingester =
            parse_flag(env, "ENABLE_JSONL_INGESTER", config.enable_jsonl_ingester);
        config.enable_usage_poller =
            parse_flag(env, "ENABLE_USAGE_POLLER", config.enable_usage_poller);
        config.enable_command_queue =
            parse_flag(env, "ENABLE_COMMAND_QUEUE", config.enable_command_queue);

        if let Some(v) = env.get("NEW_SESSION_AGENT") {
            config.new_session_agent.clone_from(v);
        }
        if let Some(v) = env.get("THREAD_CLEANUP") {
            config.thread_cleanup = match v.to_lowercase().as_str() {
                "delete" => ThreadCleanup::Delete,
                _ => ThreadCleanup::Archive,
            };
        }
        if let Some(v) = env.get("THREAD_NAME_FORMAT") {
            config.thread_name_format.clone_from(v);
        }

        config.usage_poll_interval =
            parse_num(env, "USAGE_POLL_INTERVAL", config.usage_poll_interval)?;
        config.usage_retention_hours =
            parse_num(env, "USAGE_RETENTION_HOURS", config.usage_retention_hours)?;
        if let Some(v) = env.get("USAGE_POLL_MODEL_ANTHROPIC") {
            config.usage_poll_model_anthropic.clone_from(v);
        }
        if let Some(v) = env.get("USAGE_POLL_MODEL_OPENAI") {
            config.usage_poll_model_openai.clone_from(v);
        }
        config.anthropic_api_key = env.get("ANTHROPIC_API_KEY").cloned().unwrap_or_default();
        config.openai_api_key = env.get("OPENAI_API_KEY").cloned().unwrap_or_default();

        config.validate()?;
        Ok(config)
    }

    /// The default host for new sessions.
    #[must_use]
    pub fn default_host(&self) -> &str {
        self.ssh_hosts.first().map_or("", String::as_str)
    }

    /// Whether Discord REST operations are available.
    #[must_use]
    pub fn has_discord(&self) -> bool {
        !self.discord_bot_token.is_empty() && !self.discord_channel_id.is_empty()
    }

    /// Whether Slack REST operations are available.
    #[must_use]
    pub fn has_slack(&self) -> bool {
        !self.slack_bot_token.is_empty() && !self.slack_channel_id.is_empty()
    }

    fn validate(&self) -> Result<()> {
        if self.ssh_hosts.is_empty() {
            return Err(AppError::Config("ssh_hosts must not be empty".into()));
        }
        if self.poll_interval == 0 {
            return Err(AppError::Config("poll_interval must be positive".into()));
        }
        if self.usage_poll_interval == 0 {
            return Err(AppError::Config(
                "usage_poll_interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Parse a `key=value` env-file, ignoring blank lines and `#` comments.
/// Surrounding single or double quotes are stripped from values.
///
/// # Errors
///
/// Returns `AppError::Config` if the file cannot be read.
pub fn load_env_file(path: &str) -> Result<HashMap<String, String>> {
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::Config(format!("cannot read env file '{path}': {err}")))?;

    let mut env = HashMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value
                .trim()
                .trim_matches('"')
                .trim_matches('\'')
                .to_owned();
            env.insert(key.trim().to_owned(), value);
        }
    }
    Ok(env)
}

fn parse_num<T: std::str::FromStr>(
    env: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T> {
    match env.get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("{key} must be numeric, got '{raw}'"))),
        None => Ok(default),
    }
}

fn parse_flag(env: &HashMap<String, String>, key: &str, default: bool) -> bool {
    match env.get(key).map(|v| v.to_lowercase()) {
        Some(v) => v == "true" || v == "1" || v == "yes",
        None => default,
    }
}
