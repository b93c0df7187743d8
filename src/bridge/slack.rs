//! Slack bridge: Socket Mode gateway, `!` command dispatch, and
//! `[agent]`-thread message forwarding.
//!
//! The gateway connection runs through Socket Mode so no public URL is
//! needed; Web API reads go through the shared platform service.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use slack_morphism::prelude::{
    SlackApiChatPostMessageRequest, SlackApiToken, SlackApiTokenType, SlackApiTokenValue,
    SlackChannelId, SlackClient, SlackClientEventsListenerEnvironment,
    SlackClientEventsUserState, SlackClientHyperHttpsConnector, SlackClientSocketModeConfig,
    SlackClientSocketModeListener, SlackEventCallbackBody, SlackMessageContent,
    SlackPushEventCallback, SlackSocketModeListenerCallbacks, SlackTs,
};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::bridge::capture::capture_shell_output;
use crate::bridge::command::{
    format_sessions_report, send_failure_message, BridgeCommand, USAGE,
};
use crate::bridge::hooks::DashboardClient;
use crate::config::{Config, ThreadCleanup};
use crate::models::session::is_valid_session_name;
use crate::services::platform::{truncate_for_platform, PlatformService, SLACK_MAX_BYTES};
use crate::services::session::SessionService;
use crate::tasks::TaskTracker;
use crate::{AppError, Result};

/// Long-running Slack bridge process state.
pub struct SlackBridge {
    client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    bot_token: SlackApiToken,
    app_token: SlackApiToken,
    channel_id: String,
    bot_user_id: Mutex<String>,
    sessions: SessionService,
    platform: PlatformService,
    dashboard: DashboardClient,
    tasks: TaskTracker,
    thread_cleanup: ThreadCleanup,
    new_session_agent: String,
    /// thread_ts → session name, avoiding repeated parent lookups.
    thread_cache: Mutex<HashMap<String, String>>,
}

impl SlackBridge {
    /// Build the bridge from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when Slack credentials are missing or
    /// a client cannot be constructed.
    pub fn new(config: &Config, sessions: SessionService) -> Result<Arc<Self>> {
        if config.slack_bot_token.is_empty()
            || config.slack_app_token.is_empty()
            || config.slack_channel_id.is_empty()
        {
            return Err(AppError::Config(
                "SLACK_BOT_TOKEN, SLACK_APP_TOKEN and SLACK_CHANNEL_ID are required".into(),
            ));
        }

        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| AppError::Gateway(format!("failed to init slack connector: {err}")))?;
        let client = Arc::new(SlackClient::new(connector));
        let bot_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.slack_bot_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::Bot),
        };
        let app_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.slack_app_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::App),
        };

        let platform = PlatformService::new(
            "",
            "",
            &config.slack_bot_token,
            &config.slack_channel_id,
            &config.thread_name_format,
        )?;

        Ok(Arc::new(Self {
            client,
            bot_token,
            app_token,
            channel_id: config.slack_channel_id.clone(),
            bot_user_id: Mutex::new(String::new()),
            sessions,
            platform,
            dashboard: DashboardClient::new(&config.dashboard_url),
            tasks: TaskTracker::new(),
            thread_cleanup: config.thread_cleanup,
            new_session_agent: config.new_session_agent.clone(),
            thread_cache: Mutex::new(HashMap::new()),
        }))
    }

    /// Connect Socket Mode and serve events until the process exits.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Gateway` when the initial listen fails.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        if let Some(bot_user_id) = self.platform.slack_bot_user_id().await {
            info!(bot_user_id, "connected to slack");
            *self.bot_user_id.lock().await = bot_user_id;
        }

        let listener_env = Arc::new(
            SlackClientEventsListenerEnvironment::new(Arc::clone(&self.client))
                .with_user_state(Arc::clone(self))
                .with_error_handler(|err, _client, _state| {
                    error!(?err, "socket mode error");
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                }),
        );
        let callbacks =
            SlackSocketModeListenerCallbacks::new().with_push_events(handle_push_event);
        let config = SlackClientSocketModeConfig {
            max_connections_count: SlackClientSocketModeConfig::DEFAULT_CONNECTIONS_COUNT,
            debug_connections: SlackClientSocketModeConfig::DEFAULT_DEBUG_CONNECTIONS,
            initial_backoff_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_INITIAL_BACKOFF_IN_SECONDS,
            reconnect_timeout_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_RECONNECT_TIMEOUT_IN_SECONDS,
            ping_interval_in_seconds: SlackClientSocketModeConfig::DEFAULT_PING_INTERVAL_IN_SECONDS,
            ping_failure_threshold_times:
                SlackClientSocketModeConfig::DEFAULT_PING_FAILURE_THRESHOLD_TIMES,
        };

        let listener = SlackClientSocketModeListener::new(&config, listener_env, callbacks);
        listener
            .listen_for(&self.app_token)
            .await
            .map_err(|err| AppError::Gateway(format!("socket mode listen failed: {err}")))?;

        self.announce().await;
        info!("slack bridge serving socket mode events");
        listener.serve().await;
        Ok(())
    }

    /// Post the command summary into the channel on startup.
    async fn announce(&self) {
        let text = format!(
            "*agent-relay bridge connected*\nAvailable commands:\n- `!new <name> [host] [cwd]` — \
             create tmux session\n- `!kill <name>` — kill tmux session\n- `!sessions` — list \
             active sessions\n- `!queue [add <name> <cmd> | execute]` — deferred command queue\n\
             Hosts: `{}`",
            self.sessions.hosts().join("`, `")
        );
        self.post(&self.channel_id, None, &text).await;
    }

    /// Post a message, optionally into a thread, honoring the byte
    /// ceiling.
    async fn post(&self, channel: &str, thread_ts: Option<&str>, text: &str) {
        let content = SlackMessageContent {
            text: Some(truncate_for_platform(text, SLACK_MAX_BYTES)),
            blocks: None,
            attachments: None,
            upload: None,
            files: None,
            reactions: None,
            metadata: None,
        };
        let request = SlackApiChatPostMessageRequest {
            channel: SlackChannelId(channel.to_owned()),
            content,
            as_user: None,
            icon_emoji: None,
            icon_url: None,
            link_names: Some(true),
            parse: None,
            thread_ts: thread_ts.map(|ts| SlackTs(ts.to_owned())),
            username: None,
            reply_broadcast: None,
            unfurl_links: None,
            unfurl_media: None,
        };

        let session = self.client.open_session(&self.bot_token);
        if let Err(err) = session.chat_post_message(&request).await {
            warn!(channel, ?err, "slack post failed");
        }
    }

    /// Resolve the session owning a thread from its parent message,
    /// through the cache.
    async fn thread_session(&self, channel: &str, thread_ts: &str) -> Option<String> {
        if let Some(cached) = self.thread_cache.lock().await.get(thread_ts) {
            return Some(cached.clone());
        }

        let parent_text = self
            .platform
            .slack_thread_parent_text(channel, thread_ts)
            .await?;
        let first_line = parent_text.lines().next().unwrap_or("").trim();
        let session_name = self.platform.thread_format().parse(first_line)?;
        self.thread_cache
            .lock()
            .await
            .insert(thread_ts.to_owned(), session_name.clone());
        Some(session_name)
    }

    async fn handle_message(
        self: &Arc<Self>,
        channel: String,
        thread_ts: Option<String>,
        ts: String,
        user: String,
        text: String,
    ) {
        let text = text.trim().to_owned();
        if text.is_empty() {
            return;
        }

        if let Some(command) = BridgeCommand::parse(&text) {
            info!(command = %text.chars().take(80).collect::<String>(), "slack command");
            self.handle_command(&channel, thread_ts.as_deref(), command)
                .await;
            return;
        }

        // Only thread replies are forwarded.
        let Some(thread_ts) = thread_ts else { return };
        let Some(session_name) = self.thread_session(&channel, &thread_ts).await else {
            return;
        };

        info!(user, session = session_name, "forwarding slack message");

        let Some(host) = self.sessions.find_host(&session_name).await else {
            self.post(
                &channel,
                Some(&thread_ts),
                &format!(
                    "Session `{session_name}` not found on any host.\nAvailable hosts: {}",
                    self.sessions.hosts().join(", ")
                ),
            )
            .await;
            return;
        };

        let pre_content = self
            .sessions
            .capture_pane(&host, &session_name, 200)
            .await
            .unwrap_or_default();

        self.post(
            &channel,
            Some(&thread_ts),
            &format!("Forwarding to `{session_name}` on `{host}`..."),
        )
        .await;

        self.dashboard
            .emit_message_relayed(&session_name, "slack", &text, &ts, &user)
            .await;

        if !self.sessions.send(&host, &session_name, &text).await {
            self.post(
                &channel,
                Some(&thread_ts),
                &send_failure_message(&session_name, &host),
            )
            .await;
            return;
        }

        let bridge = Arc::clone(self);
        self.tasks.spawn("slack-capture", async move {
            if let Some(output) = capture_shell_output(
                &bridge.sessions,
                &host,
                &session_name,
                &pre_content,
            )
            .await
            {
                bridge
                    .post(&channel, Some(&thread_ts), &format!("```\n{output}\n```"))
                    .await;
            }
        });
    }

    async fn handle_command(
        self: &Arc<Self>,
        channel: &str,
        thread_ts: Option<&str>,
        command: BridgeCommand,
    ) {
        match command {
            BridgeCommand::New {
                name,
                host,
                working_dir,
            } => {
                self.cmd_new(channel, thread_ts, &name, host, working_dir)
                    .await;
            }
            BridgeCommand::Kill { name } => self.cmd_kill(channel, thread_ts, &name).await,
            BridgeCommand::Sessions => self.cmd_sessions(channel, thread_ts).await,
            BridgeCommand::QueueList => self.cmd_queue_list(channel, thread_ts).await,
            BridgeCommand::QueueAdd { name, command } => {
                self.cmd_queue_add(channel, thread_ts, &name, &command).await;
            }
            BridgeCommand::QueueExecute => self.cmd_queue_execute(channel, thread_ts).await,
            BridgeCommand::Unknown => self.post(channel, thread_ts, USAGE).await,
        }
    }

    async fn cmd_new(
        self: &Arc<Self>,
        channel: &str,
        thread_ts: Option<&str>,
        name: &str,
        host: Option<String>,
        working_dir: Option<String>,
    ) {
        if !is_valid_session_name(name) {
            self.post(
                channel,
                thread_ts,
                "Invalid session name. Use only `a-z A-Z 0-9 _ -` (max 64 chars).",
            )
            .await;
            return;
        }
        let host = host.unwrap_or_else(|| self.sessions.default_host().to_owned());
        if !self.sessions.is_known_host(&host) {
            self.post(
                channel,
                thread_ts,
                &format!(
                    "Unknown host `{host}`. Available: `{}`",
                    self.sessions.hosts().join("`, `")
                ),
            )
            .await;
            return;
        }
        if let Some(existing) = self.sessions.find_host(name).await {
            self.post(
                channel,
                thread_ts,
                &format!("Session `{name}` already exists on `{existing}`."),
            )
            .await;
            return;
        }

        let created = self
            .sessions
            .create(name, &host, working_dir.as_deref())
            .await
            .unwrap_or(false);
        if !created {
            self.post(
                channel,
                thread_ts,
                &format!("Failed to create tmux session `{name}` on `{host}`."),
            )
            .await;
            return;
        }

        if !self.new_session_agent.is_empty() {
            self.sessions
                .send(&host, name, &self.new_session_agent)
                .await;
        }

        let cwd_label = working_dir
            .as_deref()
            .map(|dir| format!(" in `{dir}`"))
            .unwrap_or_default();
        match self.platform.create_slack_thread(name, &host).await {
            Ok(parent_ts) => {
                self.post(
                    &self.channel_id,
                    Some(&parent_ts),
                    &format!("Session `{name}` created on `{host}`{cwd_label}."),
                )
                .await;
                self.post(
                    channel,
                    thread_ts,
                    &format!("Created `{name}` on `{host}`{cwd_label} + thread"),
                )
                .await;
            }
            Err(err) => {
                warn!(%err, "thread creation failed");
                self.post(
                    channel,
                    thread_ts,
                    &format!(
                        "Created tmux `{name}` on `{host}`{cwd_label} but failed to create thread."
                    ),
                )
                .await;
            }
        }
    }

    async fn cmd_kill(self: &Arc<Self>, channel: &str, thread_ts: Option<&str>, name: &str) {
        if !is_valid_session_name(name) {
            self.post(
                channel,
                thread_ts,
                "Invalid session name. Use only `a-z A-Z 0-9 _ -` (max 64 chars).",
            )
            .await;
            return;
        }

        let (tmux_killed, host) = self.sessions.kill(name).await;

        let thread = self.platform.find_slack_thread(name).await;
        let mut cleanup = "none";
        if let Some(parent_ts) = thread.as_deref() {
            let result = match self.thread_cleanup {
                ThreadCleanup::Archive => {
                    self.post(
                        &self.channel_id,
                        Some(parent_ts),
                        &format!("Session `{name}` killed. Archiving thread."),
                    )
                    .await;
                    self.platform
                        .archive_slack_thread(&self.channel_id, parent_ts)
                        .await
                }
                ThreadCleanup::Delete => {
                    self.platform
                        .delete_slack_thread(&self.channel_id, parent_ts)
                        .await
                }
            };
            if result.is_ok() {
                cleanup = match self.thread_cleanup {
                    ThreadCleanup::Archive => "archived",
                    ThreadCleanup::Delete => "deleted",
                };
            }
            self.thread_cache.lock().await.remove(parent_ts);
        }

        let mut report = Vec::new();
        match (&host, tmux_killed) {
            (Some(host), true) => report.push(format!("Killed `{name}` on `{host}`")),
            (Some(host), false) => report.push(format!("Failed to kill `{name}` on `{host}`")),
            (None, _) => report.push(format!("tmux `{name}` not found")),
        }
        if cleanup == "none" {
            report.push("no thread found".to_owned());
        } else {
            report.push(format!("{cleanup} thread"));
        }
        self.post(channel, thread_ts, &report.join(" / ")).await;

        self.dashboard
            .emit_session_killed(
                name,
                "slack",
                host.as_deref().unwrap_or(""),
                tmux_killed,
                cleanup,
            )
            .await;
    }

    async fn cmd_sessions(self: &Arc<Self>, channel: &str, thread_ts: Option<&str>) {
        let listings = self.sessions.list_all().await;
        let mut tmux_sessions: BTreeMap<String, String> = BTreeMap::new();
        for (host, names) in listings {
            for name in names {
                tmux_sessions
                    .entry(name)
                    .and_modify(|hosts| {
                        hosts.push_str(", ");
                        hosts.push_str(&host);
                    })
                    .or_insert_with(|| host.clone());
            }
        }

        let mut active_threads: HashSet<String> = HashSet::new();
        for name in tmux_sessions.keys() {
            if self.platform.find_slack_thread(name).await.is_some() {
                active_threads.insert(name.clone());
            }
        }

        self.post(
            channel,
            thread_ts,
            &format_sessions_report(&tmux_sessions, &active_threads),
        )
        .await;
    }

    async fn cmd_queue_list(self: &Arc<Self>, channel: &str, thread_ts: Option<&str>) {
        let Some(result) = self
            .dashboard
            .api(reqwest::Method::GET, "/api/usage/queue?status=pending", None)
            .await
        else {
            self.post(
                channel,
                thread_ts,
                "Dashboard unavailable or usage monitor not enabled.",
            )
            .await;
            return;
        };

        let total = result
            .get("total")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0);
        if total == 0 {
            self.post(channel, thread_ts, "No pending commands in queue.")
                .await;
            return;
        }

        let mut lines = vec![format!("*Command Queue* ({total} pending)"), "```".to_owned()];
        lines.push(format!("  {:<6} {:<20} {:<12} COMMAND", "ID", "SESSION", "HOST"));
        let commands = result
            .get("commands")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default();
        for entry in commands.iter().take(15) {
            lines.push(format!(
                "  {:<6} {:<20} {:<12} {}",
                entry.get("id").and_then(serde_json::Value::as_i64).unwrap_or(0),
                entry
                    .get("session_name")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or(""),
                entry.get("host").and_then(serde_json::Value::as_str).unwrap_or(""),
                entry
                    .get("command")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or(""),
            ));
        }
        if total > 15 {
            lines.push(format!("  ... and {} more", total - 15));
        }
        lines.push("```".to_owned());
        self.post(channel, thread_ts, &lines.join("\n")).await;
    }

    async fn cmd_queue_add(
        self: &Arc<Self>,
        channel: &str,
        thread_ts: Option<&str>,
        name: &str,
        command: &str,
    ) {
        let body = serde_json::json!({ "session_name": name, "command": command });
        match self
            .dashboard
            .api(reqwest::Method::POST, "/api/usage/queue", Some(&body))
            .await
        {
            Some(result) => {
                let id = result
                    .get("command")
                    .and_then(|c| c.get("id"))
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(0);
                self.post(
                    channel,
                    thread_ts,
                    &format!("Queued command #{id} for `{name}`: `{command}`"),
                )
                .await;
            }
            None => {
                self.post(
                    channel,
                    thread_ts,
                    "Failed to queue command. Is the usage monitor enabled?",
                )
                .await;
            }
        }
    }

    async fn cmd_queue_execute(self: &Arc<Self>, channel: &str, thread_ts: Option<&str>) {
        match self
            .dashboard
            .api(reqwest::Method::POST, "/api/usage/queue/execute", None)
            .await
        {
            Some(result) => {
                let count = result
                    .get("executed")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(0);
                self.post(
                    channel,
                    thread_ts,
                    &format!("Executed {count} pending command(s)."),
                )
                .await;
            }
            None => {
                self.post(
                    channel,
                    thread_ts,
                    "Failed to execute queue. Is the usage monitor enabled?",
                )
                .await;
            }
        }
    }
}

/// Push-event callback registered with the Socket Mode listener.
///
/// # Errors
///
/// Never returns an error; failures are handled inside the spawned
/// message handler.
async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let bridge: Option<Arc<SlackBridge>> = {
        let guard = state.read().await;
        guard.get_user_state::<Arc<SlackBridge>>().cloned()
    };
    let Some(bridge) = bridge else {
        warn!("bridge state not available; dropping push event");
        return Ok(());
    };

    if let SlackEventCallbackBody::Message(message) = event.event {
        // Edits, deletes, and bot messages carry a subtype or bot id;
        // the bridge forwards only fresh human messages.
        if message.subtype.is_some() || message.sender.bot_id.is_some() {
            return Ok(());
        }
        let user = message
            .sender
            .user
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        if user.is_empty() || user == *bridge.bot_user_id.lock().await {
            return Ok(());
        }
        let Some(channel) = message.origin.channel.as_ref().map(ToString::to_string) else {
            return Ok(());
        };
        let thread_ts = message.origin.thread_ts.as_ref().map(ToString::to_string);
        let ts = message.origin.ts.to_string();
        let text = message
            .content
            .as_ref()
            .and_then(|content| content.text.clone())
            .unwrap_or_default();

        let handler = Arc::clone(&bridge);
        bridge.tasks.spawn("slack-message", async move {
            handler
                .handle_message(channel, thread_ts, ts, user, text)
                .await;
        });
    }
    Ok(())
}
