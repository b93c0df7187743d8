//! Discord bridge: gateway connection, `!` command dispatch, and
//! `[agent]`-thread message forwarding.
//!
//! The gateway lifecycle follows the Discord contract: identify on
//! hello, heartbeat at the dictated interval, reconnect with a 5 s
//! backoff on close, reconnect, or invalid-session.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info, warn};

use crate::bridge::capture::capture_shell_output;
use crate::bridge::command::{
    format_sessions_report, send_failure_message, BridgeCommand, USAGE,
};
use crate::bridge::hooks::DashboardClient;
use crate::config::{Config, ThreadCleanup};
use crate::models::session::is_valid_session_name;
use crate::services::platform::{truncate_for_platform, PlatformService, DISCORD_MAX_BYTES};
use crate::services::session::SessionService;
use crate::tasks::TaskTracker;
use crate::{AppError, Result};

const DISCORD_API: &str = "https://discord.com/api/v10";
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

// Gateway intents: GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT.
const INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 15);

// Channel types that count as threads.
const PUBLIC_THREAD: i64 = 11;
const PRIVATE_THREAD: i64 = 12;

/// Long-running Discord bridge process state.
pub struct DiscordBridge {
    http: reqwest::Client,
    token: String,
    channel_id: String,
    sessions: SessionService,
    platform: PlatformService,
    dashboard: DashboardClient,
    tasks: TaskTracker,
    thread_cleanup: ThreadCleanup,
    new_session_agent: String,
}

impl DiscordBridge {
    /// Build the bridge from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the Discord credentials are
    /// missing or a client cannot be constructed.
    pub fn new(config: &Config, sessions: SessionService) -> Result<Arc<Self>> {
        if config.discord_bot_token.is_empty() || config.discord_channel_id.is_empty() {
            return Err(AppError::Config(
                "DISCORD_BOT_TOKEN and DISCORD_CHANNEL_ID are required".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|err| AppError::Config(format!("http client: {err}")))?;
        let platform = PlatformService::new(
            &config.discord_bot_token,
            &config.discord_channel_id,
            "",
            "",
            &config.thread_name_format,
        )?;
        Ok(Arc::new(Self {
            http,
            token: config.discord_bot_token.clone(),
            channel_id: config.discord_channel_id.clone(),
            sessions,
            platform,
            dashboard: DashboardClient::new(&config.dashboard_url),
            tasks: TaskTracker::new(),
            thread_cleanup: config.thread_cleanup,
            new_session_agent: config.new_session_agent.clone(),
        }))
    }

    /// Run the gateway loop forever, reconnecting with backoff.
    pub async fn run(self: &Arc<Self>) {
        loop {
            if let Err(err) = self.connect_once().await {
                error!(%err, "gateway connection ended; reconnecting");
            }
            tokio::time::sleep(RECONNECT_BACKOFF).await;
        }
    }

    async fn gateway_get(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .get(format!("{DISCORD_API}{path}"))
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Gateway(format!(
                "discord GET {path} -> {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// One gateway session: connect, identify, heartbeat, dispatch.
    async fn connect_once(self: &Arc<Self>) -> Result<()> {
        let gateway = self.gateway_get("/gateway/bot").await?;
        let ws_url = format!(
            "{}?v=10&encoding=json",
            gateway
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or("wss://gateway.discord.gg")
        );

        let me = self.gateway_get("/users/@me").await?;
        let bot_user_id = me
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        info!(
            username = me.get("username").and_then(serde_json::Value::as_str).unwrap_or(""),
            bot_user_id, "connected to discord"
        );

        let (socket, _) = connect_async(&ws_url)
            .await
            .map_err(|err| AppError::Gateway(format!("gateway connect: {err}")))?;
        let (mut sink, mut stream) = socket.split();

        // All writes (identify, heartbeat) funnel through one channel so
        // the sink has a single owner.
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let writer = tokio::spawn(async move {
            while let Some(payload) = out_rx.recv().await {
                if sink.send(WsMessage::Text(payload.into())).await.is_err() {
                    break;
                }
            }
        });

        let sequence = Arc::new(AtomicI64::new(-1));

        while let Some(frame) = stream.next().await {
            let frame = match frame {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) | Err(_) => break,
                _ => continue,
            };
            let Ok(data) = serde_json::from_str::<Value>(&frame) else {
                continue;
            };

            if let Some(seq) = data.get("s").and_then(Value::as_i64) {
                sequence.store(seq, Ordering::Relaxed);
            }

            match data.get("op").and_then(Value::as_i64) {
                // Hello: identify and start the heartbeat task.
                Some(10) => {
                    let interval_ms = data
                        .get("d")
                        .and_then(|d| d.get("heartbeat_interval"))
                        .and_then(Value::as_u64)
                        .unwrap_or(41_250);

                    let identify = json!({
                        "op": 2,
                        "d": {
                            "token": self.token,
                            "intents": INTENTS,
                            "properties": {
                                "os": "linux",
                                "browser": "agent-relay",
                                "device": "agent-relay",
                            },
                        },
                    });
                    let _ = out_tx.send(identify.to_string()).await;

                    let heartbeat_tx = out_tx.clone();
                    let heartbeat_seq = Arc::clone(&sequence);
                    self.tasks.spawn("discord-heartbeat", async move {
                        let mut ticker =
                            tokio::time::interval(Duration::from_millis(interval_ms));
                        ticker.tick().await;
                        loop {
                            ticker.tick().await;
                            let seq = heartbeat_seq.load(Ordering::Relaxed);
                            let beat = json!({
                                "op": 1,
                                "d": if seq >= 0 { json!(seq) } else { Value::Null },
                            });
                            if heartbeat_tx.send(beat.to_string()).await.is_err() {
                                break;
                            }
                        }
                    });
                }
                // Heartbeat ACK.
                Some(11) => {}
                // Dispatch.
                Some(0) => {
                    if data.get("t").and_then(Value::as_str) == Some("MESSAGE_CREATE") {
                        if let Some(message) = data.get("d").cloned() {
                            let bridge = Arc::clone(self);
                            let bot_id = bot_user_id.clone();
                            self.tasks.spawn("discord-message", async move {
                                bridge.handle_message(&bot_id, &message).await;
                            });
                        }
                    }
                }
                // Reconnect / invalid session.
                Some(7 | 9) => {
                    warn!("gateway requested reconnect");
                    break;
                }
                _ => {}
            }
        }

        drop(out_tx);
        writer.abort();
        Ok(())
    }

    /// Post into a thread or channel, honoring the byte ceiling.
    async fn post(&self, channel_id: &str, content: &str) {
        let body = json!({ "content": truncate_for_platform(content, DISCORD_MAX_BYTES) });
        let result = self
            .http
            .post(format!("{DISCORD_API}/channels/{channel_id}/messages"))
            .header("Authorization", format!("Bot {}", self.token))
            .json(&body)
            .send()
            .await;
        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(channel_id, status = %response.status(), "discord post failed");
            }
            Ok(_) => {}
            Err(err) => warn!(channel_id, %err, "discord post failed"),
        }
    }

    async fn handle_message(self: &Arc<Self>, bot_user_id: &str, message: &Value) {
        let author = message.get("author").cloned().unwrap_or(Value::Null);
        let author_id = author.get("id").and_then(Value::as_str).unwrap_or("");
        let author_is_bot = author.get("bot").and_then(Value::as_bool).unwrap_or(false);
        if author_id == bot_user_id || author_is_bot {
            return;
        }

        let channel_id = message
            .get("channel_id")
            .and_then(Value::as_str)
            .unwrap_or("");
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_owned();
        if channel_id.is_empty() || content.is_empty() {
            return;
        }

        if let Some(command) = BridgeCommand::parse(&content) {
            self.handle_command(channel_id, command).await;
            return;
        }

        // Forwarding only applies inside [agent] threads.
        let Ok(channel) = self.gateway_get(&format!("/channels/{channel_id}")).await else {
            return;
        };
        let channel_type = channel.get("type").and_then(Value::as_i64).unwrap_or(-1);
        if channel_type != PUBLIC_THREAD && channel_type != PRIVATE_THREAD {
            return;
        }
        let thread_name = channel.get("name").and_then(Value::as_str).unwrap_or("");
        let Some(session_name) = self.platform.thread_format().parse(thread_name) else {
            return;
        };

        let author_name = author
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_owned();
        info!(author = author_name, session = session_name, "forwarding discord message");

        let Some(host) = self.sessions.find_host(&session_name).await else {
            self.post(
                channel_id,
                &format!(
                    "Session `{session_name}` not found on any host.\nAvailable hosts: {}",
                    self.sessions.hosts().join(", ")
                ),
            )
            .await;
            return;
        };

        // Pane content before the send; the capture task diffs against
        // it to isolate new output.
        let pre_content = self
            .sessions
            .capture_pane(&host, &session_name, 200)
            .await
            .unwrap_or_default();

        self.post(
            channel_id,
            &format!("⏳ Forwarding to `{session_name}` on `{host}`..."),
        )
        .await;

        let source_id = message
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        self.dashboard
            .emit_message_relayed(&session_name, "discord", &content, source_id, &author_name)
            .await;

        if !self.sessions.send(&host, &session_name, &content).await {
            self.post(channel_id, &send_failure_message(&session_name, &host))
                .await;
            return;
        }

        let bridge = Arc::clone(self);
        let thread = channel_id.to_owned();
        self.tasks.spawn("discord-capture", async move {
            if let Some(output) = capture_shell_output(
                &bridge.sessions,
                &host,
                &session_name,
                &pre_content,
            )
            .await
            {
                bridge.post(&thread, &format!("```\n{output}\n```")).await;
            }
        });
    }

    async fn handle_command(self: &Arc<Self>, reply_to: &str, command: BridgeCommand) {
        match command {
            BridgeCommand::New {
                name,
                host,
                working_dir,
            } => self.cmd_new(reply_to, &name, host, working_dir).await,
            BridgeCommand::Kill { name } => self.cmd_kill(reply_to, &name).await,
            BridgeCommand::Sessions => self.cmd_sessions(reply_to).await,
            BridgeCommand::QueueList => self.cmd_queue_list(reply_to).await,
            BridgeCommand::QueueAdd { name, command } => {
                self.cmd_queue_add(reply_to, &name, &command).await;
            }
            BridgeCommand::QueueExecute => self.cmd_queue_execute(reply_to).await,
            BridgeCommand::Unknown => self.post(reply_to, USAGE).await,
        }
    }

    async fn cmd_new(
        self: &Arc<Self>,
        reply_to: &str,
        name: &str,
        host: Option<String>,
        working_dir: Option<String>,
    ) {
        if !is_valid_session_name(name) {
            self.post(
                reply_to,
                "Invalid session name. Use only `a-z A-Z 0-9 _ -` (max 64 chars).",
            )
            .await;
            return;
        }
        let host = host.unwrap_or_else(|| self.sessions.default_host().to_owned());
        if !self.sessions.is_known_host(&host) {
            self.post(
                reply_to,
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
                reply_to,
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
                reply_to,
                &format!("Failed to create tmux session `{name}` on `{host}`."),
            )
            .await;
            return;
        }

        if !self.new_session_agent.is_empty() {
            // Auto-launch the configured agent in the fresh session.
            self.sessions
                .send(&host, name, &self.new_session_agent)
                .await;
        }

        let cwd_label = working_dir
            .as_deref()
            .map(|dir| format!(" in `{dir}`"))
            .unwrap_or_default();
        match self.platform.create_discord_thread(name, &host).await {
            Ok(thread_id) => {
                self.post(
                    &thread_id,
                    &format!("Session `{name}` created on `{host}`{cwd_label}."),
                )
                .await;
                self.post(
                    reply_to,
                    &format!("Created `{name}` on `{host}`{cwd_label} + thread"),
                )
                .await;
            }
            Err(err) => {
                warn!(%err, "thread creation failed");
                self.post(
                    reply_to,
                    &format!(
                        "Created tmux `{name}` on `{host}`{cwd_label} but failed to create thread."
                    ),
                )
                .await;
            }
        }
    }

    async fn cmd_kill(self: &Arc<Self>, reply_to: &str, name: &str) {
        if !is_valid_session_name(name) {
            self.post(
                reply_to,
                "Invalid session name. Use only `a-z A-Z 0-9 _ -` (max 64 chars).",
            )
            .await;
            return;
        }

        let (tmux_killed, host) = self.sessions.kill(name).await;

        let thread = self.platform.find_discord_thread(name).await;
        let mut cleanup = "none";
        if let Some(thread_id) = thread.as_deref() {
            let result = match self.thread_cleanup {
                ThreadCleanup::Archive => {
                    self.post(
                        thread_id,
                        &format!("Session `{name}` killed. Archiving thread."),
                    )
                    .await;
                    self.platform.archive_discord_thread(thread_id).await
                }
                ThreadCleanup::Delete => self.platform.delete_discord_thread(thread_id).await,
            };
            if result.is_ok() {
                cleanup = match self.thread_cleanup {
                    ThreadCleanup::Archive => "archived",
                    ThreadCleanup::Delete => "deleted",
                };
            }
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
        self.post(reply_to, &report.join(" / ")).await;

        self.dashboard
            .emit_session_killed(
                name,
                "discord",
                host.as_deref().unwrap_or(""),
                tmux_killed,
                cleanup,
            )
            .await;
    }

    async fn cmd_sessions(self: &Arc<Self>, reply_to: &str) {
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

        // Active threads: names parsed from non-archived threads in the
        // configured channel.
        let mut active_threads: HashSet<String> = HashSet::new();
        if let Ok(channel) = self.gateway_get(&format!("/channels/{}", self.channel_id)).await {
            if let Some(guild_id) = channel.get("guild_id").and_then(Value::as_str) {
                if let Ok(data) = self
                    .gateway_get(&format!("/guilds/{guild_id}/threads/active"))
                    .await
                {
                    for thread in data
                        .get("threads")
                        .and_then(Value::as_array)
                        .map(Vec::as_slice)
                        .unwrap_or_default()
                    {
                        let name = thread.get("name").and_then(Value::as_str).unwrap_or("");
                        if let Some(session) = self.platform.thread_format().parse(name) {
                            active_threads.insert(session);
                        }
                    }
                }
            }
        }

        self.post(reply_to, &format_sessions_report(&tmux_sessions, &active_threads))
            .await;
    }

    async fn cmd_queue_list(self: &Arc<Self>, reply_to: &str) {
        let Some(result) = self
            .dashboard
            .api(reqwest::Method::GET, "/api/usage/queue?status=pending", None)
            .await
        else {
            self.post(reply_to, "Dashboard unavailable or usage monitor not enabled.")
                .await;
            return;
        };

        let total = result.get("total").and_then(Value::as_i64).unwrap_or(0);
        if total == 0 {
            self.post(reply_to, "No pending commands in queue.").await;
            return;
        }

        let mut lines = vec![format!("**Command Queue** ({total} pending)"), "```".to_owned()];
        lines.push(format!("  {:<6} {:<20} {:<12} COMMAND", "ID", "SESSION", "HOST"));
        let commands = result
            .get("commands")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for entry in commands.iter().take(15) {
            lines.push(format!(
                "  {:<6} {:<20} {:<12} {}",
                entry.get("id").and_then(Value::as_i64).unwrap_or(0),
                entry.get("session_name").and_then(Value::as_str).unwrap_or(""),
                entry.get("host").and_then(Value::as_str).unwrap_or(""),
                entry.get("command").and_then(Value::as_str).unwrap_or(""),
            ));
        }
        if total > 15 {
            lines.push(format!("  ... and {} more", total - 15));
        }
        lines.push("```".to_owned());
        self.post(reply_to, &lines.join("\n")).await;
    }

    async fn cmd_queue_add(self: &Arc<Self>, reply_to: &str, name: &str, command: &str) {
        let body = json!({ "session_name": name, "command": command });
        match self
            .dashboard
            .api(reqwest::Method::POST, "/api/usage/queue", Some(&body))
            .await
        {
            Some(result) => {
                let id = result
                    .get("command")
                    .and_then(|c| c.get("id"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                self.post(
                    reply_to,
                    &format!("Queued command #{id} for `{name}`: `{command}`"),
                )
                .await;
            }
            None => {
                self.post(reply_to, "Failed to queue command. Is the usage monitor enabled?")
                    .await;
            }
        }
    }

    async fn cmd_queue_execute(self: &Arc<Self>, reply_to: &str) {
        match self
            .dashboard
            .api(reqwest::Method::POST, "/api/usage/queue/execute", None)
            .await
        {
            Some(result) => {
                let count = result.get("executed").and_then(Value::as_i64).unwrap_or(0);
                self.post(reply_to, &format!("Executed {count} pending command(s)."))
                    .await;
            }
            None => {
                self.post(reply_to, "Failed to execute queue. Is the usage monitor enabled?")
                    .await;
            }
        }
    }
}
