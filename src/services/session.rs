//! tmux session management across remote hosts.
//!
//! All operations go through the [`RemoteRunner`] transport; host queries
//! fan out in parallel and tolerate per-host failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::remote::{shell_quote, ExecOutput, RemoteRunner, DEFAULT_TIMEOUT};
use crate::Result;

/// Delay between the payload send-keys and the Enter send-keys. The
/// target line-editor misses the newline without this pause; the
/// two-stage send is a hard contract, not a tuning knob.
pub const SEND_KEYS_DELAY: Duration = Duration::from_millis(300);

/// Infrastructure sessions excluded from discovery.
const INFRA_SESSIONS: [&str; 2] = ["agent-bridge", "slack-bridge"];

/// High-level tmux operations across a configured host set.
#[derive(Clone)]
pub struct SessionService {
    runner: Arc<dyn RemoteRunner>,
    hosts: Vec<String>,
}

impl SessionService {
    #[must_use]
    pub fn new(runner: Arc<dyn RemoteRunner>, hosts: Vec<String>) -> Self {
        Self { runner, hosts }
    }

    /// Configured hosts, in priority order.
    #[must_use]
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// The default host for new sessions.
    #[must_use]
    pub fn default_host(&self) -> &str {
        self.hosts.first().map_or("", String::as_str)
    }

    /// Whether a host is in the configured set.
    #[must_use]
    pub fn is_known_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h == host)
    }

    async fn run(&self, host: &str, cmd: String) -> Result<ExecOutput> {
        self.runner.run(host, &cmd, DEFAULT_TIMEOUT).await
    }

    /// List tmux sessions per host, fanning out in parallel. A failing
    /// host contributes an empty list; the other hosts still report.
    pub async fn list_all(&self) -> HashMap<String, Vec<String>> {
        let mut join_set = JoinSet::new();
        for host in self.hosts.clone() {
            let runner = Arc::clone(&self.runner);
            join_set.spawn(async move {
                let result = runner
                    .run(
                        &host,
                        "tmux list-sessions -F '#{session_name}' 2>/dev/null || true",
                        DEFAULT_TIMEOUT,
                    )
                    .await;
                (host, result)
            });
        }

        let mut listings: HashMap<String, Vec<String>> = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            let Ok((host, result)) = joined else { continue };
            let names = match result {
                Ok(output) if output.ok() => output
                    .stdout
                    .lines()
                    .map(str::trim)
                    .filter(|name| !name.is_empty() && !INFRA_SESSIONS.contains(name))
                    .map(str::to_owned)
                    .collect(),
                Ok(_) => Vec::new(),
                Err(err) => {
                    warn!(host, %err, "tmux listing failed; recording empty set");
                    Vec::new()
                }
            };
            listings.insert(host, names);
        }
        listings
    }

    /// Find which host has a session with this name. Queries all hosts in
    /// parallel; the first positive answer wins.
    pub async fn find_host(&self, session_name: &str) -> Option<String> {
        let safe = shell_quote(session_name);
        let mut join_set = JoinSet::new();
        for host in self.hosts.clone() {
            let runner = Arc::clone(&self.runner);
            let cmd = format!("tmux has-session -t {safe} 2>/dev/null && echo found");
            join_set.spawn(async move {
                let found = matches!(
                    runner.run(&host, &cmd, DEFAULT_TIMEOUT).await,
                    Ok(output) if output.ok() && output.stdout.contains("found")
                );
                (host, found)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            if let Ok((host, true)) = joined {
                join_set.abort_all();
                return Some(host);
            }
        }
        None
    }

    /// Create a detached session, optionally with an initial working
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Remote` if tmux reports failure.
    pub async fn create(
        &self,
        name: &str,
        host: &str,
        working_dir: Option<&str>,
    ) -> Result<bool> {
        let mut cmd = format!("tmux new-session -d -s {}", shell_quote(name));
        if let Some(dir) = working_dir {
            cmd.push_str(&format!(" -c {}", shell_quote(dir)));
        }
        let output = self.run(host, cmd).await?;
        if output.ok() {
            info!(name, host, "created tmux session");
        } else {
            warn!(name, host, code = output.code, "tmux create failed");
        }
        Ok(output.ok())
    }

    /// Locate and destroy a session. Returns `(killed, host)`.
    pub async fn kill(&self, name: &str) -> (bool, Option<String>) {
        let Some(host) = self.find_host(name).await else {
            warn!(name, "cannot kill: session not found on any host");
            return (false, None);
        };
        let cmd = format!("tmux kill-session -t {}", shell_quote(name));
        let killed = matches!(self.run(&host, cmd).await, Ok(output) if output.ok());
        if killed {
            info!(name, host, "killed tmux session");
        } else {
            warn!(name, host, "tmux kill failed");
        }
        (killed, Some(host))
    }

    /// Send text into a session's pane.
    ///
    /// Two-stage: transmit the payload, pause [`SEND_KEYS_DELAY`], then
    /// transmit the terminal newline as a separate invocation.
    pub async fn send(&self, host: &str, session: &str, message: &str) -> bool {
        let safe_session = shell_quote(session);
        let safe_message = shell_quote(message);

        let typed = self
            .run(host, format!("tmux send-keys -t {safe_session} {safe_message}"))
            .await;
        if !matches!(typed, Ok(ref output) if output.ok()) {
            return false;
        }

        tokio::time::sleep(SEND_KEYS_DELAY).await;

        let entered = self
            .run(host, format!("tmux send-keys -t {safe_session} Enter"))
            .await;
        matches!(entered, Ok(output) if output.ok())
    }

    /// Current working directory of the session's active pane.
    pub async fn working_dir(&self, host: &str, session: &str) -> Option<String> {
        let safe = shell_quote(session);
        let cmd =
            format!("tmux display-message -t {safe} -p '#{{pane_current_path}}' 2>/dev/null");
        match self.run(host, cmd).await {
            Ok(output) if output.ok() && !output.stdout.is_empty() => Some(output.stdout),
            _ => None,
        }
    }

    /// Foreground process name of the session's active pane.
    pub async fn pane_command(&self, host: &str, session: &str) -> Option<String> {
        let safe = shell_quote(session);
        let cmd =
            format!("tmux display-message -t {safe} -p '#{{pane_current_command}}' 2>/dev/null");
        match self.run(host, cmd).await {
            Ok(output) if output.ok() && !output.stdout.is_empty() => Some(output.stdout),
            _ => None,
        }
    }

    /// Visible pane content (up to `tail` trailing lines).
    pub async fn capture_pane(&self, host: &str, session: &str, tail: u32) -> Option<String> {
        let safe = shell_quote(session);
        let cmd = format!("tmux capture-pane -t {safe} -p | tail -{tail}");
        match self.run(host, cmd).await {
            Ok(output) if output.ok() => Some(output.stdout),
            _ => None,
        }
    }
}
