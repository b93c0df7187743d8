//! Non-blocking remote command execution over ssh.
//!
//! Connections to the same host are multiplexed through ssh's
//! `ControlMaster`, so warm follow-up calls skip the handshake. The
//! control socket persists for five minutes of idleness.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, warn};

use crate::{AppError, Result};

/// Default per-call deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Captured result of a remote command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Process exit code (non-zero on failure).
    pub code: i32,
    /// Trimmed standard output.
    pub stdout: String,
}

impl ExecOutput {
    /// Whether the command exited successfully.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.code == 0
    }
}

/// Transport for running commands on a named remote host.
///
/// The production implementation shells out to `ssh`; tests substitute a
/// scripted mock. The helper is a pure transport: callers are responsible
/// for shell-escaping any interpolated values.
#[async_trait]
pub trait RemoteRunner: Send + Sync {
    /// Run `cmd` on `host`, enforcing `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::RemoteTimeout` when the deadline expires (the
    /// spawned child is killed first) and `AppError::Remote` when the
    /// process cannot be spawned.
    async fn run(&self, host: &str, cmd: &str, timeout: Duration) -> Result<ExecOutput>;
}

/// `RemoteRunner` backed by the system `ssh` client.
#[derive(Debug, Clone, Default)]
pub struct SshRunner;

#[async_trait]
impl RemoteRunner for SshRunner {
    async fn run(&self, host: &str, cmd: &str, timeout: Duration) -> Result<ExecOutput> {
        let mut child = Command::new("ssh")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("ControlMaster=auto")
            .arg("-o")
            .arg("ControlPath=~/.ssh/agent-relay-%r@%h:%p")
            .arg("-o")
            .arg("ControlPersist=300")
            .arg(host)
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AppError::Remote(format!("ssh spawn failed for {host}: {err}")))?;

        let waited = tokio::time::timeout(timeout, child.wait_with_output()).await;
        match waited {
            Ok(Ok(output)) => {
                let code = output.status.code().unwrap_or(1);
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
                if code != 0 {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let stderr = stderr.trim();
                    if !stderr.is_empty() {
                        warn!(host, code, stderr, "remote command failed");
                    }
                }
                Ok(ExecOutput { code, stdout })
            }
            Ok(Err(err)) => Err(AppError::Remote(format!("ssh wait failed for {host}: {err}"))),
            Err(_) => {
                // wait_with_output consumed the child; kill_on_drop already
                // reaped it when the future was dropped by the timeout.
                let mut cut = cmd.len().min(80);
                while cut > 0 && !cmd.is_char_boundary(cut) {
                    cut -= 1;
                }
                error!(host, cmd = &cmd[..cut], "remote command timed out");
                Err(AppError::RemoteTimeout(format!(
                    "command on {host} exceeded {}s",
                    timeout.as_secs()
                )))
            }
        }
    }
}

/// POSIX single-quote escaping for values interpolated into remote shell
/// commands. `'` becomes `'\''`; everything else is literal inside the
/// quotes.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}
