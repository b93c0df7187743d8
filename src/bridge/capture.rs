//! Background shell-output capture after a forwarded message.
//!
//! Capture only makes sense when the pane's foreground process is a
//! plain shell. An interactive agent has its own notification pipeline;
//! polling its pane would duplicate messages, so the capture task
//! abandons as soon as a non-shell foreground process is seen.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::services::session::SessionService;

/// Foreground process names treated as plain shells.
pub const SHELL_ALLOWLIST: [&str; 8] = ["bash", "zsh", "sh", "fish", "dash", "ksh", "tcsh", "csh"];

/// Initial settle delay before the first foreground check.
const SETTLE_DELAY: Duration = Duration::from_secs(1);
/// Poll cadence for the stability heuristic.
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Hard deadline on the capture wait.
const CAPTURE_DEADLINE: Duration = Duration::from_secs(30);
/// Trailing pane lines captured per poll.
const CAPTURE_TAIL: u32 = 200;

/// Whether a foreground process name is in the shell allow-list.
#[must_use]
pub fn is_shell(command: &str) -> bool {
    let name = command.rsplit('/').next().unwrap_or(command).trim();
    SHELL_ALLOWLIST.contains(&name)
}

/// The lines of `post` that were not already present at the end of the
/// common prefix with `pre` — the newly produced output.
#[must_use]
pub fn diff_new_output(pre: &str, post: &str) -> String {
    let pre_lines: Vec<&str> = pre.lines().collect();
    let post_lines: Vec<&str> = post.lines().collect();

    let mut common = 0;
    while common < pre_lines.len()
        && common < post_lines.len()
        && pre_lines[common] == post_lines[common]
    {
        common += 1;
    }
    post_lines[common..].join("\n").trim().to_owned()
}

#[allow(clippy::unwrap_used)] // patterns are compile-time constants
static KEY_VALUE_SECRET: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = r"(?i)\b([A-Za-z0-9_-]*(?:password|passwd|secret|token|api_?key|access_?key|credential)[A-Za-z0-9_-]*)\s*[=:]\s*(\S+)";
    Regex::new(pattern).unwrap()
});

#[allow(clippy::unwrap_used)] // pattern is a compile-time constant
static PEM_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)-----BEGIN [A-Z ]+-----.*?-----END [A-Z ]+-----").unwrap()
});

/// Redact password/token/key-like `key=value` shapes and PEM-bracketed
/// blocks before any capture leaves the host.
#[must_use]
pub fn redact_secrets(text: &str) -> String {
    let redacted = KEY_VALUE_SECRET.replace_all(text, "$1=[redacted]");
    PEM_BLOCK
        .replace_all(&redacted, "[redacted pem block]")
        .into_owned()
}

/// Escape embedded triple backticks so the capture cannot break out of
/// the chat platform's code fence.
#[must_use]
pub fn escape_backticks(text: &str) -> String {
    text.replace("```", "`\u{200b}`\u{200b}`")
}

/// Capture the shell output produced after a send.
///
/// `pre_content` is the pane content captured *before* the send; the
/// diff against it isolates the new output. Returns `None` when the
/// foreground process is (or becomes) an interactive agent, or when
/// nothing new appeared.
pub async fn capture_shell_output(
    sessions: &SessionService,
    host: &str,
    session: &str,
    pre_content: &str,
) -> Option<String> {
    tokio::time::sleep(SETTLE_DELAY).await;

    let foreground = sessions.pane_command(host, session).await?;
    if !is_shell(&foreground) {
        debug!(session, foreground, "foreground is an agent; skipping capture");
        return None;
    }

    // Stability heuristic: two consecutive identical captures means the
    // command is done; the deadline bounds the wait.
    let deadline = tokio::time::Instant::now() + CAPTURE_DEADLINE;
    let mut last_capture = String::new();
    let mut stable = String::new();

    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(POLL_INTERVAL).await;
        let Some(current) = sessions.capture_pane(host, session, CAPTURE_TAIL).await else {
            break;
        };
        if current == last_capture && !current.is_empty() {
            stable = current;
            break;
        }
        stable.clone_from(&current);
        last_capture = current;
    }

    // The command may have launched an agent mid-capture.
    let foreground = sessions.pane_command(host, session).await?;
    if !is_shell(&foreground) {
        debug!(session, foreground, "foreground morphed into an agent; dropping capture");
        return None;
    }

    let new_output = diff_new_output(pre_content, &stable);
    if new_output.is_empty() {
        return None;
    }
    Some(escape_backticks(&redact_secrets(&new_output)))
}
