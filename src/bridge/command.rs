//! `!` command parsing and shared report formatting for both bridges.

use std::collections::BTreeMap;
use std::collections::HashSet;

/// A parsed `!` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    /// `!new NAME [HOST] [CWD]`
    New {
        name: String,
        host: Option<String>,
        working_dir: Option<String>,
    },
    /// `!kill NAME`
    Kill { name: String },
    /// `!sessions` / `!ls`
    Sessions,
    /// `!queue` — list pending entries.
    QueueList,
    /// `!queue add NAME CMD`
    QueueAdd { name: String, command: String },
    /// `!queue execute`
    QueueExecute,
    /// Anything else starting with `!`.
    Unknown,
}

impl BridgeCommand {
    /// Parse a message that starts with `!`. Returns `None` for text
    /// that is not a command at all.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with('!') {
            return None;
        }
        let parts = split_args(text, 4);
        let command = parts.first().map(|c| c.to_lowercase()).unwrap_or_default();
        let arg1 = parts.get(1).copied();
        let arg2 = parts.get(2).copied();
        let arg3 = parts.get(3).copied();

        Some(match command.as_str() {
            "!new" => match arg1 {
                Some(name) if !name.is_empty() => Self::New {
                    name: name.to_owned(),
                    host: arg2.filter(|h| !h.is_empty()).map(str::to_owned),
                    working_dir: arg3.filter(|d| !d.is_empty()).map(str::to_owned),
                },
                _ => Self::Unknown,
            },
            "!kill" => match arg1 {
                Some(name) if !name.is_empty() => Self::Kill {
                    name: name.to_owned(),
                },
                _ => Self::Unknown,
            },
            "!sessions" | "!ls" => Self::Sessions,
            "!queue" => match arg1 {
                None => Self::QueueList,
                Some("execute") => Self::QueueExecute,
                Some("add") => match (arg2, arg3) {
                    (Some(name), Some(cmd)) if !name.is_empty() && !cmd.is_empty() => {
                        Self::QueueAdd {
                            name: name.to_owned(),
                            command: cmd.to_owned(),
                        }
                    }
                    _ => Self::Unknown,
                },
                _ => Self::Unknown,
            },
            _ => Self::Unknown,
        })
    }
}

/// Split into at most `max` tokens, collapsing whitespace runs between
/// the leading tokens while preserving the trailing remainder verbatim.
fn split_args(text: &str, max: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text.trim();
    while parts.len() + 1 < max && !rest.is_empty() {
        match rest.split_once(char::is_whitespace) {
            Some((head, tail)) => {
                parts.push(head);
                rest = tail.trim_start();
            }
            None => {
                parts.push(rest);
                rest = "";
            }
        }
    }
    if !rest.is_empty() {
        parts.push(rest);
    }
    parts
}

/// Usage line posted for unrecognized commands.
pub const USAGE: &str = "Unknown command. Available: `!new <name> [host] [cwd]`, \
                         `!kill <name>`, `!sessions`, `!queue [add <name> <cmd> | execute]`";

/// Render the `!sessions` report: per-name host and sync state against
/// the set of active platform threads.
#[must_use]
pub fn format_sessions_report(
    tmux_sessions: &BTreeMap<String, String>,
    active_threads: &HashSet<String>,
) -> String {
    let mut names: Vec<&str> = tmux_sessions
        .keys()
        .map(String::as_str)
        .chain(active_threads.iter().map(String::as_str))
        .collect();
    names.sort_unstable();
    names.dedup();

    if names.is_empty() {
        return "No sessions found.".to_owned();
    }

    let mut lines = vec!["```".to_owned()];
    for name in names {
        let host = tmux_sessions.get(name).map_or("---", String::as_str);
        let sync = match (tmux_sessions.contains_key(name), active_threads.contains(name)) {
            (true, true) => "synced",
            (true, false) => "no thread",
            (false, _) => "orphan thread",
        };
        lines.push(format!("  {name:<20} {host:<24} {sync}"));
    }
    lines.push("```".to_owned());
    lines.join("\n")
}

/// The chat-visible failure message for a send that did not land.
#[must_use]
pub fn send_failure_message(name: &str, host: &str) -> String {
    format!("Failed to send to `{name}` on `{host}`. The session may have exited.")
}
