//! Agent transcript discovery and incremental tail.
//!
//! Agents write newline-delimited JSON transcripts under
//! `~/.claude/projects/{sanitized_cwd}/*.jsonl` on the host running the
//! session. The tailer reads the last N lines over the remote-exec
//! helper and uses a per-session line-hash watermark in the kv table to
//! skip the already-ingested prefix.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::persistence::kv::Kv;
use crate::remote::{shell_quote, RemoteRunner};
use crate::services::message::{line_hash, MessageService};
use crate::Result;

/// kv key family for tail high-watermarks.
pub const OFFSET_PREFIX: &str = "transcript_offset:";

const DISCOVER_TIMEOUT: Duration = Duration::from_secs(10);
const TAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// Replace `/` with `-` and strip one leading `-` — the agent's
/// canonical per-project directory naming rule.
#[must_use]
pub fn sanitize_working_dir(working_dir: &str) -> String {
    let sanitized = working_dir.replace('/', "-");
    sanitized
        .strip_prefix('-')
        .map_or(sanitized.clone(), str::to_owned)
}

/// Tails per-session transcript files on remote hosts.
#[derive(Clone)]
pub struct TranscriptService {
    runner: Arc<dyn RemoteRunner>,
    messages: MessageService,
    kv: Kv,
    max_lines: u32,
}

impl TranscriptService {
    #[must_use]
    pub fn new(
        runner: Arc<dyn RemoteRunner>,
        messages: MessageService,
        kv: Kv,
        max_lines: u32,
    ) -> Self {
        Self {
            runner,
            messages,
            kv,
            max_lines,
        }
    }

    /// Find the transcript file for a session: the latest-modified
    /// `.jsonl` under the project directory derived from the working
    /// directory.
    pub async fn discover_path(
        &self,
        host: &str,
        working_dir: Option<&str>,
    ) -> Option<String> {
        let working_dir = working_dir?;
        let project_dir = format!("~/.claude/projects/{}", sanitize_working_dir(working_dir));
        let cmd = format!("ls -t {project_dir}/*.jsonl 2>/dev/null | head -1");

        match self.runner.run(host, &cmd, DISCOVER_TIMEOUT).await {
            Ok(output) if output.ok() && !output.stdout.is_empty() => {
                Some(output.stdout.lines().next()?.trim().to_owned())
            }
            _ => None,
        }
    }

    /// Read the last `max_lines` non-empty lines of the transcript.
    pub async fn read_tail(&self, host: &str, path: &str) -> Vec<String> {
        let cmd = format!("tail -{} {}", self.max_lines, shell_quote(path));
        match self.runner.run(host, &cmd, TAIL_TIMEOUT).await {
            Ok(output) if output.ok() => output
                .stdout
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_owned)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Full incremental ingest pass for one session. Returns the number
    /// of fresh messages persisted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failure. Remote failures yield
    /// zero rows rather than an error.
    pub async fn ingest_for_session(
        &self,
        host: &str,
        session_name: &str,
        working_dir: Option<&str>,
    ) -> Result<u64> {
        let Some(path) = self.discover_path(host, working_dir).await else {
            return Ok(0);
        };
        let lines = self.read_tail(host, &path).await;
        if lines.is_empty() {
            return Ok(0);
        }

        let kv_key = format!("{OFFSET_PREFIX}{session_name}");
        let watermark = self.kv.get(&kv_key).await?;

        let new_lines: &[String] = match watermark.as_deref() {
            Some(mark) => {
                match lines.iter().position(|line| line_hash(line) == mark) {
                    Some(idx) => &lines[idx + 1..],
                    // Watermarked line rotated out of the tail window;
                    // reprocess everything and let dedup elide repeats.
                    None => &lines[..],
                }
            }
            None => &lines[..],
        };

        let ingested = if new_lines.is_empty() {
            0
        } else {
            self.messages
                .ingest_transcript_lines(session_name, new_lines)
                .await?
        };

        if let Some(last) = lines.last() {
            self.kv.set(&kv_key, &line_hash(last)).await?;
        }

        if ingested > 0 {
            info!(session_name, path, ingested, "ingested transcript messages");
        } else {
            debug!(session_name, "transcript tail had nothing new");
        }
        Ok(ingested)
    }
}
