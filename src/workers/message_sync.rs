//! Message-sync worker: periodic pull of platform thread messages keyed
//! on the high-watermark `source_id` per (session, source).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{Event, EventBus};
use crate::models::message::MessageSource;
use crate::persistence::message_repo::MessageRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::services::message::MessageService;
use crate::services::platform::PlatformService;
use crate::Result;

/// Settle delay before the first cycle, giving the reconciler a chance
/// to populate the session table.
const INITIAL_DELAY: Duration = Duration::from_secs(15);
/// Pause between sessions, to stay friendly to platform rate limits.
const PER_SESSION_PAUSE: Duration = Duration::from_secs(1);

/// Shared dependencies for the sync worker.
#[derive(Clone)]
pub struct MessageSync {
    pub platform: PlatformService,
    pub messages: MessageService,
    pub message_repo: MessageRepo,
    pub session_repo: SessionRepo,
    pub bus: Arc<EventBus>,
}

/// Spawn the message-sync loop at the given cadence.
#[must_use]
pub fn spawn(sync: MessageSync, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "message sync worker started");
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(INITIAL_DELAY) => {}
        }

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("message sync worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match sync.sync_once().await {
                        Ok(total) if total > 0 => {
                            info!(total, "message sync complete");
                        }
                        Ok(_) => {}
                        Err(err) => error!(%err, "message sync cycle failed"),
                    }
                }
            }
        }
    })
}

impl MessageSync {
    /// One sync pass over every active session with a thread anchor.
    /// Per-session failures are logged and do not abort the batch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` only when the session listing itself
    /// fails.
    pub async fn sync_once(&self) -> Result<u64> {
        let mut total = 0;

        if self.platform.has_discord() {
            let bot_user_id = self.platform.discord_bot_user_id().await;
            for session in self.session_repo.list_active_discord().await? {
                let Some(thread_id) = session.discord_thread_id.clone() else {
                    continue;
                };
                match self
                    .sync_discord_session(&session.name, &thread_id, bot_user_id.as_deref())
                    .await
                {
                    Ok(count) => total += count,
                    Err(err) => {
                        warn!(session = %session.name, %err, "discord sync failed for session");
                    }
                }
                tokio::time::sleep(PER_SESSION_PAUSE).await;
            }
        }

        if self.platform.has_slack() {
            let bot_user_id = self.platform.slack_bot_user_id().await;
            for session in self.session_repo.list_active_slack().await? {
                let Some(thread_ts) = session.slack_thread_ts.clone() else {
                    continue;
                };
                let channel = session
                    .slack_channel_id
                    .clone()
                    .unwrap_or_else(|| self.platform.slack_channel().to_owned());
                match self
                    .sync_slack_session(&session.name, &channel, &thread_ts, bot_user_id.as_deref())
                    .await
                {
                    Ok(count) => total += count,
                    Err(err) => {
                        warn!(session = %session.name, %err, "slack sync failed for session");
                    }
                }
                tokio::time::sleep(PER_SESSION_PAUSE).await;
            }
        }

        Ok(total)
    }

    async fn sync_discord_session(
        &self,
        session_name: &str,
        thread_id: &str,
        bot_user_id: Option<&str>,
    ) -> Result<u64> {
        let after = self
            .message_repo
            .latest_source_id(session_name, MessageSource::Discord)
            .await?;
        let batch = self
            .platform
            .fetch_all_discord_messages(thread_id, after.as_deref())
            .await;
        if batch.is_empty() {
            return Ok(0);
        }
        let count = self
            .messages
            .ingest_discord_batch(session_name, &batch, bot_user_id)
            .await?;
        if count > 0 {
            self.bus
                .publish(&Event::sync_complete(session_name, "discord", count));
        }
        Ok(count)
    }

    async fn sync_slack_session(
        &self,
        session_name: &str,
        channel: &str,
        thread_ts: &str,
        bot_user_id: Option<&str>,
    ) -> Result<u64> {
        let after = self
            .message_repo
            .latest_source_id(session_name, MessageSource::Slack)
            .await?;
        let batch = self
            .platform
            .fetch_all_slack_replies(channel, thread_ts, after.as_deref())
            .await;
        if batch.is_empty() {
            return Ok(0);
        }
        let count = self
            .messages
            .ingest_slack_batch(session_name, &batch, bot_user_id)
            .await?;
        if count > 0 {
            self.bus
                .publish(&Event::sync_complete(session_name, "slack", count));
        }
        Ok(count)
    }
}
