//! Session reconciler: periodic cross-host tmux poll that diffs live
//! sessions against the stored table, drives the status state machine,
//! and publishes lifecycle events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{Event, EventBus};
use crate::models::session::{Session, SessionStatus};
use crate::persistence::event_repo::EventRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::services::platform::PlatformService;
use crate::services::session::SessionService;
use crate::Result;

/// Shared dependencies for the reconciler.
#[derive(Clone)]
pub struct Reconciler {
    pub sessions: SessionService,
    pub platform: PlatformService,
    pub repo: SessionRepo,
    pub audit: EventRepo,
    pub bus: Arc<EventBus>,
}

/// Spawn the reconciler loop at the given cadence.
#[must_use]
pub fn spawn(reconciler: Reconciler, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "session reconciler started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("session reconciler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = reconciler.tick().await {
                        error!(%err, "reconciler tick failed");
                    }
                }
            }
        }
    })
}

impl Reconciler {
    /// One reconciliation pass.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on store failure. Remote failures are
    /// absorbed per host as empty listings.
    pub async fn tick(&self) -> Result<()> {
        // 1. Snapshot live sessions per host; first host wins a name.
        let listings = self.sessions.list_all().await;
        let mut live: HashMap<String, String> = HashMap::new();
        for (host, names) in &listings {
            for name in names {
                if let Some(existing) = live.get(name) {
                    // Duplicate tmux sessions across hosts are a
                    // misconfiguration; note it and keep the first win.
                    warn!(name, first = %existing, also = %host, "session present on multiple hosts");
                    self.audit
                        .append(
                            "session.duplicate",
                            Some(name),
                            &json!({ "first": existing, "also": host }),
                        )
                        .await?;
                } else {
                    live.insert(name.clone(), host.clone());
                }
            }
        }

        // 2. Snapshot stored non-closed sessions.
        let stored: HashMap<String, Session> = self
            .repo
            .list_open()
            .await?
            .into_iter()
            .map(|session| (session.name.clone(), session))
            .collect();

        // 3. Live but not stored: discover.
        for (name, host) in &live {
            if !stored.contains_key(name) {
                self.discover(name, host).await?;
            }
        }

        // 4 & 5. Stored: refresh the live ones, close the vanished.
        for (name, session) in &stored {
            match live.get(name) {
                Some(host) => self.refresh(session, host).await?,
                None => {
                    if session.status == SessionStatus::Active {
                        self.close(session).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn discover(&self, name: &str, host: &str) -> Result<()> {
        let inserted = self.repo.insert(&Session::new(name, host)).await?;
        if !inserted {
            // A closed row with this name exists; rediscovery reopens it.
            self.repo.set_host(name, host).await?;
            self.repo.set_status(name, SessionStatus::Active).await?;
        }
        info!(name, host, "discovered new session");

        let discord_thread = self.platform.find_discord_thread(name).await;
        let slack_thread = self.platform.find_slack_thread(name).await;
        let slack_channel = slack_thread
            .is_some()
            .then(|| self.platform.slack_channel().to_owned());
        if discord_thread.is_some() || slack_thread.is_some() {
            self.repo
                .set_thread_anchors(
                    name,
                    discord_thread.as_deref(),
                    slack_thread.as_deref(),
                    slack_channel.as_deref(),
                )
                .await?;
        }

        if let Some(working_dir) = self.sessions.working_dir(host, name).await {
            self.repo.set_working_dir(name, &working_dir).await?;
        }

        if let Some(session) = self.repo.get(name).await? {
            self.bus
                .publish(&Event::session_created(serde_json::to_value(&session)?));
        }
        self.audit
            .append("session.created", Some(name), &json!({ "host": host }))
            .await?;
        Ok(())
    }

    async fn refresh(&self, session: &Session, live_host: &str) -> Result<()> {
        let status_changed = session.status != SessionStatus::Active;
        let host_changed = session.host.as_deref() != Some(live_host);

        if status_changed {
            let old = session.status;
            self.repo
                .transition_status(&session.name, SessionStatus::Active)
                .await?;
            if let Some(updated) = self.repo.get(&session.name).await? {
                self.bus.publish(&Event::session_status_changed(
                    serde_json::to_value(&updated)?,
                    old.as_str(),
                    SessionStatus::Active.as_str(),
                ));
            }
        }
        if host_changed {
            // First-positive-wins host mapping; a move is recorded, not
            // second-guessed.
            self.repo.set_host(&session.name, live_host).await?;
            self.audit
                .append(
                    "session.host_changed",
                    Some(&session.name),
                    &json!({ "from": session.host, "to": live_host }),
                )
                .await?;
        }
        self.repo.touch(&session.name).await?;

        if status_changed || host_changed {
            if let Some(updated) = self.repo.get(&session.name).await? {
                self.bus
                    .publish(&Event::session_updated(serde_json::to_value(&updated)?));
            }
        }
        Ok(())
    }

    async fn close(&self, session: &Session) -> Result<()> {
        self.repo
            .transition_status(&session.name, SessionStatus::Closed)
            .await?;
        info!(name = %session.name, host = ?session.host, "session gone; marked closed");

        if let Some(closed) = self.repo.get(&session.name).await? {
            self.bus
                .publish(&Event::session_closed(serde_json::to_value(&closed)?));
        }
        self.audit
            .append(
                "session.closed",
                Some(&session.name),
                &json!({ "host": session.host }),
            )
            .await?;
        Ok(())
    }
}
