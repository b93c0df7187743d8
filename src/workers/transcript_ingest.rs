//! Transcript-tail worker: periodic incremental ingest of agent
//! transcript files for every active session with a known host.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::models::session::SessionStatus;
use crate::persistence::session_repo::{SessionFilter, SessionRepo};
use crate::services::transcript::TranscriptService;
use crate::Result;

/// Shared dependencies for the transcript worker.
#[derive(Clone)]
pub struct TranscriptIngest {
    pub transcripts: TranscriptService,
    pub session_repo: SessionRepo,
}

/// Spawn the transcript-tail loop at the given cadence.
#[must_use]
pub fn spawn(
    ingest: TranscriptIngest,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "transcript ingester started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("transcript ingester shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match ingest.ingest_once().await {
                        Ok(total) if total > 0 => info!(total, "transcript ingest complete"),
                        Ok(_) => {}
                        Err(err) => error!(%err, "transcript ingest cycle failed"),
                    }
                }
            }
        }
    })
}

impl TranscriptIngest {
    /// One pass over all active sessions. Per-session failure is logged
    /// and the batch continues.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` only when the session listing fails.
    pub async fn ingest_once(&self) -> Result<u64> {
        let filter = SessionFilter {
            status: Some(SessionStatus::Active),
            limit: 500,
            ..SessionFilter::default()
        };
        let (sessions, _) = self.session_repo.list(&filter).await?;

        let mut total = 0;
        for session in sessions {
            let Some(host) = session.host.clone() else {
                continue;
            };
            match self
                .transcripts
                .ingest_for_session(&host, &session.name, session.working_dir.as_deref())
                .await
            {
                Ok(count) => total += count,
                Err(err) => {
                    warn!(session = %session.name, %err, "transcript ingest failed for session");
                }
            }
        }
        Ok(total)
    }
}
