//! Usage-poll worker: captures provider rate-limit snapshots, detects
//! limit/reset transitions, and purges expired snapshots on a slow
//! cadence.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::services::usage::UsageService;
use crate::Result;

/// Snapshot purge runs once per this many poll cycles (hourly at the
/// default 60 s interval).
const CLEANUP_EVERY_N_POLLS: u64 = 60;

/// Spawn the usage-poll loop at the given cadence.
#[must_use]
pub fn spawn(usage: UsageService, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let providers = usage.providers();
        info!(
            interval_secs = interval.as_secs(),
            ?providers,
            "usage poller started"
        );

        let mut ticker = tokio::time::interval(interval);
        let mut poll_count: u64 = 0;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("usage poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = poll_once(&usage).await {
                        error!(%err, "usage poll cycle failed");
                    }
                    poll_count += 1;
                    if poll_count % CLEANUP_EVERY_N_POLLS == 0 {
                        match usage.snapshots().purge_older_than(i64::from(usage.retention_hours())).await {
                            Ok(deleted) if deleted > 0 => {
                                info!(deleted, "purged old usage snapshots");
                            }
                            Ok(_) => {}
                            Err(err) => error!(%err, "usage snapshot purge failed"),
                        }
                    }
                }
            }
        }
    })
}

/// One poll cycle across all configured providers.
///
/// # Errors
///
/// Returns `AppError::Db` on store failure.
pub async fn poll_once(usage: &UsageService) -> Result<()> {
    for provider in usage.providers() {
        let previous = usage.previous_snapshot(provider).await?;
        let snapshot = usage.poll_provider(provider).await;
        usage.process_snapshot(&snapshot, previous.as_ref()).await?;
    }
    Ok(())
}
