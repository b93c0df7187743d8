//! Tracked background task spawning.
//!
//! Every fire-and-forget spawn in the process goes through
//! [`TaskTracker::spawn`]: the handle is stored, removed on completion,
//! and a panic or error is logged instead of vanishing with the handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Registry of in-flight background tasks.
#[derive(Debug, Default, Clone)]
pub struct TaskTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl TaskTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a tracked task. The completion watcher logs any panic and
    /// removes the entry, so no task is ever silently lost.
    pub fn spawn<F>(&self, label: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let watched = tokio::spawn(future);
            match watched.await {
                Ok(()) => debug!(label, id, "background task completed"),
                Err(err) if err.is_cancelled() => {
                    debug!(label, id, "background task cancelled");
                }
                Err(err) => error!(label, id, %err, "background task panicked"),
            }
            if let Ok(mut tasks) = inner.tasks.lock() {
                tasks.remove(&id);
            }
        });

        if let Ok(mut tasks) = self.inner.tasks.lock() {
            tasks.insert(id, handle);
        }
    }

    /// Number of tasks still in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Whether no tasks are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every tracked task. Used on shutdown.
    pub fn abort_all(&self) {
        if let Ok(mut tasks) = self.inner.tasks.lock() {
            for (_, handle) in tasks.drain() {
                handle.abort();
            }
        }
    }
}
