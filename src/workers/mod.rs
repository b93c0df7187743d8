//! Long-running background loops.
//!
//! Each worker runs on its own interval, logs failures, and continues to
//! the next cycle; cancellation comes from the shared token on shutdown.

pub mod message_sync;
pub mod reconciler;
pub mod transcript_ingest;
pub mod usage_poller;
