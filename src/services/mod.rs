//! High-level services over the store, the remote-exec helper, and the
//! platform REST APIs.

pub mod message;
pub mod platform;
pub mod session;
pub mod transcript;
pub mod usage;
