#![forbid(unsafe_code)]

//! `agent-relay` — multi-agent session orchestrator.
//!
//! Mediates between chat platforms (Discord, Slack), remote hosts running
//! tmux sessions that host interactive AI coding agents, and a browser/CLI
//! control plane backed by a local `SQLite` store.

pub use errors::{AppError, Result};

pub mod bridge;
pub mod bus;
pub mod config;
pub mod errors;
pub mod http;
pub mod models;
pub mod persistence;
pub mod remote;
pub mod services;
pub mod tasks;
pub mod workers;
