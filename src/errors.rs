//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Remote command execution failure (ssh/tmux).
    Remote(String),
    /// Remote command exceeded its deadline; the host may be unreachable.
    RemoteTimeout(String),
    /// Discord or Slack REST API failure.
    Platform(String),
    /// Slack Socket Mode or gateway failure.
    Gateway(String),
    /// Upstream provider (usage polling) failure.
    Provider(String),
    /// Request input failed validation (name grammar, enum value, host).
    InvalidInput(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Entity already exists (duplicate session name).
    Conflict(String),
    /// Caller is not authorized to perform the requested action.
    Unauthorized(String),
    /// Feature is disabled by configuration.
    Disabled(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Remote(msg) => write!(f, "remote: {msg}"),
            Self::RemoteTimeout(msg) => write!(f, "remote timeout: {msg}"),
            Self::Platform(msg) => write!(f, "platform: {msg}"),
            Self::Gateway(msg) => write!(f, "gateway: {msg}"),
            Self::Provider(msg) => write!(f, "provider: {msg}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Disabled(msg) => write!(f, "disabled: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Platform(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput(format!("invalid json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
