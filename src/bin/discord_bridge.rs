#![forbid(unsafe_code)]

//! `agent-relay-discord` — Discord bridge binary.
//!
//! Holds the Discord gateway connection, dispatches `!` commands, and
//! forwards `[agent]`-thread messages into tmux sessions. Runs as its
//! own process beside the control plane; exits non-zero when the
//! Discord credentials are missing.

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::bridge::discord::DiscordBridge;
use agent_relay::config::Config;
use agent_relay::remote::SshRunner;
use agent_relay::services::session::SessionService;
use agent_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay-discord", about = "Discord tmux bridge", version, long_about = None)]
struct Cli {
    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => fmt().with_env_filter(filter).init(),
        LogFormat::Json => fmt().json().with_env_filter(filter).init(),
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run())
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    let sessions = SessionService::new(Arc::new(SshRunner), config.ssh_hosts.clone());
    let bridge = DiscordBridge::new(&config, sessions)?;

    info!(hosts = ?config.ssh_hosts, "starting discord bridge");
    bridge.run().await;
    Ok(())
}
