#![forbid(unsafe_code)]

//! `agent-relay` — control-plane binary.
//!
//! Bootstraps configuration, opens the store, wires services and
//! background workers, and serves the HTTP/WebSocket surface.

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::bus::EventBus;
use agent_relay::config::Config;
use agent_relay::http::{self, AppState};
use agent_relay::persistence::event_repo::EventRepo;
use agent_relay::persistence::kv::Kv;
use agent_relay::persistence::message_repo::MessageRepo;
use agent_relay::persistence::queue_repo::QueueRepo;
use agent_relay::persistence::session_repo::SessionRepo;
use agent_relay::persistence::usage_repo::UsageRepo;
use agent_relay::persistence::db;
use agent_relay::remote::SshRunner;
use agent_relay::services::message::MessageService;
use agent_relay::services::platform::PlatformService;
use agent_relay::services::session::SessionService;
use agent_relay::services::transcript::TranscriptService;
use agent_relay::services::usage::UsageService;
use agent_relay::tasks::TaskTracker;
use agent_relay::workers::message_sync::{self, MessageSync};
use agent_relay::workers::reconciler::{self, Reconciler};
use agent_relay::workers::transcript_ingest::{self, TranscriptIngest};
use agent_relay::workers::usage_poller;
use agent_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Multi-agent session orchestrator", version, long_about = None)]
struct Cli {
    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP bind port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the store path.
    #[arg(long)]
    db_path: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format);
    info!("agent-relay control plane bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => fmt().with_env_filter(filter).init(),
        LogFormat::Json => fmt().json().with_env_filter(filter).init(),
    }
}

#[allow(clippy::too_many_lines)] // Startup sequence is inherently sequential.
async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    let config = Arc::new(config);
    info!(
        hosts = ?config.ssh_hosts,
        db = %config.db_path,
        discord = config.has_discord(),
        slack = config.has_slack(),
        auth = !config.dashboard_token.is_empty(),
        "configuration loaded"
    );

    // ── Initialize database (fatal on failure) ──────────
    let db = match db::connect(&config.db_path).await {
        Ok(pool) => Arc::new(pool),
        Err(err) => {
            error!(%err, "store init failed");
            return Err(err);
        }
    };
    info!("database connected");

    // ── Repositories and services ───────────────────────
    let bus = Arc::new(EventBus::new());
    let session_repo = SessionRepo::new(Arc::clone(&db));
    let message_repo = MessageRepo::new(Arc::clone(&db));
    let kv = Kv::new(Arc::clone(&db));
    let audit = EventRepo::new(Arc::clone(&db));
    let usage_repo = UsageRepo::new(Arc::clone(&db));
    let queue_repo = QueueRepo::new(Arc::clone(&db));

    let runner = Arc::new(SshRunner);
    let sessions = SessionService::new(runner.clone(), config.ssh_hosts.clone());
    let platform = PlatformService::new(
        &config.discord_bot_token,
        &config.discord_channel_id,
        &config.slack_bot_token,
        &config.slack_channel_id,
        &config.thread_name_format,
    )?;
    let messages = MessageService::new(
        Arc::clone(&bus),
        session_repo.clone(),
        message_repo.clone(),
        audit.clone(),
        config.transcript_max_content,
    );
    let transcripts = TranscriptService::new(
        runner,
        messages.clone(),
        kv.clone(),
        config.transcript_max_lines,
    );

    let usage = if config.anthropic_api_key.is_empty()
        && config.openai_api_key.is_empty()
        && !config.enable_command_queue
    {
        None
    } else {
        Some(UsageService::new(
            Arc::clone(&bus),
            usage_repo,
            queue_repo,
            sessions.clone(),
            config.anthropic_api_key.clone(),
            config.openai_api_key.clone(),
            config.usage_poll_model_anthropic.clone(),
            config.usage_poll_model_openai.clone(),
            config.enable_command_queue,
            config.usage_retention_hours,
        )?)
    };

    let sync = MessageSync {
        platform: platform.clone(),
        messages: messages.clone(),
        message_repo: message_repo.clone(),
        session_repo: session_repo.clone(),
        bus: Arc::clone(&bus),
    };

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        db: Arc::clone(&db),
        bus: Arc::clone(&bus),
        sessions: sessions.clone(),
        platform: platform.clone(),
        messages: messages.clone(),
        transcripts: transcripts.clone(),
        usage: usage.clone(),
        session_repo: session_repo.clone(),
        message_repo,
        kv,
        audit: audit.clone(),
        sync: sync.clone(),
        tasks: TaskTracker::new(),
        rate_limiter: http::rate_limit::RateLimiter::new(),
        shutdown: shutdown.clone(),
    });

    // ── Background workers ──────────────────────────────
    let mut workers = Vec::new();
    if config.enable_session_poller {
        workers.push(reconciler::spawn(
            Reconciler {
                sessions: sessions.clone(),
                platform: platform.clone(),
                repo: session_repo.clone(),
                audit,
                bus: Arc::clone(&bus),
            },
            std::time::Duration::from_secs(config.poll_interval),
            shutdown.clone(),
        ));
        workers.push(message_sync::spawn(
            sync,
            std::time::Duration::from_secs(config.sync_interval),
            shutdown.clone(),
        ));
    }
    if config.enable_jsonl_ingester {
        workers.push(transcript_ingest::spawn(
            TranscriptIngest {
                transcripts,
                session_repo,
            },
            std::time::Duration::from_secs(config.transcript_interval),
            shutdown.clone(),
        ));
    }
    if config.enable_usage_poller {
        if let Some(ref usage) = usage {
            workers.push(usage_poller::spawn(
                usage.clone(),
                std::time::Duration::from_secs(config.usage_poll_interval),
                shutdown.clone(),
            ));
        }
    }

    // ── Shutdown wiring ─────────────────────────────────
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    // ── Serve ───────────────────────────────────────────
    let serve_result = http::serve(Arc::clone(&state)).await;

    shutdown.cancel();
    for worker in workers {
        let _ = worker.await;
    }
    state.tasks.abort_all();
    db.close().await;
    info!("shutdown complete");

    serve_result
}
