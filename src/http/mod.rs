//! HTTP + WebSocket surface: request pipeline, JSON API, and the
//! browser transport.
//!
//! Pipeline order: access log → token-bucket rate limiter → auth.

pub mod auth;
pub mod error;
pub mod hooks;
pub mod pages;
pub mod prefs;
pub mod rate_limit;
pub mod search;
pub mod sessions;
pub mod stats;
pub mod usage;
pub mod ws;

use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::EventBus;
use crate::config::Config;
use crate::persistence::db::Database;
use crate::persistence::event_repo::EventRepo;
use crate::persistence::kv::Kv;
use crate::persistence::message_repo::MessageRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::services::message::MessageService;
use crate::services::platform::PlatformService;
use crate::services::session::SessionService;
use crate::services::transcript::TranscriptService;
use crate::services::usage::UsageService;
use crate::tasks::TaskTracker;
use crate::workers::message_sync::MessageSync;
use crate::{AppError, Result};

/// Shared application state rooted at the process entry point.
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub bus: Arc<EventBus>,
    pub sessions: SessionService,
    pub platform: PlatformService,
    pub messages: MessageService,
    pub transcripts: TranscriptService,
    /// Present when at least one provider key or the queue is configured.
    pub usage: Option<UsageService>,
    pub session_repo: SessionRepo,
    pub message_repo: MessageRepo,
    pub kv: Kv,
    pub audit: EventRepo,
    pub sync: MessageSync,
    pub tasks: TaskTracker,
    pub rate_limiter: rate_limit::RateLimiter,
    /// Cancelled on shutdown; WebSocket sessions close with 1001.
    pub shutdown: CancellationToken,
}

/// Build the router with the full middleware pipeline.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/healthz", get(pages::healthz))
        // Session CRUD
        .route(
            "/api/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route(
            "/api/sessions/bulk-delete",
            post(sessions::bulk_delete_sessions),
        )
        .route(
            "/api/sessions/{name}",
            get(sessions::get_session)
                .delete(sessions::delete_session)
                .patch(sessions::patch_session),
        )
        .route("/api/sessions/{name}/send", post(sessions::send_message))
        .route("/api/sessions/{name}/messages", get(sessions::list_messages))
        .route("/api/sessions/{name}/sync", post(sessions::trigger_sync))
        .route(
            "/api/sessions/{name}/ingest",
            post(sessions::trigger_transcript_ingest),
        )
        .route("/api/sessions/{name}/export", get(sessions::export_session))
        // Search
        .route("/api/messages/search", get(search::search_messages))
        // Preferences + settings
        .route(
            "/api/preferences",
            get(prefs::get_preferences).put(prefs::set_preferences),
        )
        .route(
            "/api/preferences/{key}",
            get(prefs::get_preference).put(prefs::set_preference),
        )
        .route(
            "/api/settings",
            get(prefs::get_settings).put(prefs::put_settings),
        )
        // Stats
        .route("/api/stats", get(stats::get_stats))
        // Usage + command queue
        .route("/api/usage", get(usage::get_current))
        .route("/api/usage/history", get(usage::get_history))
        .route("/api/usage/summary", get(usage::get_summary))
        .route(
            "/api/usage/queue",
            get(usage::list_queue).post(usage::enqueue_command),
        )
        .route("/api/usage/queue/{id}", delete(usage::cancel_command))
        .route("/api/usage/queue/execute", post(usage::execute_queue))
        // Bridge webhook (no auth, always 202)
        .route("/api/hooks/event", post(hooks::receive_event))
        // WebSocket
        .route("/ws", get(ws::ws_handler))
        // Pages
        .route("/", get(pages::index_page))
        .route("/sessions", get(pages::sessions_page))
        .route("/sessions/{name}", get(pages::session_detail_page))
        .route("/login", get(pages::login_page).post(pages::login_submit))
        .route("/logout", get(pages::logout))
        // Middleware: last layer added runs first.
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::auth_layer,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            rate_limit::rate_limit_layer,
        ))
        .layer(middleware::from_fn(access_log))
        .with_state(state)
}

/// Access-log middleware: one line per request with method, path,
/// status.
async fn access_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = std::time::Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis(),
        "request"
    );
    response
}

/// Bind and serve until the shutdown token fires.
///
/// # Errors
///
/// Returns `AppError::Io` if the listener cannot bind or serving fails.
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let bind = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|err| AppError::Io(format!("bind {bind}: {err}")))?;
    info!(bind, "dashboard listening");

    let shutdown = state.shutdown.clone();
    let router = build_router(state);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .map_err(|err| AppError::Io(format!("serve: {err}")))
}
