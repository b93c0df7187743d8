//! Shared fixtures: a scripted remote runner with a call transcript and
//! an in-memory application state.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tokio_util::sync::CancellationToken;

use agent_relay::bus::EventBus;
use agent_relay::config::Config;
use agent_relay::http::{build_router, rate_limit::RateLimiter, AppState};
use agent_relay::persistence::db;
use agent_relay::persistence::event_repo::EventRepo;
use agent_relay::persistence::kv::Kv;
use agent_relay::persistence::message_repo::MessageRepo;
use agent_relay::persistence::queue_repo::QueueRepo;
use agent_relay::persistence::session_repo::SessionRepo;
use agent_relay::persistence::usage_repo::UsageRepo;
use agent_relay::remote::{ExecOutput, RemoteRunner};
use agent_relay::services::message::MessageService;
use agent_relay::services::platform::PlatformService;
use agent_relay::services::session::SessionService;
use agent_relay::services::transcript::TranscriptService;
use agent_relay::services::usage::UsageService;
use agent_relay::tasks::TaskTracker;
use agent_relay::workers::message_sync::MessageSync;
use agent_relay::Result;

/// Scripted `RemoteRunner` recording every invocation.
#[derive(Default)]
pub struct MockRunner {
    /// Ordered (host, command) pairs, as executed.
    pub transcript: Mutex<Vec<(String, String)>>,
    /// (substring pattern, response); the first matching pattern wins.
    responses: Mutex<Vec<(String, ExecOutput)>>,
}

impl MockRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script a response for commands containing `pattern`.
    pub fn respond(&self, pattern: &str, code: i32, stdout: &str) {
        self.responses
            .lock()
            .expect("responses lock")
            .push((pattern.to_owned(), ExecOutput {
                code,
                stdout: stdout.to_owned(),
            }));
    }

    /// Drop all scripted responses.
    pub fn clear_responses(&self) {
        self.responses.lock().expect("responses lock").clear();
    }

    /// Commands recorded so far, joined with their hosts.
    pub fn commands(&self) -> Vec<String> {
        self.transcript
            .lock()
            .expect("transcript lock")
            .iter()
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }
}

#[async_trait]
impl RemoteRunner for MockRunner {
    async fn run(&self, host: &str, cmd: &str, _timeout: Duration) -> Result<ExecOutput> {
        self.transcript
            .lock()
            .expect("transcript lock")
            .push((host.to_owned(), cmd.to_owned()));

        let responses = self.responses.lock().expect("responses lock");
        for (pattern, output) in responses.iter() {
            if cmd.contains(pattern.as_str()) {
                return Ok(output.clone());
            }
        }
        Ok(ExecOutput {
            code: 0,
            stdout: String::new(),
        })
    }
}

/// Build an in-memory `AppState` wired to the mock runner.
pub async fn test_state(runner: Arc<MockRunner>, mut config: Config) -> Arc<AppState> {
    config.ssh_hosts = vec!["testhost".to_owned()];
    let config = Arc::new(config);

    let pool = Arc::new(db::connect_memory().await.expect("in-memory db"));
    let bus = Arc::new(EventBus::new());
    let session_repo = SessionRepo::new(Arc::clone(&pool));
    let message_repo = MessageRepo::new(Arc::clone(&pool));
    let kv = Kv::new(Arc::clone(&pool));
    let audit = EventRepo::new(Arc::clone(&pool));

    let runner: Arc<dyn RemoteRunner> = runner;
    let sessions = SessionService::new(Arc::clone(&runner), config.ssh_hosts.clone());
    let platform = PlatformService::new("", "", "", "", &config.thread_name_format)
        .expect("platform service");
    let messages = MessageService::new(
        Arc::clone(&bus),
        session_repo.clone(),
        message_repo.clone(),
        audit.clone(),
        config.transcript_max_content,
    );
    let transcripts = TranscriptService::new(
        Arc::clone(&runner),
        messages.clone(),
        kv.clone(),
        config.transcript_max_lines,
    );
    let usage = Some(
        UsageService::new(
            Arc::clone(&bus),
            UsageRepo::new(Arc::clone(&pool)),
            QueueRepo::new(Arc::clone(&pool)),
            sessions.clone(),
            String::new(),
            String::new(),
            config.usage_poll_model_anthropic.clone(),
            config.usage_poll_model_openai.clone(),
            true,
            config.usage_retention_hours,
        )
        .expect("usage service"),
    );

    let sync = MessageSync {
        platform: platform.clone(),
        messages: messages.clone(),
        message_repo: message_repo.clone(),
        session_repo: session_repo.clone(),
        bus: Arc::clone(&bus),
    };

    Arc::new(AppState {
        config,
        db: pool,
        bus,
        sessions,
        platform,
        messages,
        transcripts,
        usage,
        session_repo,
        message_repo,
        kv,
        audit,
        sync,
        tasks: TaskTracker::new(),
        rate_limiter: RateLimiter::new(),
        shutdown: CancellationToken::new(),
    })
}

/// Router over a fresh in-memory state in dev mode (no auth token).
pub async fn test_router(runner: Arc<MockRunner>) -> (Router, Arc<AppState>) {
    let state = test_state(runner, Config::default()).await;
    (build_router(Arc::clone(&state)), state)
}

/// Router with an auth token configured.
pub async fn test_router_with_token(
    runner: Arc<MockRunner>,
    token: &str,
) -> (Router, Arc<AppState>) {
    let mut config = Config::default();
    config.dashboard_token = token.to_owned();
    let state = test_state(runner, config).await;
    (build_router(Arc::clone(&state)), state)
}

/// Drive one request through the router and decode the JSON body.
pub async fn request(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
    headers: &[(&str, &str)],
) -> (axum::http::StatusCode, serde_json::Value) {
    use tower::ServiceExt;

    let mut builder = axum::http::Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(json.to_string()))
            .expect("request"),
        None => builder.body(axum::body::Body::empty()).expect("request"),
    };

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}
