//! Token-bucket rate limiting per (client IP, path prefix).
//!
//! Buckets refill continuously at `capacity / window` tokens per second;
//! an empty bucket answers 429 with `Retry-After: window`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::net::SocketAddr;
use tracing::warn;

use super::AppState;

/// (prefix, capacity, window seconds). First match wins; the empty
/// prefix is the default bucket class.
const LIMITS: [(&str, u32, u32); 4] = [
    ("/api/hooks/", 60, 60),
    ("/api/sessions", 30, 60),
    ("/api/", 60, 60),
    ("", 120, 60),
];

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32, window: u32) -> Self {
        Self {
            tokens: f64::from(capacity),
            capacity: f64::from(capacity),
            refill_per_sec: f64::from(capacity) / f64::from(window),
            last_refill: Instant::now(),
        }
    }

    fn consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Shared bucket table.
#[derive(Debug, Default, Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<(String, String), Bucket>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to consume one token for (ip, path). Returns the window
    /// seconds when the bucket is empty.
    pub fn check(&self, ip: &str, path: &str) -> std::result::Result<(), u32> {
        let (prefix, capacity, window) = LIMITS
            .iter()
            .find(|(prefix, _, _)| path.starts_with(prefix))
            .copied()
            .unwrap_or(("", 120, 60));

        let key = (ip.to_owned(), prefix.to_owned());
        let Ok(mut buckets) = self.buckets.lock() else {
            return Ok(());
        };
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| Bucket::new(capacity, window));
        if bucket.consume() {
            Ok(())
        } else {
            Err(window)
        }
    }
}

fn client_ip(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_owned();
            }
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_owned(), |info| info.0.ip().to_string())
}

/// Rate-limit middleware. Health checks, static assets, and WebSocket
/// upgrades are exempt.
pub async fn rate_limit_layer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if path == "/healthz" || path.starts_with("/static/") || path == "/ws" {
        return next.run(request).await;
    }

    let ip = client_ip(&request);
    if let Err(window) = state.rate_limiter.check(&ip, path) {
        warn!(method = %request.method(), path, ip, "rate limited");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", window.to_string())],
            Json(json!({
                "error": { "code": "RATE_LIMITED", "message": "Too many requests" }
            })),
        )
            .into_response();
    }

    next.run(request).await
}
