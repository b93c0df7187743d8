//! Request authentication: Bearer token for programmatic callers, a
//! signed cookie for browser sessions.
//!
//! The cookie value is `{unix_ts}.{hex hmac_sha256(ts)}` keyed on the
//! configured dashboard token, valid for 24 hours. When no token is
//! configured every request is allowed (dev mode).

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use super::error::ApiError;
use super::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Browser session cookie name.
pub const COOKIE_NAME: &str = "relay_session";

/// Cookie lifetime in seconds (24 h).
pub const COOKIE_MAX_AGE_SECS: i64 = 24 * 3600;

/// Paths that bypass authentication entirely.
const NO_AUTH_PREFIXES: [&str; 6] = [
    "/healthz",
    "/api/hooks/",
    "/api/install.sh",
    "/static/",
    "/login",
    "/logout",
];

/// Constant-time string comparison to prevent timing side-channels.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Mint a signed session cookie value for the current time.
#[must_use]
pub fn mint_cookie(token: &str) -> String {
    let ts = Utc::now().timestamp().to_string();
    format!("{ts}.{}", sign(token, &ts))
}

/// Validate a cookie value: well-formed, in-lifetime, correctly signed.
#[must_use]
pub fn verify_cookie(token: &str, value: &str) -> bool {
    let Some((ts, mac)) = value.split_once('.') else {
        return false;
    };
    let Ok(issued) = ts.parse::<i64>() else {
        return false;
    };
    let age = Utc::now().timestamp() - issued;
    if !(0..=COOKIE_MAX_AGE_SECS).contains(&age) {
        return false;
    }
    constant_time_eq(&sign(token, ts), mac)
}

fn sign(token: &str, ts: &str) -> String {
    // Key length is unconstrained for HMAC-SHA256; this cannot fail.
    let Ok(mut mac) = HmacSha256::new_from_slice(token.as_bytes()) else {
        return String::new();
    };
    mac.update(ts.as_bytes());
    let digest = mac.finalize().into_bytes();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Extract a named cookie from the Cookie header.
fn cookie_value<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    let header = request.headers().get(header::COOKIE)?.to_str().ok()?;
    for pair in header.split(';') {
        let pair = pair.trim();
        if let Some(value) = pair.strip_prefix(name) {
            if let Some(value) = value.strip_prefix('=') {
                return Some(value);
            }
        }
    }
    None
}

fn query_param<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    let query = request.uri().query()?;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix(name) {
            if let Some(value) = value.strip_prefix('=') {
                return Some(value);
            }
        }
    }
    None
}

/// Whether the request reads as a browser navigation: Accept names HTML
/// and the path is not an API or WebSocket one.
fn is_browser_navigation(request: &Request) -> bool {
    let accepts_html = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"));
    let path = request.uri().path();
    accepts_html && !path.starts_with("/api/") && path != "/ws"
}

/// Validate a `next` redirect target: a single leading `/` only, so the
/// login page cannot be used as an open redirect.
#[must_use]
pub fn valid_next(next: &str) -> bool {
    next.starts_with('/') && !next.starts_with("//")
}

/// Auth middleware: Bearer header or signed cookie against the single
/// configured token; WebSocket upgrades also accept a token query
/// parameter.
pub async fn auth_layer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let token = &state.config.dashboard_token;
    if token.is_empty() {
        // Dev mode.
        return next.run(request).await;
    }

    let path = request.uri().path().to_owned();
    if NO_AUTH_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
    {
        return next.run(request).await;
    }

    // Bearer header.
    if let Some(header_value) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(candidate) = header_value.strip_prefix("Bearer ") {
            if constant_time_eq(candidate, token) {
                return next.run(request).await;
            }
        }
    }

    // Signed cookie.
    if let Some(cookie) = cookie_value(&request, COOKIE_NAME) {
        if verify_cookie(token, cookie) {
            return next.run(request).await;
        }
    }

    // WebSocket upgrades may carry the raw token as a query parameter.
    if path == "/ws" {
        if let Some(candidate) = query_param(&request, "token") {
            if constant_time_eq(candidate, token) {
                return next.run(request).await;
            }
        }
    }

    warn!(method = %request.method(), path, "unauthorized request");

    if is_browser_navigation(&request) {
        let next_path = if valid_next(&path) { path } else { "/".into() };
        return redirect_found(&format!("/login?next={next_path}"));
    }

    ApiError::unauthorized("Invalid or missing authentication token").into_response()
}

/// A plain 302 redirect.
#[must_use]
pub fn redirect_found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, location.to_owned())],
    )
        .into_response()
}
