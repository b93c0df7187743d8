//! Server-rendered page routes and the login flow.
//!
//! The browser UI proper is external; these routes serve minimal HTML
//! shells plus the cookie-based login/logout endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::json;

use super::auth::{constant_time_eq, mint_cookie, redirect_found, valid_next, COOKIE_NAME};
use super::AppState;

/// `GET /healthz` — liveness with a real database round-trip.
pub async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    match sqlx::query("SELECT 1").execute(state.db.as_ref()).await {
        Ok(_) => Json(json!({ "status": "ok", "database": "ok" })).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "database": format!("error: {err}") })),
        )
            .into_response(),
    }
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body>{body}</body></html>"
    ))
}

/// `GET /` — dashboard home.
pub async fn index_page() -> Html<String> {
    page(
        "agent-relay",
        "<h1>agent-relay</h1><p><a href=\"/sessions\">Sessions</a></p>",
    )
}

/// `GET /sessions` — session list shell.
pub async fn sessions_page() -> Html<String> {
    page(
        "Sessions — agent-relay",
        "<h1>Sessions</h1><p>Data at <code>/api/sessions</code>.</p>",
    )
}

/// `GET /sessions/{name}` — session detail shell.
pub async fn session_detail_page(Path(name): Path<String>) -> Html<String> {
    let safe: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    page(
        &format!("{safe} — agent-relay"),
        &format!("<h1>Session {safe}</h1><p>Data at <code>/api/sessions/{safe}</code>.</p>"),
    )
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    next: Option<String>,
}

/// `GET /login` — the token entry form.
pub async fn login_page(Query(query): Query<LoginQuery>) -> Html<String> {
    let next = query
        .next
        .filter(|n| valid_next(n))
        .unwrap_or_else(|| "/".to_owned());
    page(
        "Login — agent-relay",
        &format!(
            "<h1>Login</h1>\
             <form method=\"post\" action=\"/login\">\
             <input type=\"hidden\" name=\"next\" value=\"{next}\">\
             <input type=\"password\" name=\"token\" placeholder=\"Dashboard token\" autofocus>\
             <button type=\"submit\">Sign in</button>\
             </form>"
        ),
    )
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    token: Option<String>,
    next: Option<String>,
}

/// `POST /login` — validate the token and set the signed cookie.
pub async fn login_submit(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> Response {
    let expected = &state.config.dashboard_token;
    let next = form
        .next
        .filter(|n| valid_next(n))
        .unwrap_or_else(|| "/".to_owned());

    if expected.is_empty() {
        // Dev mode: nothing to check.
        return redirect_found(&next);
    }

    let candidate = form.token.unwrap_or_default();
    if !constant_time_eq(&candidate, expected) {
        return (
            StatusCode::UNAUTHORIZED,
            page("Login — agent-relay", "<h1>Login</h1><p>Invalid token.</p>"),
        )
            .into_response();
    }

    let cookie = format!(
        "{COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        mint_cookie(expected),
        super::auth::COOKIE_MAX_AGE_SECS,
    );
    (
        StatusCode::FOUND,
        [
            (header::SET_COOKIE, cookie),
            (header::LOCATION, next),
        ],
    )
        .into_response()
}

/// `GET /logout` — clear the session cookie.
pub async fn logout() -> Response {
    let cookie = format!("{COOKIE_NAME}=; Path=/; HttpOnly; Max-Age=0");
    (
        StatusCode::FOUND,
        [
            (header::SET_COOKIE, cookie),
            (header::LOCATION, "/login".to_owned()),
        ],
    )
        .into_response()
}
