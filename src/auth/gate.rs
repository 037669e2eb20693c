//! Middleware that only lets requests with a valid token through.
//!
//! A token arrives once as a query parameter, is exchanged for a session
//! cookie holding its digest and the client is redirected to the clean URL.
//! Bad tokens and bad cookies count as failed attempts for the client; once
//! the tracker blocks a client it is turned away before any check runs.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};

use crate::auth::cookie::{clear_cookie, find_cookie, session_cookie};
use crate::auth::token::hash_token;
use crate::error::AppError;
use crate::state::AppState;

pub async fn require_token(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = client_id(
        request.headers(),
        state.gate.client_ip_header.as_deref(),
        peer,
    );

    if state.tracker.is_blocked(&client) {
        tracing::warn!(client = %client, "Rejected request from blocked client");
        return Err(AppError::TooManyAttempts);
    }

    let query = request.uri().query().unwrap_or_default();
    if let Some(token) = query_token(query, &state.gate.token_param) {
        if !state.tokens.is_valid(&token, false) {
            record_failure(&state, &client, "token");
            let cookie = cookie_header(clear_cookie(&state.gate.cookie))?;
            return Ok((
                [(header::SET_COOKIE, cookie)],
                AppError::Unauthorized("Invalid token"),
            )
                .into_response());
        }

        let cookie = cookie_header(session_cookie(&state.gate.cookie, &hash_token(&token)))?;
        let location = strip_token(request.uri().path(), query, &state.gate.token_param);
        tracing::info!(client = %client, "Token accepted, issuing session cookie");
        return Ok(([(header::SET_COOKIE, cookie)], Redirect::temporary(&location)).into_response());
    }

    let cookie_valid = find_cookie(request.headers(), &state.gate.cookie.name)
        .map(|value| state.tokens.is_valid(value, true));
    match cookie_valid {
        Some(true) => Ok(next.run(request).await),
        Some(false) => {
            record_failure(&state, &client, "session cookie");
            Err(AppError::Unauthorized("Invalid session"))
        }
        None => Err(AppError::Unauthorized("Missing token")),
    }
}

fn cookie_header(cookie: String) -> anyhow::Result<HeaderValue> {
    HeaderValue::try_from(cookie).context("Set-Cookie value is not a valid header")
}

fn record_failure(state: &AppState, client: &str, credential: &str) {
    state
        .tracker
        .record_failed_attempt(client, state.gate.max_tracked_clients);
    tracing::warn!(client = %client, credential, "Failed authentication attempt");
}

/// First address of the configured forwarding header, or the peer address.
fn client_id(headers: &HeaderMap, ip_header: Option<&str>, peer: SocketAddr) -> String {
    ip_header
        .and_then(|name| headers.get(name))
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

fn query_token(query: &str, param: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == param)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// `path` with every `param` pair removed from `query`.
fn strip_token(path: &str, query: &str, param: &str) -> String {
    let rest = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(
            url::form_urlencoded::parse(query.as_bytes()).filter(|(key, _)| key != param),
        )
        .finish();
    if rest.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, rest)
    }
}
