//! API Middleware
//!
//! Authorization gate, security headers and request logging

use crate::api::{AppState, found};
use crate::authorization::{self, GateDecision};
use crate::session::Session;
use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use std::time::Instant;
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Authorization gate for page routes.
///
/// Redirects according to [`authorization::decide`]. Allowed requests with a
/// session get it as a request extension, and a session close to expiry is
/// re-issued on the way out.
pub async fn gate_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let now = Utc::now();
    let session = state.sessions.read_at(&jar, now);

    if let GateDecision::RedirectTo(target) =
        authorization::decide(session.as_ref(), request.uri().path(), &state.policy)
    {
        tracing::debug!(path = %request.uri().path(), target = %target, "gate redirect");
        return found(&target);
    }

    let Some(session) = session else {
        return next.run(request).await;
    };

    let refreshed = state.sessions.refresh_at(&session, now);
    request
        .extensions_mut()
        .insert::<Session>(refreshed.clone().unwrap_or(session));
    let response = next.run(request).await;

    match refreshed {
        Some(session) => match state.sessions.persist(CookieJar::new(), &session) {
            Ok(jar) => {
                tracing::debug!(user = %session.identity.id, "session refreshed");
                (jar, response).into_response()
            }
            Err(e) => {
                tracing::warn!(error = %e, "session refresh not persisted");
                response
            }
        },
        None => response,
    }
}

/// Logging middleware
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let forwarded_for = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    tracing::debug!(%request_id, %method, %path, %forwarded_for, %user_agent, "request started");

    let mut response = next.run(request).await;

    tracing::info!(
        %request_id,
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Security headers middleware
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        "Permissions-Policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );

    response
}
