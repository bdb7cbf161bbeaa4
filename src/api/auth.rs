//! Authentication API Endpoints
//!
//! Local admin login, session introspection and logout

use crate::api::{AppState, found};
use crate::credentials::{LoginResponse, PasswordCredential};
use crate::errors::AuthError;
use crate::identity::Role;
use crate::session::Session;
use axum::{
    Json,
    extract::{FromRequestParts, State},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

/// Session taken from the request cookie; rejects with 401 JSON.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession(pub Session);

impl FromRequestParts<AppState> for AuthenticatedSession {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        state
            .sessions
            .read(&jar)
            .map(AuthenticatedSession)
            .ok_or(AuthError::Unauthenticated)
    }
}

/// GET /api/session response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub is_authenticated: bool,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            id: session.identity.id.clone(),
            username: session.identity.display_name.clone(),
            email: session.identity.email.clone(),
            role: session.identity.role,
            is_authenticated: session.is_authenticated,
        }
    }
}

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(credential): Json<PasswordCredential>,
) -> Result<(CookieJar, Json<LoginResponse>), AuthError> {
    let identity = state.credentials.verify(&credential)?;
    let session = state.sessions.create(identity);
    let jar = state.sessions.persist(jar, &session)?;

    tracing::info!(user = %session.identity.id, "local admin login");
    Ok((jar, Json(LoginResponse::from(&session.identity))))
}

/// GET /api/session
pub async fn session(AuthenticatedSession(session): AuthenticatedSession) -> Json<SessionResponse> {
    Json(SessionResponse::from(&session))
}

/// GET /api/logout
pub async fn logout_redirect(State(state): State<AppState>, jar: CookieJar) -> Response {
    let jar = state.sessions.destroy(jar);
    (jar, found(&state.policy.login_entry)).into_response()
}

/// POST /api/logout
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    let jar = state.sessions.destroy(jar);
    (jar, Json(serde_json::json!({ "loggedOut": true }))).into_response()
}
