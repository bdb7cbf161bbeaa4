//! OIDC endpoints

use crate::api::{AppState, found, login_failed};
use crate::errors::AuthError;
use crate::identity::SourceProtocol;
use crate::methods::{self, OidcCallback};
use axum::{
    extract::{
        Form, Query, State,
        rejection::{FormRejection, QueryRejection},
    },
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;

/// GET /api/auth/login
pub async fn login(State(state): State<AppState>, jar: CookieJar) -> Response {
    let result = state
        .oidc()
        .and_then(|method| methods::start_login(method, &state.sessions, jar, Utc::now()));

    match result {
        Ok((jar, url)) => (jar, found(&url)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/auth/callback (`response_mode=form_post`)
pub async fn callback_form(
    State(state): State<AppState>,
    jar: CookieJar,
    form: Result<Form<OidcCallback>, FormRejection>,
) -> Response {
    match form {
        Ok(Form(callback)) => finish(state, jar, callback).await,
        Err(rejection) => unreadable(state, jar, rejection.to_string()),
    }
}

/// GET /api/auth/callback (`response_mode=query`)
pub async fn callback_query(
    State(state): State<AppState>,
    jar: CookieJar,
    query: Result<Query<OidcCallback>, QueryRejection>,
) -> Response {
    match query {
        Ok(Query(callback)) => finish(state, jar, callback).await,
        Err(rejection) => unreadable(state, jar, rejection.to_string()),
    }
}

/// A callback whose parameters cannot be read still ends the login attempt.
fn unreadable(state: AppState, jar: CookieJar, reason: String) -> Response {
    let (jar, _) = state
        .sessions
        .consume_context_at(jar, SourceProtocol::Oidc, None, Utc::now());
    let error = AuthError::token_exchange(format!("callback parameters: {reason}"));
    (jar, login_failed(&state, "oidc", &error)).into_response()
}

async fn finish(state: AppState, jar: CookieJar, callback: OidcCallback) -> Response {
    let method = match state.oidc() {
        Ok(method) => method,
        Err(e) => return login_failed(&state, "oidc", &e),
    };

    match methods::complete_login(method, &state.sessions, jar, callback, Utc::now()).await {
        (jar, Ok(session)) => {
            let landing = state.policy.landing_for(session.identity.role);
            (jar, found(landing)).into_response()
        }
        (jar, Err(e)) => (jar, login_failed(&state, "oidc", &e)).into_response(),
    }
}
