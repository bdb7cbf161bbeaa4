//! SAML endpoints

use crate::api::{AppState, found, login_failed};
use crate::errors::AuthError;
use crate::identity::SourceProtocol;
use crate::methods::{self, SamlCallback, saml::generate_metadata};
use axum::{
    Json,
    extract::{Form, State, rejection::FormRejection},
    http::header,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::Serialize;

/// GET /api/saml/login
pub async fn login(State(state): State<AppState>, jar: CookieJar) -> Response {
    let result = state
        .saml()
        .and_then(|method| methods::start_login(method, &state.sessions, jar, Utc::now()));

    match result {
        Ok((jar, url)) => (jar, found(&url)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/saml/callback
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    form: Result<Form<SamlCallback>, FormRejection>,
) -> Response {
    let now = Utc::now();
    let (method, callback) = match (state.saml(), form) {
        (Ok(method), Ok(Form(callback))) => (method, callback),
        (Err(e), _) => return login_failed(&state, "saml", &e),
        (Ok(_), Err(rejection)) => {
            let (jar, _) = state
                .sessions
                .consume_context_at(jar, SourceProtocol::Saml, None, now);
            let error = AuthError::malformed_response(format!("callback form: {rejection}"));
            return (jar, login_failed(&state, "saml", &error)).into_response();
        }
    };

    match methods::complete_login(method, &state.sessions, jar, callback, now).await {
        (jar, Ok(session)) => {
            let landing = state.policy.landing_for(session.identity.role);
            (jar, found(landing)).into_response()
        }
        (jar, Err(e)) => (jar, login_failed(&state, "saml", &e)).into_response(),
    }
}

/// GET /api/saml/metadata
pub async fn metadata(State(state): State<AppState>) -> Response {
    let result = state
        .config
        .saml
        .as_ref()
        .ok_or_else(|| AuthError::configuration("SAML is not configured"))
        .and_then(generate_metadata);

    match result {
        Ok(xml) => ([(header::CONTENT_TYPE, "application/xml")], xml).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/check-certificate response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateStatus {
    pub configured: bool,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,
    pub currently_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /api/check-certificate
pub async fn check_certificate(State(state): State<AppState>) -> Json<CertificateStatus> {
    let configured = state.config.saml.is_some();
    let Some(method) = state.saml.as_deref() else {
        return Json(CertificateStatus {
            configured,
            loaded: false,
            subject: None,
            algorithm: None,
            not_before: None,
            not_after: None,
            currently_valid: false,
            error: Some("configuration_error".to_string()),
        });
    };

    let certificate = method.certificate();
    let now = Utc::now();
    let currently_valid = certificate.not_before().is_none_or(|nb| nb <= now)
        && certificate.not_after().is_none_or(|na| now < na);

    Json(CertificateStatus {
        configured,
        loaded: true,
        subject: Some(certificate.subject().to_string()),
        algorithm: Some(format!("{:?}", certificate.algorithm())),
        not_before: certificate.not_before().map(|t| t.to_rfc3339()),
        not_after: certificate.not_after().map(|t| t.to_rfc3339()),
        currently_valid,
        error: None,
    })
}
