//! HTTP surface.
//!
//! Routes, shared state and middleware for the helpdesk authentication
//! service. Page routes sit behind the authorization gate; `/api/*` handlers
//! authenticate themselves and answer 401 instead of redirecting.

pub mod auth;
pub mod middleware;
pub mod oidc;
pub mod pages;
pub mod saml;
pub mod server;
pub mod users;

pub use auth::AuthenticatedSession;
pub use server::{ApiServer, build_router};

use crate::authorization::GatePolicy;
use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::directory::{DirectoryService, StaticDirectory};
use crate::errors::{AuthError, Result};
use crate::methods::{OidcAuthMethod, SamlAuthMethod};
use crate::session::SessionManager;
use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: SessionManager,
    pub credentials: Arc<CredentialStore>,
    pub policy: Arc<GatePolicy>,
    /// `None` when SAML is not configured or its certificate failed to load
    pub saml: Option<Arc<SamlAuthMethod>>,
    pub oidc: Option<Arc<OidcAuthMethod>>,
    pub directory: Arc<dyn DirectoryService>,
}

impl AppState {
    /// Build every component from a validated configuration.
    ///
    /// A broken SAML or OIDC section disables that login path (its endpoints
    /// answer `configuration_error`) instead of taking the service down.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let sessions = SessionManager::new(config.session.clone())?;
        let credentials = CredentialStore::new(config.admins.clone());
        let policy = GatePolicy::from_config(&config.gate);
        let directory = StaticDirectory::new(config.directory.clone());

        let saml = match &config.saml {
            Some(saml) => match SamlAuthMethod::new(saml.clone()) {
                Ok(method) => Some(Arc::new(method)),
                Err(e) => {
                    tracing::error!(error = %e, "SAML login disabled");
                    None
                }
            },
            None => None,
        };
        let oidc = match &config.oidc {
            Some(oidc) => match OidcAuthMethod::new(oidc.clone()) {
                Ok(method) => Some(Arc::new(method)),
                Err(e) => {
                    tracing::error!(error = %e, "OIDC login disabled");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            config: Arc::new(config),
            sessions,
            credentials: Arc::new(credentials),
            policy: Arc::new(policy),
            saml,
            oidc,
            directory: Arc::new(directory),
        })
    }

    /// Replace the directory collaborator.
    pub fn with_directory(mut self, directory: Arc<dyn DirectoryService>) -> Self {
        self.directory = directory;
        self
    }

    pub(crate) fn saml(&self) -> Result<&SamlAuthMethod> {
        self.saml
            .as_deref()
            .ok_or_else(|| AuthError::configuration("SAML login is not configured"))
    }

    pub(crate) fn oidc(&self) -> Result<&OidcAuthMethod> {
        self.oidc
            .as_deref()
            .ok_or_else(|| AuthError::configuration("OIDC login is not configured"))
    }
}

/// 302 to `location`.
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// 302 to the login entry carrying the error code of a failed login.
pub(crate) fn login_failed(state: &AppState, method: &str, error: &AuthError) -> Response {
    tracing::warn!(method, code = error.error_code(), error = %error, "login failed");
    let mut url = url::form_urlencoded::Serializer::new(String::new());
    url.append_pair("error", error.error_code());
    found(&format!("{}?{}", state.policy.login_entry, url.finish()))
}
