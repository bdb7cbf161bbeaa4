//! Error types for the helpdesk authentication core.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Result type alias for the authentication core.
pub type Result<T, E = AuthError> = std::result::Result<T, E>;

/// Main error type for the authentication core.
///
/// Messages carried by the variants are for logs only. Anything that reaches a
/// browser goes through [`AuthError::error_code`].
#[derive(Error, Debug)]
pub enum AuthError {
    /// Local credential check failed
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Identity provider claims did not yield a usable identifier
    #[error("Claims incomplete: {message}")]
    ClaimsIncomplete { message: String },

    /// XML signature missing, unsupported or not verifiable with the IdP certificate
    #[error("Invalid signature: {message}")]
    InvalidSignature { message: String },

    /// Assertion outside its validity window
    #[error("Expired assertion: {message}")]
    ExpiredAssertion { message: String },

    /// SAML response could not be decoded or is structurally unacceptable
    #[error("Malformed SAML response: {message}")]
    MalformedResponse { message: String },

    /// Returned state does not match the stored login context
    #[error("State parameter does not match the stored login context")]
    StateMismatch,

    /// Login context cookie missing, unreadable or past its expiry
    #[error("Login context is missing or expired")]
    ContextExpired,

    /// ID token nonce does not match the stored login context
    #[error("ID token nonce does not match the stored login context")]
    NonceMismatch,

    /// The identity provider reported an error on the callback
    #[error("Identity provider error: {error}")]
    IdentityProvider {
        error: String,
        description: Option<String>,
    },

    /// Authorization code exchange failed
    #[error("Token exchange failed: {message}")]
    TokenExchange { message: String },

    /// ID token is not a decodable three-segment JWT
    #[error("Malformed ID token: {message}")]
    MalformedToken { message: String },

    /// Session could not be serialized into its cookie
    #[error("Session save failed: {message}")]
    SessionSave { message: String },

    /// Upstream identity provider did not answer in time
    #[error("Upstream timeout after {timeout_seconds} seconds")]
    UpstreamTimeout { timeout_seconds: u64 },

    /// Configuration errors (missing certificate, missing secret, ...)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// API call without an established session
    #[error("Not authenticated")]
    Unauthenticated,

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AuthError {
    /// Create a claims incomplete error
    pub fn claims_incomplete(message: impl Into<String>) -> Self {
        Self::ClaimsIncomplete {
            message: message.into(),
        }
    }

    /// Create an invalid signature error
    pub fn invalid_signature(message: impl Into<String>) -> Self {
        Self::InvalidSignature {
            message: message.into(),
        }
    }

    /// Create an expired assertion error
    pub fn expired_assertion(message: impl Into<String>) -> Self {
        Self::ExpiredAssertion {
            message: message.into(),
        }
    }

    /// Create a malformed response error
    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    /// Create a token exchange error
    pub fn token_exchange(message: impl Into<String>) -> Self {
        Self::TokenExchange {
            message: message.into(),
        }
    }

    /// Create a malformed token error
    pub fn malformed_token(message: impl Into<String>) -> Self {
        Self::MalformedToken {
            message: message.into(),
        }
    }

    /// Create a session save error
    pub fn session_save(message: impl Into<String>) -> Self {
        Self::SessionSave {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::UpstreamTimeout { timeout_seconds }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Coarse, non-sensitive code for redirects and JSON bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::ClaimsIncomplete { .. } => "claims_incomplete",
            AuthError::InvalidSignature { .. } => "invalid_signature",
            AuthError::ExpiredAssertion { .. } => "expired_assertion",
            AuthError::MalformedResponse { .. } => "malformed_response",
            AuthError::StateMismatch => "invalid_state",
            AuthError::ContextExpired => "login_expired",
            AuthError::NonceMismatch => "invalid_nonce",
            AuthError::IdentityProvider { .. } => "idp_error",
            AuthError::TokenExchange { .. } => "token_exchange_failed",
            AuthError::MalformedToken { .. } => "invalid_id_token",
            AuthError::SessionSave { .. } => "session_save_failed",
            AuthError::UpstreamTimeout { .. } => "upstream_timeout",
            AuthError::Configuration { .. } => "configuration_error",
            AuthError::Unauthenticated => "not_authenticated",
            AuthError::Internal { .. } => "internal_error",
        }
    }

    /// HTTP status used when the error is answered directly rather than redirected.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::Configuration { .. }
            | AuthError::SessionSave { .. }
            | AuthError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<config::ConfigError> for AuthError {
    fn from(error: config::ConfigError) -> Self {
        AuthError::configuration(error.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({ "error": self.error_code() }));
        (status, body).into_response()
    }
}
