//! Configuration types for the authentication core.
//!
//! Everything here is loaded once at process start (see [`loader`]) and shared
//! read-only afterwards. Adapters receive the section they need at
//! construction time, so tests can hand them fabricated configuration and
//! certificates directly.

use crate::errors::{AuthError, Result};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod loader;

pub use loader::ConfigBuilder;

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    /// Local admin principals checked by the credential store
    pub admins: Vec<AdminAccount>,
    pub saml: Option<SamlConfig>,
    pub oidc: Option<OidcConfig>,
    pub gate: GateConfig,
    /// Static directory entries served by the directory collaborator
    pub directory: Vec<DirectoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally visible origin, e.g. `https://helpdesk.example.org`
    pub public_base_url: String,
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            public_base_url: "http://localhost:8080".to_string(),
            max_body_size: 256 * 1024,
        }
    }
}

/// Session cookie settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base64 encoded 256-bit key used to seal session and context cookies
    pub secret: String,
    pub ttl_hours: i64,
    pub context_ttl_minutes: i64,
    /// Re-issue the session when less than this much lifetime remains
    pub refresh_window_minutes: i64,
    pub cookie_secure: bool,
    pub cookie_name: String,
    pub context_cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl_hours: 24,
            context_ttl_minutes: 10,
            refresh_window_minutes: 60,
            cookie_secure: true,
            cookie_name: "helpdesk_session".to_string(),
            context_cookie_name: "helpdesk_auth_ctx".to_string(),
        }
    }
}

impl SessionConfig {
    /// Decode the sealing key.
    pub fn key_bytes(&self) -> Result<Vec<u8>> {
        if self.secret.is_empty() {
            return Err(AuthError::configuration("session.secret is not set"));
        }
        let bytes = BASE64
            .decode(self.secret.trim())
            .map_err(|_| AuthError::configuration("session.secret is not valid base64"))?;
        if bytes.len() != 32 {
            return Err(AuthError::configuration(
                "session.secret must decode to 32 bytes (256 bits)",
            ));
        }
        Ok(bytes)
    }
}

/// A local administrator ("MD") principal.
#[derive(Clone, Serialize, Deserialize)]
pub struct AdminAccount {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for AdminAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAccount")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// SAML 2.0 service provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamlConfig {
    /// Service Provider Entity ID (the `Issuer` of our AuthnRequests)
    pub sp_entity_id: String,
    /// Assertion Consumer Service URL
    pub acs_url: String,
    /// Expected issuer of responses; not enforced when unset
    pub idp_entity_id: Option<String>,
    /// IdP single sign-on endpoint (HTTP-Redirect binding)
    pub idp_sso_url: String,
    pub idp_certificate_path: Option<PathBuf>,
    pub idp_certificate_pem: Option<String>,
    /// Certificate published in our SP metadata
    pub sp_certificate_path: Option<PathBuf>,
    pub sp_certificate_pem: Option<String>,
    pub clock_skew_seconds: i64,
    pub max_assertion_age_seconds: i64,
    pub name_id_format: Option<String>,
}

impl Default for SamlConfig {
    fn default() -> Self {
        Self {
            sp_entity_id: "http://localhost:8080/api/saml/metadata".to_string(),
            acs_url: "http://localhost:8080/api/saml/callback".to_string(),
            idp_entity_id: None,
            idp_sso_url: String::new(),
            idp_certificate_path: None,
            idp_certificate_pem: None,
            sp_certificate_path: None,
            sp_certificate_pem: None,
            clock_skew_seconds: 300,
            max_assertion_age_seconds: 300,
            name_id_format: None,
        }
    }
}

impl SamlConfig {
    /// PEM text of the IdP signing certificate, inline value first.
    pub fn idp_certificate(&self) -> Result<String> {
        read_pem(
            "saml.idp_certificate",
            self.idp_certificate_pem.as_deref(),
            self.idp_certificate_path.as_ref(),
        )
    }

    /// PEM text of the SP certificate used in metadata.
    pub fn sp_certificate(&self) -> Result<String> {
        read_pem(
            "saml.sp_certificate",
            self.sp_certificate_pem.as_deref(),
            self.sp_certificate_path.as_ref(),
        )
    }
}

fn read_pem(name: &str, inline: Option<&str>, path: Option<&PathBuf>) -> Result<String> {
    if let Some(pem) = inline.filter(|p| !p.trim().is_empty()) {
        return Ok(pem.to_string());
    }
    let path = path.ok_or_else(|| AuthError::configuration(format!("{name} is not configured")))?;
    let pem = std::fs::read_to_string(path).map_err(|e| {
        AuthError::configuration(format!("{name} unreadable at {}: {e}", path.display()))
    })?;
    if pem.trim().is_empty() {
        return Err(AuthError::configuration(format!(
            "{name} at {} is empty",
            path.display()
        )));
    }
    Ok(pem)
}

/// OpenID Connect relying party settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    pub authorize_endpoint: String,
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    /// Space separated scope list
    pub scope: String,
    /// `form_post` or `query`
    pub response_mode: String,
    pub timeout_seconds: u64,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            authorize_endpoint: String::new(),
            token_endpoint: String::new(),
            client_id: String::new(),
            client_secret: None,
            redirect_uri: "http://localhost:8080/api/auth/callback".to_string(),
            scope: "openid profile email".to_string(),
            response_mode: "form_post".to_string(),
            timeout_seconds: 10,
        }
    }
}

impl std::fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcConfig")
            .field("authorize_endpoint", &self.authorize_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("response_mode", &self.response_mode)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

/// Authorization gate routing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub login_entry: String,
    pub admin_landing: String,
    pub staff_landing: String,
    /// Paths reachable without a session; a prefix also covers its sub-paths.
    /// The login entry is always reachable and need not be listed.
    pub public_paths: Vec<String>,
    pub admin_prefixes: Vec<String>,
    pub staff_prefixes: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            login_entry: "/".to_string(),
            admin_landing: "/MD/home".to_string(),
            staff_landing: "/staff/home".to_string(),
            public_paths: [
                "/api/login",
                "/api/auth/login",
                "/api/auth/callback",
                "/api/saml/login",
                "/api/saml/callback",
                "/api/saml/metadata",
                "/api/check-certificate",
                "/static",
                "/imgs",
                "/favicon.ico",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            admin_prefixes: vec!["/MD".to_string()],
            staff_prefixes: vec!["/staff".to_string()],
        }
    }
}

/// Organisational user as served by the static directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
}

impl AppConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.session.key_bytes()?;

        match url::Url::parse(&self.server.public_base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(AuthError::configuration(
                    "server.public_base_url must be an absolute http(s) URL",
                ));
            }
        }

        if self.session.ttl_hours <= 0 {
            return Err(AuthError::configuration(
                "session.ttl_hours must be greater than 0",
            ));
        }
        if self.session.context_ttl_minutes <= 0 {
            return Err(AuthError::configuration(
                "session.context_ttl_minutes must be greater than 0",
            ));
        }

        for admin in &self.admins {
            if admin.id.is_empty() || admin.username.is_empty() || admin.password.is_empty() {
                return Err(AuthError::configuration(
                    "admin accounts need a non-empty id, username and password",
                ));
            }
        }

        if let Some(saml) = &self.saml {
            if saml.sp_entity_id.is_empty() {
                return Err(AuthError::configuration("saml.sp_entity_id cannot be empty"));
            }
            if saml.acs_url.is_empty() {
                return Err(AuthError::configuration("saml.acs_url cannot be empty"));
            }
            if saml.idp_sso_url.is_empty() {
                return Err(AuthError::configuration("saml.idp_sso_url cannot be empty"));
            }
        }

        if let Some(oidc) = &self.oidc {
            if oidc.client_id.is_empty() {
                return Err(AuthError::configuration("oidc.client_id cannot be empty"));
            }
            if !matches!(oidc.response_mode.as_str(), "form_post" | "query") {
                return Err(AuthError::configuration(
                    "oidc.response_mode must be form_post or query",
                ));
            }
        }

        if !self.gate.login_entry.starts_with('/') {
            return Err(AuthError::configuration("gate.login_entry must be an absolute path"));
        }

        Ok(())
    }
}
