//! Session issuance, persistence and expiry.

use super::context::AuthRequestContext;
use super::seal::{CookieSealer, SealPurpose};
use crate::config::SessionConfig;
use crate::errors::{AuthError, Result};
use crate::identity::{Identity, SourceProtocol};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Browsers drop cookies whose name and value exceed this size.
const MAX_COOKIE_BYTES: usize = 4096;

/// Authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub identity: Identity,
    pub is_authenticated: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }
}

/// Issues, seals, reads and clears sessions and login contexts.
#[derive(Debug, Clone)]
pub struct SessionManager {
    sealer: Arc<CookieSealer>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Result<Self> {
        let sealer = CookieSealer::from_config(&config)?;
        Ok(Self {
            sealer: Arc::new(sealer),
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn ttl(&self) -> Duration {
        Duration::hours(self.config.ttl_hours)
    }

    pub fn context_ttl(&self) -> Duration {
        Duration::minutes(self.config.context_ttl_minutes)
    }

    pub fn create(&self, identity: Identity) -> Session {
        self.create_at(identity, Utc::now())
    }

    pub fn create_at(&self, identity: Identity, now: DateTime<Utc>) -> Session {
        Session {
            identity,
            is_authenticated: true,
            issued_at: now,
            expires_at: now + self.ttl(),
        }
    }

    /// Seal the session into the response cookie jar.
    ///
    /// Either the returned jar carries the cookie or an error is reported;
    /// callers must not redirect to an authenticated page on error.
    pub fn persist(&self, jar: CookieJar, session: &Session) -> Result<CookieJar> {
        let payload = serde_json::to_vec(session)
            .map_err(|e| AuthError::session_save(format!("serialize: {e}")))?;
        let sealed = self
            .sealer
            .seal(SealPurpose::Session, &payload)
            .map_err(|e| AuthError::session_save(e.to_string()))?;

        let name = self.config.cookie_name.clone();
        if name.len() + 1 + sealed.len() > MAX_COOKIE_BYTES {
            return Err(AuthError::session_save(format!(
                "session cookie would be {} bytes",
                name.len() + 1 + sealed.len()
            )));
        }

        let cookie = Cookie::build((name, sealed))
            .http_only(true)
            .secure(self.config.cookie_secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::seconds(
                (session.expires_at - session.issued_at).num_seconds(),
            ));

        tracing::debug!(user = %session.identity.id, expires_at = %session.expires_at, "session persisted");
        Ok(jar.add(cookie))
    }

    pub fn read(&self, jar: &CookieJar) -> Option<Session> {
        self.read_at(jar, Utc::now())
    }

    /// Missing, undecryptable, malformed or expired cookies all read as absent.
    pub fn read_at(&self, jar: &CookieJar, now: DateTime<Utc>) -> Option<Session> {
        let cookie = jar.get(&self.config.cookie_name)?;
        let payload = match self.sealer.open(SealPurpose::Session, cookie.value()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(error = %e, "discarding unreadable session cookie");
                return None;
            }
        };
        let session: Session = serde_json::from_slice(&payload).ok()?;

        if !session.is_authenticated || session.identity.id.is_empty() || session.is_expired_at(now) {
            return None;
        }
        Some(session)
    }

    /// Clear the session cookie. Outstanding copies stay valid until they expire.
    pub fn destroy(&self, jar: CookieJar) -> CookieJar {
        jar.remove(Cookie::build(self.config.cookie_name.clone()).path("/"))
    }

    /// Re-issued session when less than the refresh window remains.
    pub fn refresh_at(&self, session: &Session, now: DateTime<Utc>) -> Option<Session> {
        let window = Duration::minutes(self.config.refresh_window_minutes);
        if session.is_expired_at(now) || session.remaining_at(now) >= window {
            return None;
        }
        Some(self.create_at(session.identity.clone(), now))
    }

    /// Build a fresh login context for `protocol`.
    pub fn new_context_at(
        &self,
        protocol: SourceProtocol,
        state: String,
        nonce: String,
        now: DateTime<Utc>,
    ) -> AuthRequestContext {
        AuthRequestContext::new_at(protocol, state, nonce, now, self.context_ttl())
    }

    /// Seal the login context into its short-lived cookie.
    pub fn store_context(&self, jar: CookieJar, context: &AuthRequestContext) -> Result<CookieJar> {
        let payload = serde_json::to_vec(context)
            .map_err(|e| AuthError::internal(format!("serialize login context: {e}")))?;
        let sealed = self.sealer.seal(SealPurpose::AuthContext, &payload)?;

        // The IdP returns with a cross-site form POST; Lax would drop the cookie.
        let same_site = if self.config.cookie_secure {
            SameSite::None
        } else {
            SameSite::Lax
        };
        let cookie = Cookie::build((self.config.context_cookie_name.clone(), sealed))
            .http_only(true)
            .secure(self.config.cookie_secure)
            .same_site(same_site)
            .path("/")
            .max_age(time::Duration::minutes(self.config.context_ttl_minutes));

        Ok(jar.add(cookie))
    }

    /// Read and remove the login context.
    ///
    /// The returned jar never carries the context again, whatever the outcome.
    pub fn consume_context_at(
        &self,
        jar: CookieJar,
        protocol: SourceProtocol,
        returned_state: Option<&str>,
        now: DateTime<Utc>,
    ) -> (CookieJar, Result<AuthRequestContext>) {
        let context = self.open_context(&jar);
        let jar = jar.remove(Cookie::build(self.config.context_cookie_name.clone()).path("/"));

        let result = match context {
            None => Err(AuthError::ContextExpired),
            Some(ctx) if ctx.is_expired_at(now) => Err(AuthError::ContextExpired),
            Some(ctx) if ctx.protocol != protocol => Err(AuthError::StateMismatch),
            Some(ctx) => match returned_state {
                Some(state) if ctx.state_matches(state) => Ok(ctx),
                _ => Err(AuthError::StateMismatch),
            },
        };
        (jar, result)
    }

    fn open_context(&self, jar: &CookieJar) -> Option<AuthRequestContext> {
        let cookie = jar.get(&self.config.context_cookie_name)?;
        let payload = self
            .sealer
            .open(SealPurpose::AuthContext, cookie.value())
            .ok()?;
        serde_json::from_slice(&payload).ok()
    }
}
