//! Federated authentication methods.
//!
//! SAML and OIDC look nothing alike on the wire, but both reduce to the same
//! two steps: send the browser to the IdP with a fresh anti-forgery context,
//! then turn whatever comes back into an [`Identity`]. [`FederatedAuthMethod`]
//! captures that shape so the login flow below, and the HTTP handlers on top
//! of it, never look at protocol details.

use crate::errors::{AuthError, Result};
use crate::identity::{Identity, SourceProtocol};
use crate::session::{AuthRequestContext, Session, SessionManager};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

pub mod oidc;
pub mod saml;

pub use oidc::{OidcAuthMethod, OidcCallback};
pub use saml::{SamlAuthMethod, SamlCallback};

/// Where to send the browser, and the tokens it must bring back.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    pub redirect_url: String,
    pub state: String,
    pub nonce: String,
}

/// A protocol adapter that can start a login and validate its callback.
pub trait FederatedAuthMethod: Send + Sync {
    /// Parameters the IdP sends back to the callback endpoint.
    type Callback: DeserializeOwned + Send + Sync + 'static;

    fn name(&self) -> &str;

    fn protocol(&self) -> SourceProtocol;

    /// Build the IdP redirect with freshly generated `state` and `nonce`.
    fn begin_login(&self, now: DateTime<Utc>) -> Result<LoginRedirect>;

    /// The `state` echoed by the IdP.
    fn returned_state(callback: &Self::Callback) -> Option<&str>;

    /// An error the IdP reported instead of a result.
    fn reported_error(_callback: &Self::Callback) -> Option<AuthError> {
        None
    }

    /// Validate the callback against the consumed context and map it to an identity.
    fn validate_and_normalize(
        &self,
        callback: Self::Callback,
        context: &AuthRequestContext,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Identity>> + Send;
}

/// Start a login: build the redirect and seal its context into the jar.
pub fn start_login<M: FederatedAuthMethod>(
    method: &M,
    sessions: &SessionManager,
    jar: CookieJar,
    now: DateTime<Utc>,
) -> Result<(CookieJar, String)> {
    let redirect = method.begin_login(now)?;
    let context = sessions.new_context_at(method.protocol(), redirect.state, redirect.nonce, now);
    let jar = sessions.store_context(jar, &context)?;

    tracing::info!(method = method.name(), "login redirect issued");
    Ok((jar, redirect.redirect_url))
}

/// Finish a login from the IdP callback.
///
/// The context is consumed (and its cookie removed) before anything else;
/// state is checked before any network call; the session only counts as
/// established once it is in the returned jar.
pub async fn complete_login<M: FederatedAuthMethod>(
    method: &M,
    sessions: &SessionManager,
    jar: CookieJar,
    callback: M::Callback,
    now: DateTime<Utc>,
) -> (CookieJar, Result<Session>) {
    let reported = M::reported_error(&callback);
    let (jar, context) =
        sessions.consume_context_at(jar, method.protocol(), M::returned_state(&callback), now);

    if let Some(error) = reported {
        return (jar, Err(error));
    }
    let context = match context {
        Ok(context) => context,
        Err(error) => return (jar, Err(error)),
    };

    let identity = match method.validate_and_normalize(callback, &context, now).await {
        Ok(identity) => identity,
        Err(error) => return (jar, Err(error)),
    };

    let session = sessions.create_at(identity, now);
    match sessions.persist(jar.clone(), &session) {
        Ok(jar) => {
            tracing::info!(
                method = method.name(),
                user = %session.identity.id,
                role = %session.identity.role,
                "federated login succeeded"
            );
            (jar, Ok(session))
        }
        Err(error) => (jar, Err(error)),
    }
}
