//! Per-attempt login context carried between the redirect and the callback.

use crate::identity::SourceProtocol;
use crate::security::SecureComparison;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Anti-forgery context for one login attempt.
///
/// For OIDC `nonce` is the ID token nonce; for SAML it is the AuthnRequest ID
/// that the response must reference in `InResponseTo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequestContext {
    pub protocol: SourceProtocol,
    pub state: String,
    pub nonce: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthRequestContext {
    pub fn new_at(
        protocol: SourceProtocol,
        state: String,
        nonce: String,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            protocol,
            state,
            nonce,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Byte-equal, constant-time comparison with the state the IdP returned.
    pub fn state_matches(&self, returned: &str) -> bool {
        SecureComparison::constant_time_eq(&self.state, returned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let ctx = AuthRequestContext::new_at(
            SourceProtocol::Oidc,
            "s".into(),
            "n".into(),
            now,
            Duration::minutes(10),
        );
        assert!(!ctx.is_expired_at(now + Duration::minutes(9)));
        assert!(ctx.is_expired_at(now + Duration::minutes(10)));
        assert!(ctx.state_matches("s"));
        assert!(!ctx.state_matches("S"));
    }
}
