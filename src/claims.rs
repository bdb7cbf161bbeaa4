//! Claims normalizer.
//!
//! Maps the claim sets produced by the SAML and OIDC adapters into the single
//! [`Identity`] shape the rest of the crate works with. Nothing downstream of
//! this module looks at raw claims.

use crate::errors::{AuthError, Result};
use crate::identity::{Identity, Role, SourceProtocol};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const CLAIM_GIVEN_NAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname";
pub const CLAIM_SURNAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/surname";
pub const CLAIM_EMAIL: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";
pub const CLAIM_NAME_IDENTIFIER: &str =
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";
const ATTR_MAIL: &str = "mail";

/// Claims extracted from a validated SAML assertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamlClaims {
    pub name_id: Option<String>,
    /// Attribute name to values, in document order
    pub attributes: HashMap<String, Vec<String>>,
}

impl SamlClaims {
    /// First non-blank value of an attribute.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)?
            .iter()
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }
}

/// Payload of an OIDC ID token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

/// Claim set tagged with the protocol it came from.
#[derive(Debug, Clone)]
pub enum RawClaims {
    Saml(SamlClaims),
    Oidc(IdTokenClaims),
}

impl RawClaims {
    pub fn source_protocol(&self) -> SourceProtocol {
        match self {
            RawClaims::Saml(_) => SourceProtocol::Saml,
            RawClaims::Oidc(_) => SourceProtocol::Oidc,
        }
    }
}

/// Normalize a federated claim set.
///
/// Federated identities are always [`Role::Staff`]; no claim can change that.
pub fn normalize(claims: &RawClaims) -> Result<Identity> {
    let identity = match claims {
        RawClaims::Saml(saml) => normalize_saml(saml),
        RawClaims::Oidc(oidc) => normalize_oidc(oidc),
    }?;
    tracing::debug!(
        protocol = %claims.source_protocol(),
        id = %identity.id,
        "claims normalized"
    );
    Ok(identity)
}

fn normalize_saml(claims: &SamlClaims) -> Result<Identity> {
    let id = non_blank(claims.name_id.as_deref())
        .or_else(|| claims.first(CLAIM_NAME_IDENTIFIER))
        .ok_or_else(|| AuthError::claims_incomplete("SAML assertion has no NameID"))?;

    let given = claims.first(CLAIM_GIVEN_NAME).unwrap_or_default();
    let surname = claims.first(CLAIM_SURNAME).unwrap_or_default();
    let display_name = format!("{given} {surname}").trim().to_string();

    let email = claims
        .first(CLAIM_EMAIL)
        .or_else(|| claims.first(ATTR_MAIL))
        .unwrap_or_default();

    Ok(Identity::new(id, display_name, email, Role::Staff))
}

fn normalize_oidc(claims: &IdTokenClaims) -> Result<Identity> {
    let id = non_blank(claims.oid.as_deref())
        .or_else(|| non_blank(claims.sub.as_deref()))
        .ok_or_else(|| AuthError::claims_incomplete("ID token has neither oid nor sub"))?;

    let display_name = non_blank(claims.given_name.as_deref())
        .or_else(|| non_blank(claims.name.as_deref()))
        .unwrap_or_default();

    let email = non_blank(claims.email.as_deref())
        .or_else(|| non_blank(claims.preferred_username.as_deref()))
        .unwrap_or_default();

    Ok(Identity::new(id, display_name, email, Role::Staff))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saml(name_id: Option<&str>, attributes: &[(&str, &str)]) -> SamlClaims {
        let mut claims = SamlClaims {
            name_id: name_id.map(String::from),
            ..Default::default()
        };
        for (name, value) in attributes {
            claims
                .attributes
                .entry(name.to_string())
                .or_default()
                .push(value.to_string());
        }
        claims
    }

    #[test]
    fn test_saml_full_claims() {
        let claims = saml(
            Some("jdoe@example.org"),
            &[
                (CLAIM_GIVEN_NAME, "Jane"),
                (CLAIM_SURNAME, "Doe"),
                (CLAIM_EMAIL, "jane.doe@example.org"),
            ],
        );
        let identity = normalize(&RawClaims::Saml(claims)).unwrap();
        assert_eq!(identity.id, "jdoe@example.org");
        assert_eq!(identity.display_name, "Jane Doe");
        assert_eq!(identity.email, "jane.doe@example.org");
        assert_eq!(identity.role, Role::Staff);
    }

    #[test]
    fn test_saml_fallbacks() {
        let claims = saml(
            None,
            &[(CLAIM_NAME_IDENTIFIER, "abc-123"), ("mail", "m@example.org"), (CLAIM_SURNAME, "Doe")],
        );
        let identity = normalize(&RawClaims::Saml(claims)).unwrap();
        assert_eq!(identity.id, "abc-123");
        assert_eq!(identity.email, "m@example.org");
        assert_eq!(identity.display_name, "Doe");

        let identity = normalize(&RawClaims::Saml(saml(Some("x"), &[]))).unwrap();
        assert_eq!(identity.email, "");
        assert_eq!(identity.display_name, "");
    }

    #[test]
    fn test_saml_without_identifier() {
        let claims = saml(Some("   "), &[(CLAIM_EMAIL, "a@example.org")]);
        let err = normalize(&RawClaims::Saml(claims)).unwrap_err();
        assert!(matches!(err, AuthError::ClaimsIncomplete { .. }));
    }

    #[test]
    fn test_oidc_precedence() {
        let claims = IdTokenClaims {
            sub: Some("sub-1".into()),
            oid: Some("oid-1".into()),
            name: Some("Jane Doe".into()),
            given_name: Some("Jane".into()),
            preferred_username: Some("jane@tenant.example".into()),
            ..Default::default()
        };
        let identity = normalize(&RawClaims::Oidc(claims)).unwrap();
        assert_eq!(identity.id, "oid-1");
        assert_eq!(identity.display_name, "Jane");
        assert_eq!(identity.email, "jane@tenant.example");
    }

    #[test]
    fn test_oidc_sub_only() {
        let claims = IdTokenClaims {
            sub: Some("sub-1".into()),
            name: Some("Jane Doe".into()),
            email: Some("jane@example.org".into()),
            ..Default::default()
        };
        let identity = normalize(&RawClaims::Oidc(claims)).unwrap();
        assert_eq!(identity.id, "sub-1");
        assert_eq!(identity.display_name, "Jane Doe");
        assert_eq!(identity.email, "jane@example.org");

        let err = normalize(&RawClaims::Oidc(IdTokenClaims::default())).unwrap_err();
        assert_eq!(err.error_code(), "claims_incomplete");
    }

    #[test]
    fn test_federated_claims_never_grant_admin() {
        let mut oidc = IdTokenClaims {
            sub: Some("sub-1".into()),
            ..Default::default()
        };
        oidc.additional
            .insert("personnelType".into(), serde_json::json!("Admin"));
        oidc.additional.insert("role".into(), serde_json::json!("Admin"));
        assert_eq!(normalize(&RawClaims::Oidc(oidc)).unwrap().role, Role::Staff);

        let saml = saml(Some("x"), &[("personnelType", "Admin"), ("role", "Admin")]);
        assert_eq!(normalize(&RawClaims::Saml(saml)).unwrap().role, Role::Staff);
    }
}
