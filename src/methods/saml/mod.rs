//! SAML 2.0 service provider: SP-initiated SSO over the HTTP-Redirect binding,
//! responses over HTTP-POST.

use super::{FederatedAuthMethod, LoginRedirect};
use crate::claims::{self, RawClaims, SamlClaims};
use crate::config::SamlConfig;
use crate::errors::{AuthError, Result};
use crate::identity::{Identity, SourceProtocol};
use crate::security::SecureRandomGen;
use crate::session::AuthRequestContext;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use flate2::{Compression, write::DeflateEncoder};
use quick_xml::escape::escape;
use serde::Deserialize;
use std::io::Write;

pub mod xml;
pub mod xml_signature;

use xml::{Document, Element, NS_SAML_ASSERTION, NS_SAML_PROTOCOL};
use xml_signature::{IdpCertificate, enveloped_signature, verify_enveloped};

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
const BINDING_HTTP_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
const CONFIRMATION_BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";
const NAMEID_FORMAT_UNSPECIFIED: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";

/// Form fields the IdP posts to the assertion consumer service.
#[derive(Debug, Clone, Deserialize)]
pub struct SamlCallback {
    #[serde(rename = "SAMLResponse")]
    pub saml_response: String,
    #[serde(rename = "RelayState", default)]
    pub relay_state: Option<String>,
}

/// SAML authentication method
#[derive(Debug, Clone)]
pub struct SamlAuthMethod {
    config: SamlConfig,
    certificate: IdpCertificate,
}

impl SamlAuthMethod {
    /// Load and parse the configured IdP certificate.
    pub fn new(config: SamlConfig) -> Result<Self> {
        let pem = config.idp_certificate()?;
        let certificate = IdpCertificate::from_pem(&pem)?;
        tracing::info!(subject = %certificate.subject(), "SAML IdP certificate loaded");
        Ok(Self::with_certificate(config, certificate))
    }

    pub fn with_certificate(config: SamlConfig, certificate: IdpCertificate) -> Self {
        Self {
            config,
            certificate,
        }
    }

    pub fn config(&self) -> &SamlConfig {
        &self.config
    }

    pub fn certificate(&self) -> &IdpCertificate {
        &self.certificate
    }

    /// The AuthnRequest document for `request_id`.
    pub fn authn_request_xml(&self, request_id: &str, now: DateTime<Utc>) -> String {
        let name_id_policy = match &self.config.name_id_format {
            Some(format) => format!(
                r#"<samlp:NameIDPolicy Format="{}" AllowCreate="true"/>"#,
                escape(format)
            ),
            None => r#"<samlp:NameIDPolicy AllowCreate="true"/>"#.to_string(),
        };

        format!(
            concat!(
                r#"<samlp:AuthnRequest xmlns:samlp="{protocol}" xmlns:saml="{assertion}""#,
                r#" ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}""#,
                r#" AssertionConsumerServiceURL="{acs}" ProtocolBinding="{binding}">"#,
                r#"<saml:Issuer>{issuer}</saml:Issuer>{policy}</samlp:AuthnRequest>"#
            ),
            protocol = NS_SAML_PROTOCOL,
            assertion = NS_SAML_ASSERTION,
            id = escape(request_id),
            instant = now.to_rfc3339_opts(SecondsFormat::Secs, true),
            destination = escape(&self.config.idp_sso_url),
            acs = escape(&self.config.acs_url),
            binding = BINDING_HTTP_POST,
            issuer = escape(&self.config.sp_entity_id),
            policy = name_id_policy,
        )
    }

    /// IdP SSO URL carrying the deflated AuthnRequest and the RelayState.
    pub fn build_authn_request(
        &self,
        request_id: &str,
        relay_state: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let xml = self.authn_request_xml(request_id, now);

        let mut compressed = Vec::new();
        {
            let mut encoder = DeflateEncoder::new(&mut compressed, Compression::default());
            encoder
                .write_all(xml.as_bytes())
                .and_then(|_| encoder.try_finish())
                .map_err(|e| AuthError::internal(format!("Failed to compress AuthnRequest: {e}")))?;
        }
        let encoded = BASE64.encode(&compressed);

        let mut url = url::Url::parse(&self.config.idp_sso_url).map_err(|e| {
            AuthError::configuration(format!("Invalid saml.idp_sso_url: {e}"))
        })?;
        url.query_pairs_mut()
            .append_pair("SAMLRequest", &encoded)
            .append_pair("RelayState", relay_state);

        Ok(url.to_string())
    }

    pub fn validate_response(
        &self,
        encoded: &str,
        expected_request_id: Option<&str>,
    ) -> Result<Identity> {
        self.validate_response_at(encoded, expected_request_id, Utc::now())
    }

    /// Validate a base64 encoded `SAMLResponse` and map it to an identity.
    ///
    /// `expected_request_id` is the ID of the AuthnRequest this login started
    /// with; a response answering a different request is rejected.
    pub fn validate_response_at(
        &self,
        encoded: &str,
        expected_request_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Identity> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let raw = BASE64
            .decode(compact)
            .map_err(|e| AuthError::malformed_response(format!("SAMLResponse is not base64: {e}")))?;
        let xml = String::from_utf8(raw)
            .map_err(|_| AuthError::malformed_response("SAMLResponse is not UTF-8"))?;

        let document = Document::parse(&xml)?;
        let response = &document.root;
        if !response.is(NS_SAML_PROTOCOL, "Response") {
            return Err(AuthError::malformed_response(format!(
                "unexpected root element {}",
                response.local_name
            )));
        }

        check_status(response)?;

        if response.child(NS_SAML_ASSERTION, "EncryptedAssertion").is_some() {
            return Err(AuthError::malformed_response(
                "encrypted assertions are not supported",
            ));
        }
        let mut assertions = response.children_named(NS_SAML_ASSERTION, "Assertion");
        let assertion = assertions
            .next()
            .ok_or_else(|| AuthError::malformed_response("response carries no assertion"))?;
        if assertions.next().is_some() {
            return Err(AuthError::malformed_response(
                "response carries more than one assertion",
            ));
        }

        self.verify_signatures(&document, assertion)?;
        self.check_issuer(response, assertion)?;
        check_in_response_to(response.attr("InResponseTo"), expected_request_id)?;
        self.check_subject_confirmation(assertion, expected_request_id, now)?;
        self.check_conditions(assertion, now)?;
        self.check_issue_instant(assertion, now)?;

        let claims = extract_claims(assertion);
        claims::normalize(&RawClaims::Saml(claims))
    }

    /// At least one of Response and Assertion must be signed, and every
    /// signature present must verify. A signed Response covers its assertion.
    fn verify_signatures(&self, document: &Document, assertion: &Element) -> Result<()> {
        let response = &document.root;
        let response_signed = enveloped_signature(response)?.is_some();
        let assertion_signed = enveloped_signature(assertion)?.is_some();

        if !response_signed && !assertion_signed {
            return Err(AuthError::invalid_signature(
                "neither the response nor the assertion is signed",
            ));
        }
        if response_signed {
            verify_enveloped(document, response, &self.certificate)?;
        }
        if assertion_signed {
            verify_enveloped(document, assertion, &self.certificate)?;
        }
        Ok(())
    }

    fn check_issuer(&self, response: &Element, assertion: &Element) -> Result<()> {
        let Some(expected) = self.config.idp_entity_id.as_deref() else {
            return Ok(());
        };

        let assertion_issuer = assertion
            .child(NS_SAML_ASSERTION, "Issuer")
            .map(|e| e.text().trim().to_string())
            .ok_or_else(|| AuthError::malformed_response("assertion has no Issuer"))?;
        if assertion_issuer != expected {
            return Err(AuthError::malformed_response(format!(
                "unexpected assertion issuer {assertion_issuer}"
            )));
        }

        if let Some(issuer) = response.child(NS_SAML_ASSERTION, "Issuer") {
            let issuer = issuer.text();
            if issuer.trim() != expected {
                return Err(AuthError::malformed_response(format!(
                    "unexpected response issuer {}",
                    issuer.trim()
                )));
            }
        }
        Ok(())
    }

    fn check_subject_confirmation(
        &self,
        assertion: &Element,
        expected_request_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let skew = self.skew();
        let Some(subject) = assertion.child(NS_SAML_ASSERTION, "Subject") else {
            return Err(AuthError::malformed_response("assertion has no Subject"));
        };

        let bearer = subject
            .children_named(NS_SAML_ASSERTION, "SubjectConfirmation")
            .filter(|c| c.attr("Method") == Some(CONFIRMATION_BEARER))
            .filter_map(|c| c.child(NS_SAML_ASSERTION, "SubjectConfirmationData"))
            .collect::<Vec<_>>();
        if bearer.is_empty() {
            return Err(AuthError::malformed_response(
                "assertion has no bearer subject confirmation",
            ));
        }

        for data in bearer {
            if let Some(not_on_or_after) = data.attr("NotOnOrAfter") {
                if now - skew >= parse_instant(not_on_or_after)? {
                    return Err(AuthError::expired_assertion(
                        "subject confirmation has expired",
                    ));
                }
            }
            if let Some(recipient) = data.attr("Recipient") {
                if recipient != self.config.acs_url {
                    return Err(AuthError::malformed_response(format!(
                        "subject confirmation recipient {recipient} is not this service"
                    )));
                }
            }
            check_in_response_to(data.attr("InResponseTo"), expected_request_id)?;
        }
        Ok(())
    }

    fn check_conditions(&self, assertion: &Element, now: DateTime<Utc>) -> Result<()> {
        let skew = self.skew();
        let Some(conditions) = assertion.child(NS_SAML_ASSERTION, "Conditions") else {
            return Ok(());
        };

        if let Some(not_before) = conditions.attr("NotBefore") {
            if now + skew < parse_instant(not_before)? {
                return Err(AuthError::expired_assertion("assertion is not yet valid"));
            }
        }
        if let Some(not_on_or_after) = conditions.attr("NotOnOrAfter") {
            if now - skew >= parse_instant(not_on_or_after)? {
                return Err(AuthError::expired_assertion("assertion has expired"));
            }
        }

        for restriction in conditions.children_named(NS_SAML_ASSERTION, "AudienceRestriction") {
            let allowed = restriction
                .children_named(NS_SAML_ASSERTION, "Audience")
                .any(|a| a.text().trim() == self.config.sp_entity_id);
            if !allowed {
                return Err(AuthError::malformed_response(
                    "assertion audience does not include this service",
                ));
            }
        }
        Ok(())
    }

    /// Bounds how long a captured assertion can be replayed.
    fn check_issue_instant(&self, assertion: &Element, now: DateTime<Utc>) -> Result<()> {
        let skew = self.skew();
        let issued = assertion
            .attr("IssueInstant")
            .ok_or_else(|| AuthError::malformed_response("assertion has no IssueInstant"))
            .and_then(parse_instant)?;

        if issued > now + skew {
            return Err(AuthError::expired_assertion("assertion issued in the future"));
        }
        if now - issued > Duration::seconds(self.config.max_assertion_age_seconds) + skew {
            return Err(AuthError::expired_assertion(
                "assertion is too old - potential replay",
            ));
        }
        Ok(())
    }

    fn skew(&self) -> Duration {
        Duration::seconds(self.config.clock_skew_seconds)
    }
}

impl FederatedAuthMethod for SamlAuthMethod {
    type Callback = SamlCallback;

    fn name(&self) -> &str {
        "saml"
    }

    fn protocol(&self) -> SourceProtocol {
        SourceProtocol::Saml
    }

    fn begin_login(&self, now: DateTime<Utc>) -> Result<LoginRedirect> {
        let state = SecureRandomGen::generate_token()?;
        let request_id = SecureRandomGen::generate_request_id()?;
        let redirect_url = self.build_authn_request(&request_id, &state, now)?;
        Ok(LoginRedirect {
            redirect_url,
            state,
            nonce: request_id,
        })
    }

    fn returned_state(callback: &SamlCallback) -> Option<&str> {
        callback.relay_state.as_deref()
    }

    async fn validate_and_normalize(
        &self,
        callback: SamlCallback,
        context: &AuthRequestContext,
        now: DateTime<Utc>,
    ) -> Result<Identity> {
        self.validate_response_at(&callback.saml_response, Some(&context.nonce), now)
    }
}

fn check_status(response: &Element) -> Result<()> {
    let code = response
        .child(NS_SAML_PROTOCOL, "Status")
        .and_then(|s| s.child(NS_SAML_PROTOCOL, "StatusCode"))
        .and_then(|c| c.attr("Value"))
        .ok_or_else(|| AuthError::malformed_response("response has no StatusCode"))?;
    if code != STATUS_SUCCESS {
        return Err(AuthError::malformed_response(format!(
            "IdP returned status {code}"
        )));
    }
    Ok(())
}

fn check_in_response_to(actual: Option<&str>, expected: Option<&str>) -> Result<()> {
    match (actual, expected) {
        (Some(actual), Some(expected)) if actual != expected => Err(AuthError::StateMismatch),
        _ => Ok(()),
    }
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.and_utc())
        })
        .map_err(|_| AuthError::malformed_response(format!("invalid SAML time {value}")))
}

fn extract_claims(assertion: &Element) -> SamlClaims {
    let name_id = assertion
        .child(NS_SAML_ASSERTION, "Subject")
        .and_then(|s| s.child(NS_SAML_ASSERTION, "NameID"))
        .map(|n| n.text().trim().to_string())
        .filter(|n| !n.is_empty());

    let mut claims = SamlClaims {
        name_id,
        ..Default::default()
    };
    for statement in assertion.children_named(NS_SAML_ASSERTION, "AttributeStatement") {
        for attribute in statement.children_named(NS_SAML_ASSERTION, "Attribute") {
            let Some(name) = attribute.attr("Name") else {
                continue;
            };
            let values = claims.attributes.entry(name.to_string()).or_default();
            values.extend(
                attribute
                    .children_named(NS_SAML_ASSERTION, "AttributeValue")
                    .map(|v| v.text()),
            );
        }
    }
    claims
}

/// Service provider metadata for the IdP administrator.
///
/// Fails rather than emitting a document without the SP certificate.
pub fn generate_metadata(config: &SamlConfig) -> Result<String> {
    let pem = config.sp_certificate()?;
    let (_, pem) = x509_parser::pem::parse_x509_pem(pem.trim().as_bytes())
        .map_err(|e| AuthError::configuration(format!("SP certificate is not valid PEM: {e}")))?;
    x509_parser::parse_x509_certificate(&pem.contents)
        .map_err(|e| AuthError::configuration(format!("SP certificate parsing error: {e}")))?;
    let certificate = BASE64.encode(&pem.contents);

    let name_id_format = config
        .name_id_format
        .as_deref()
        .unwrap_or(NAMEID_FORMAT_UNSPECIFIED);

    Ok(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
  <md:SPSSODescriptor AuthnRequestsSigned="false" WantAssertionsSigned="true" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data>
          <ds:X509Certificate>{certificate}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:NameIDFormat>{name_id_format}</md:NameIDFormat>
    <md:AssertionConsumerService Binding="{binding}" Location="{acs}" index="0"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
        entity_id = escape(&config.sp_entity_id),
        name_id_format = escape(name_id_format),
        binding = BINDING_HTTP_POST,
        acs = escape(&config.acs_url),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::DeflateDecoder;
    use std::io::Read;

    const TEST_CERT: &str = include_str!("../../../tests/fixtures/sp-cert.pem");

    fn config() -> SamlConfig {
        SamlConfig {
            sp_entity_id: "https://helpdesk.test/api/saml/metadata".to_string(),
            acs_url: "https://helpdesk.test/api/saml/callback".to_string(),
            idp_sso_url: "https://idp.test/saml2?tenant=t1".to_string(),
            sp_certificate_pem: Some(TEST_CERT.to_string()),
            ..Default::default()
        }
    }

    fn method() -> SamlAuthMethod {
        let certificate = IdpCertificate::from_pem(TEST_CERT).unwrap();
        SamlAuthMethod::with_certificate(config(), certificate)
    }

    #[test]
    fn test_authn_request_redirect() {
        let now = Utc::now();
        let url = method().build_authn_request("_req1", "relay-1", now).unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("idp.test"));

        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("tenant").map(String::as_str), Some("t1"));
        assert_eq!(pairs.get("RelayState").map(String::as_str), Some("relay-1"));

        let deflated = BASE64.decode(&pairs["SAMLRequest"]).unwrap();
        let mut xml = String::new();
        DeflateDecoder::new(&deflated[..]).read_to_string(&mut xml).unwrap();

        let doc = Document::parse(&xml).unwrap();
        assert!(doc.root.is(NS_SAML_PROTOCOL, "AuthnRequest"));
        assert_eq!(doc.root.attr("ID"), Some("_req1"));
        assert_eq!(
            doc.root.attr("AssertionConsumerServiceURL"),
            Some("https://helpdesk.test/api/saml/callback")
        );
        assert_eq!(
            doc.root.child(NS_SAML_ASSERTION, "Issuer").unwrap().text(),
            "https://helpdesk.test/api/saml/metadata"
        );
    }

    #[test]
    fn test_begin_login_uses_request_id_as_nonce() {
        let redirect = method().begin_login(Utc::now()).unwrap();
        assert!(redirect.nonce.starts_with('_'));
        assert!(redirect.redirect_url.contains("RelayState="));
        assert_ne!(redirect.state, redirect.nonce);
    }

    #[test]
    fn test_metadata() {
        let metadata = generate_metadata(&config()).unwrap();
        let doc = Document::parse(&metadata).unwrap();
        assert_eq!(
            doc.root.attr("entityID"),
            Some("https://helpdesk.test/api/saml/metadata")
        );
        assert!(metadata.contains("<ds:X509Certificate>MII"));
        assert!(metadata.contains(r#"Location="https://helpdesk.test/api/saml/callback""#));
    }

    #[test]
    fn test_metadata_requires_certificate() {
        let config = SamlConfig {
            sp_certificate_pem: None,
            sp_certificate_path: None,
            ..config()
        };
        let err = generate_metadata(&config).unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }

    #[test]
    fn test_rejects_garbage() {
        let method = method();
        let now = Utc::now();
        let err = method.validate_response_at("%%%", None, now).unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse { .. }));

        let not_response = BASE64.encode("<foo/>");
        let err = method.validate_response_at(&not_response, None, now).unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse { .. }));
    }

    #[test]
    fn test_failed_status() {
        let xml = format!(
            r#"<samlp:Response xmlns:samlp="{NS_SAML_PROTOCOL}"><samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Requester"/></samlp:Status></samlp:Response>"#
        );
        let err = method()
            .validate_response_at(&BASE64.encode(xml), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse { .. }));
    }

    #[test]
    fn test_unsigned_assertion_rejected() {
        let xml = format!(
            r#"<samlp:Response xmlns:samlp="{NS_SAML_PROTOCOL}" xmlns:saml="{NS_SAML_ASSERTION}"><samlp:Status><samlp:StatusCode Value="{STATUS_SUCCESS}"/></samlp:Status><saml:Assertion ID="_a" IssueInstant="2024-01-01T00:00:00Z"><saml:Subject><saml:NameID>u</saml:NameID></saml:Subject></saml:Assertion></samlp:Response>"#
        );
        let err = method()
            .validate_response_at(&BASE64.encode(xml), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature { .. }));
    }

    #[test]
    fn test_parse_instant_formats() {
        assert!(parse_instant("2024-05-01T10:00:00Z").is_ok());
        assert!(parse_instant("2024-05-01T10:00:00.123Z").is_ok());
        assert!(parse_instant("2024-05-01T10:00:00").is_ok());
        assert!(parse_instant("yesterday").is_err());
    }

    #[test]
    fn test_in_response_to() {
        assert!(check_in_response_to(None, Some("_r")).is_ok());
        assert!(check_in_response_to(Some("_r"), Some("_r")).is_ok());
        assert!(matches!(
            check_in_response_to(Some("_x"), Some("_r")),
            Err(AuthError::StateMismatch)
        ));
    }
}
