//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use axum::{
    Json, Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use axum_extra::extract::cookie::Cookie;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use helpdesk_auth::{
    api::{AppState, build_router},
    config::{AdminAccount, AppConfig, DirectoryEntry, OidcConfig, SamlConfig, SessionConfig},
    methods::saml::{
        xml::{Document, ExclusiveCanonicalizer, NS_XML_DSIG},
        xml_signature::{
            ALG_ECDSA_SHA256, ALG_ENVELOPED_SIGNATURE, ALG_EXC_C14N, ALG_SHA256, IdpCertificate,
        },
    },
};
use ring::{
    digest,
    rand::SystemRandom,
    signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair},
};
use std::collections::BTreeMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use tower::ServiceExt;

pub const SESSION_SECRET: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";
pub const ADMIN_PASSWORD: &str = "correct horse battery staple";
pub const SP_ENTITY_ID: &str = "https://helpdesk.test/api/saml/metadata";
pub const ACS_URL: &str = "https://helpdesk.test/api/saml/callback";
pub const IDP_ENTITY_ID: &str = "https://sts.idp.test/tenant/";
pub const OIDC_REDIRECT_URI: &str = "https://helpdesk.test/api/auth/callback";

const EMPTY_SIGNATURE_VALUE: &str = "<ds:SignatureValue></ds:SignatureValue>";

pub fn session_config() -> SessionConfig {
    SessionConfig {
        secret: SESSION_SECRET.to_string(),
        ..Default::default()
    }
}

pub fn admin_account() -> AdminAccount {
    AdminAccount {
        id: "md-1".to_string(),
        username: "Admin".to_string(),
        email: "admin@helpdesk.test".to_string(),
        password: ADMIN_PASSWORD.to_string(),
    }
}

pub fn saml_config(idp: &TestIdp) -> SamlConfig {
    SamlConfig {
        sp_entity_id: SP_ENTITY_ID.to_string(),
        acs_url: ACS_URL.to_string(),
        idp_entity_id: Some(IDP_ENTITY_ID.to_string()),
        idp_sso_url: "https://login.idp.test/tenant/saml2".to_string(),
        idp_certificate_pem: Some(idp.certificate_pem.clone()),
        sp_certificate_pem: Some(include_str!("../fixtures/sp-cert.pem").to_string()),
        ..Default::default()
    }
}

pub fn oidc_config(token_endpoint: &str) -> OidcConfig {
    OidcConfig {
        authorize_endpoint: "https://login.idp.test/tenant/oauth2/v2.0/authorize".to_string(),
        token_endpoint: token_endpoint.to_string(),
        client_id: "helpdesk-client".to_string(),
        client_secret: Some("client-secret".to_string()),
        redirect_uri: OIDC_REDIRECT_URI.to_string(),
        timeout_seconds: 2,
        ..Default::default()
    }
}

pub fn app_config() -> AppConfig {
    AppConfig {
        session: session_config(),
        admins: vec![admin_account()],
        directory: vec![DirectoryEntry {
            id: "u-1".to_string(),
            display_name: "Sam Staff".to_string(),
            mail: Some("sam@helpdesk.test".to_string()),
            department: Some("IT".to_string()),
            job_title: None,
        }],
        ..Default::default()
    }
}

pub fn router(config: AppConfig) -> Router {
    build_router(AppState::from_config(config).unwrap())
}

/// Identity provider with an ephemeral P-256 signing key.
pub struct TestIdp {
    pub certificate_pem: String,
    key: EcdsaKeyPair,
    rng: SystemRandom,
}

impl TestIdp {
    pub fn new() -> Self {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let certificate = rcgen::CertificateParams::new(vec!["idp.test".to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();

        let rng = SystemRandom::new();
        let key = EcdsaKeyPair::from_pkcs8(
            &ECDSA_P256_SHA256_FIXED_SIGNING,
            &key_pair.serialize_der(),
            &rng,
        )
        .unwrap();

        Self {
            certificate_pem: certificate.pem(),
            key,
            rng,
        }
    }

    pub fn certificate(&self) -> IdpCertificate {
        IdpCertificate::from_pem(&self.certificate_pem).unwrap()
    }

    /// Insert an enveloped signature over the element with `id`, right after
    /// its `saml:Issuer`.
    pub fn sign(&self, xml: &str, id: &str) -> String {
        let doc = Document::parse(xml).unwrap();
        let target = doc.find_by_id(id).unwrap();
        let canonical = ExclusiveCanonicalizer::new()
            .canonicalize(&doc, target)
            .unwrap();
        let digest = BASE64.encode(digest::digest(&digest::SHA256, canonical.as_bytes()));

        let signature = format!(
            concat!(
                r#"<ds:Signature xmlns:ds="{ds}"><ds:SignedInfo>"#,
                r#"<ds:CanonicalizationMethod Algorithm="{c14n}"/>"#,
                r#"<ds:SignatureMethod Algorithm="{method}"/>"#,
                r##"<ds:Reference URI="#{id}"><ds:Transforms>"##,
                r#"<ds:Transform Algorithm="{enveloped}"/><ds:Transform Algorithm="{c14n}"/>"#,
                r#"</ds:Transforms><ds:DigestMethod Algorithm="{sha256}"/>"#,
                r#"<ds:DigestValue>{digest}</ds:DigestValue></ds:Reference></ds:SignedInfo>"#,
                "{empty}</ds:Signature>"
            ),
            ds = NS_XML_DSIG,
            c14n = ALG_EXC_C14N,
            method = ALG_ECDSA_SHA256,
            id = id,
            enveloped = ALG_ENVELOPED_SIGNATURE,
            sha256 = ALG_SHA256,
            digest = digest,
            empty = EMPTY_SIGNATURE_VALUE,
        );

        let start = xml.find(&format!(r#" ID="{id}""#)).unwrap();
        let issuer_end = start
            + xml[start..].find("</saml:Issuer>").unwrap()
            + "</saml:Issuer>".len();
        let with_signature = format!("{}{}{}", &xml[..issuer_end], signature, &xml[issuer_end..]);

        let doc = Document::parse(&with_signature).unwrap();
        let signed_info = doc
            .find_by_id(id)
            .unwrap()
            .child(NS_XML_DSIG, "Signature")
            .unwrap()
            .child(NS_XML_DSIG, "SignedInfo")
            .unwrap();
        let canonical = ExclusiveCanonicalizer::new()
            .canonicalize(&doc, signed_info)
            .unwrap();
        let value = self.key.sign(&self.rng, canonical.as_bytes()).unwrap();

        with_signature.replacen(
            EMPTY_SIGNATURE_VALUE,
            &format!(
                "<ds:SignatureValue>{}</ds:SignatureValue>",
                BASE64.encode(value.as_ref())
            ),
            1,
        )
    }
}

/// Builder for IdP responses.
#[derive(Debug, Clone)]
pub struct SamlResponse {
    pub response_id: String,
    pub assertion_id: String,
    pub in_response_to: Option<String>,
    pub issuer: String,
    pub issue_instant: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub not_on_or_after: DateTime<Utc>,
    pub audience: String,
    pub recipient: String,
    pub name_id: Option<String>,
    pub attributes: Vec<(String, String)>,
}

impl SamlResponse {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            response_id: "_resp0123456789".to_string(),
            assertion_id: "_assert0123456789".to_string(),
            in_response_to: None,
            issuer: IDP_ENTITY_ID.to_string(),
            issue_instant: now,
            not_before: now - Duration::minutes(1),
            not_on_or_after: now + Duration::minutes(5),
            audience: SP_ENTITY_ID.to_string(),
            recipient: ACS_URL.to_string(),
            name_id: Some("sam.staff@helpdesk.test".to_string()),
            attributes: vec![
                (helpdesk_auth::claims::CLAIM_GIVEN_NAME.to_string(), "Sam".to_string()),
                (helpdesk_auth::claims::CLAIM_SURNAME.to_string(), "Staff".to_string()),
                (
                    helpdesk_auth::claims::CLAIM_EMAIL.to_string(),
                    "sam.staff@helpdesk.test".to_string(),
                ),
            ],
        }
    }

    pub fn answering(mut self, request_id: &str) -> Self {
        self.in_response_to = Some(request_id.to_string());
        self
    }

    pub fn to_xml(&self) -> String {
        let ts = |t: DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);
        let in_response_to = self
            .in_response_to
            .as_ref()
            .map(|id| format!(r#" InResponseTo="{id}""#))
            .unwrap_or_default();
        let name_id = self
            .name_id
            .as_ref()
            .map(|n| format!("<saml:NameID>{n}</saml:NameID>"))
            .unwrap_or_default();
        let attributes: String = self
            .attributes
            .iter()
            .map(|(name, value)| {
                format!(
                    r#"<saml:Attribute Name="{name}"><saml:AttributeValue>{value}</saml:AttributeValue></saml:Attribute>"#
                )
            })
            .collect();

        format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{rid}" Version="2.0" IssueInstant="{issued}" Destination="{recipient}"{irt}>
  <saml:Issuer>{issuer}</saml:Issuer>
  <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
  <saml:Assertion ID="{aid}" Version="2.0" IssueInstant="{issued}">
    <saml:Issuer>{issuer}</saml:Issuer>
    <saml:Subject>{name_id}<saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer"><saml:SubjectConfirmationData{irt} NotOnOrAfter="{noa}" Recipient="{recipient}"/></saml:SubjectConfirmation></saml:Subject>
    <saml:Conditions NotBefore="{nb}" NotOnOrAfter="{noa}"><saml:AudienceRestriction><saml:Audience>{audience}</saml:Audience></saml:AudienceRestriction></saml:Conditions>
    <saml:AttributeStatement>{attributes}</saml:AttributeStatement>
  </saml:Assertion>
</samlp:Response>"#,
            rid = self.response_id,
            aid = self.assertion_id,
            issued = ts(self.issue_instant),
            recipient = self.recipient,
            irt = in_response_to,
            issuer = self.issuer,
            name_id = name_id,
            noa = ts(self.not_on_or_after),
            nb = ts(self.not_before),
            audience = self.audience,
            attributes = attributes,
        )
    }

    /// XML with a signed assertion.
    pub fn signed_by(&self, idp: &TestIdp) -> String {
        idp.sign(&self.to_xml(), &self.assertion_id)
    }
}

pub fn encode(xml: &str) -> String {
    BASE64.encode(xml)
}

/// Mint an ID token; the signature is irrelevant to the relying party.
pub fn id_token(claims: serde_json::Value) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(b"test-idp-secret"),
    )
    .unwrap()
}

/// What the fake token endpoint answers.
#[derive(Debug, Clone)]
pub enum TokenReply {
    IdToken(String),
    Error(StatusCode, serde_json::Value),
    Slow(std::time::Duration),
}

/// Token endpoint on an ephemeral local port.
pub struct FakeTokenEndpoint {
    pub url: String,
    pub hits: Arc<AtomicUsize>,
    pub last_body: Arc<Mutex<Option<String>>>,
}

impl FakeTokenEndpoint {
    pub async fn spawn(reply: TokenReply) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let last_body = Arc::new(Mutex::new(None));

        let counter = hits.clone();
        let recorder = last_body.clone();
        let app = Router::new().route(
            "/token",
            post(move |body: String| {
                let reply = reply.clone();
                let counter = counter.clone();
                let recorder = recorder.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    *recorder.lock().unwrap() = Some(body);
                    match reply {
                        TokenReply::IdToken(token) => Json(serde_json::json!({
                            "token_type": "Bearer",
                            "expires_in": 3600,
                            "access_token": "access",
                            "id_token": token,
                        }))
                        .into_response(),
                        TokenReply::Error(status, body) => (status, Json(body)).into_response(),
                        TokenReply::Slow(delay) => {
                            tokio::time::sleep(delay).await;
                            Json(serde_json::json!({ "id_token": "late" })).into_response()
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}/token"),
            hits,
            last_body,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Query parameters of a redirect URL.
pub fn query_params(url: &str) -> BTreeMap<String, String> {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .into_owned()
        .collect()
}

/// Minimal cookie-keeping client for driving the router.
#[derive(Debug, Default)]
pub struct Browser {
    cookies: BTreeMap<String, String>,
}

impl Browser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn set_cookie(&mut self, name: &str, value: &str) {
        self.cookies.insert(name.to_string(), value.to_string());
    }

    fn request(&self, method: Method, uri: &str) -> axum::http::request::Builder {
        let mut builder = Request::builder().method(method).uri(uri);
        if !self.cookies.is_empty() {
            let header_value = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(header::COOKIE, header_value);
        }
        builder
    }

    pub fn get(&self, uri: &str) -> Request<Body> {
        self.request(Method::GET, uri).body(Body::empty()).unwrap()
    }

    pub fn post_json(&self, uri: &str, body: serde_json::Value) -> Request<Body> {
        self.request(Method::POST, uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn post_form(&self, uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        self.request(Method::POST, uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    /// Send through the router and keep whatever cookies come back.
    pub async fn send(&mut self, app: &Router, request: Request<Body>) -> Response {
        let response = app.clone().oneshot(request).await.unwrap();
        for value in response.headers().get_all(header::SET_COOKIE) {
            let cookie = Cookie::parse(value.to_str().unwrap().to_string()).unwrap();
            let removed = cookie.value().is_empty()
                || cookie.max_age().is_some_and(|age| age.is_zero());
            if removed {
                self.cookies.remove(cookie.name());
            } else {
                self.cookies
                    .insert(cookie.name().to_string(), cookie.value().to_string());
            }
        }
        response
    }
}

pub fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
}

pub fn set_cookie_names(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| Cookie::parse(v.to_str().ok()?.to_string()).ok())
        .filter(|c| !c.value().is_empty())
        .map(|c| c.name().to_string())
        .collect()
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
