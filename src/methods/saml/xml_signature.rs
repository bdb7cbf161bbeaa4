// Enveloped XML-DSig verification using ring, x509-parser and the local c14n.

use super::xml::{Document, Element, ExclusiveCanonicalizer, NS_XML_DSIG};
use crate::errors::{AuthError, Result};
use crate::security::SecureComparison;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use ring::{digest, signature};
use x509_parser::{parse_x509_certificate, pem::parse_x509_pem};

pub const ALG_EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const ALG_ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const ALG_ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";
pub const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_CURVE_P256: &str = "1.2.840.10045.3.1.7";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    EcdsaP256,
}

impl KeyAlgorithm {
    fn signature_method(self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => ALG_RSA_SHA256,
            KeyAlgorithm::EcdsaP256 => ALG_ECDSA_SHA256,
        }
    }
}

/// IdP signing certificate, parsed once at startup.
#[derive(Debug, Clone)]
pub struct IdpCertificate {
    public_key: Vec<u8>,
    algorithm: KeyAlgorithm,
    subject: String,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
}

impl IdpCertificate {
    /// Parse the first certificate of a PEM document.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let (_, pem) = parse_x509_pem(pem.trim().as_bytes())
            .map_err(|e| AuthError::configuration(format!("Certificate PEM parsing error: {e}")))?;
        Self::from_der(&pem.contents)
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = parse_x509_certificate(der)
            .map_err(|e| AuthError::configuration(format!("Certificate parsing error: {e}")))?;

        let spki = cert.public_key();
        let algorithm = match spki.algorithm.algorithm.to_id_string().as_str() {
            OID_RSA_ENCRYPTION => KeyAlgorithm::Rsa,
            OID_EC_PUBLIC_KEY => {
                let curve = spki
                    .algorithm
                    .parameters
                    .as_ref()
                    .and_then(|p| p.as_oid().ok())
                    .map(|oid| oid.to_id_string());
                if curve.as_deref() != Some(OID_CURVE_P256) {
                    return Err(AuthError::configuration(format!(
                        "Unsupported certificate curve: {}",
                        curve.as_deref().unwrap_or("<none>")
                    )));
                }
                KeyAlgorithm::EcdsaP256
            }
            oid => {
                return Err(AuthError::configuration(format!(
                    "Unsupported certificate key algorithm: {oid}"
                )));
            }
        };

        let validity = cert.validity();
        Ok(Self {
            // PKCS#1 RSAPublicKey or the uncompressed EC point, as ring expects
            public_key: spki.subject_public_key.data.to_vec(),
            algorithm,
            subject: cert.subject().to_string(),
            not_before: DateTime::from_timestamp(validity.not_before.timestamp(), 0),
            not_after: DateTime::from_timestamp(validity.not_after.timestamp(), 0),
        })
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }

    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        self.not_after
    }

    fn verify(&self, message: &[u8], signature_bytes: &[u8]) -> bool {
        let algorithm: &dyn signature::VerificationAlgorithm = match self.algorithm {
            KeyAlgorithm::Rsa => &signature::RSA_PKCS1_2048_8192_SHA256,
            // XML-DSig carries ECDSA signatures as raw r || s
            KeyAlgorithm::EcdsaP256 => &signature::ECDSA_P256_SHA256_FIXED,
        };
        signature::UnparsedPublicKey::new(algorithm, &self.public_key)
            .verify(message, signature_bytes)
            .is_ok()
    }
}

/// The `ds:Signature` that is a direct child of `signed`, if any.
pub fn enveloped_signature(signed: &Element) -> Result<Option<&Element>> {
    let mut signatures = signed.children_named(NS_XML_DSIG, "Signature");
    let first = signatures.next();
    if signatures.next().is_some() {
        return Err(AuthError::invalid_signature(format!(
            "{} carries more than one signature",
            signed.local_name
        )));
    }
    Ok(first)
}

/// Verify the enveloped signature of `signed` against `certificate`.
///
/// Accepts exactly one `Reference` pointing at `signed` by ID, with the
/// enveloped-signature and exclusive c14n transforms and a SHA-256 digest.
pub fn verify_enveloped(
    document: &Document,
    signed: &Element,
    certificate: &IdpCertificate,
) -> Result<()> {
    let signature_el = enveloped_signature(signed)?.ok_or_else(|| {
        AuthError::invalid_signature(format!("{} is not signed", signed.local_name))
    })?;

    let signed_info = required_child(signature_el, "SignedInfo")?;

    let c14n_method = required_child(signed_info, "CanonicalizationMethod")?;
    if c14n_method.attr("Algorithm") != Some(ALG_EXC_C14N) {
        return Err(AuthError::invalid_signature(
            "unsupported canonicalization method",
        ));
    }

    let method = required_child(signed_info, "SignatureMethod")?
        .attr("Algorithm")
        .unwrap_or_default();
    if method != certificate.algorithm().signature_method() {
        return Err(AuthError::invalid_signature(format!(
            "signature method {method} does not match the IdP certificate"
        )));
    }

    let mut references = signed_info.children_named(NS_XML_DSIG, "Reference");
    let reference = references
        .next()
        .ok_or_else(|| AuthError::invalid_signature("SignedInfo has no Reference"))?;
    if references.next().is_some() {
        return Err(AuthError::invalid_signature("SignedInfo has several References"));
    }

    check_reference_target(document, signed, reference)?;
    let digest_prefixes = check_transforms(reference)?;

    let digest_method = required_child(reference, "DigestMethod")?;
    if digest_method.attr("Algorithm") != Some(ALG_SHA256) {
        return Err(AuthError::invalid_signature("unsupported digest method"));
    }
    let expected_digest = decode_base64(&required_child(reference, "DigestValue")?.text())?;

    let canonical = ExclusiveCanonicalizer::new()
        .excluding(signature_el)
        .with_inclusive_prefixes(digest_prefixes)
        .canonicalize(document, signed)?;
    let actual_digest = digest::digest(&digest::SHA256, canonical.as_bytes());
    if !SecureComparison::constant_time_eq_bytes(actual_digest.as_ref(), &expected_digest) {
        return Err(AuthError::invalid_signature(format!(
            "digest mismatch for {}",
            signed.local_name
        )));
    }

    let canonical_signed_info = ExclusiveCanonicalizer::new()
        .with_inclusive_prefixes(inclusive_prefixes(c14n_method))
        .canonicalize(document, signed_info)?;
    let signature_bytes = decode_base64(&required_child(signature_el, "SignatureValue")?.text())?;

    if !certificate.verify(canonical_signed_info.as_bytes(), &signature_bytes) {
        return Err(AuthError::invalid_signature(
            "signature value does not verify with the IdP certificate",
        ));
    }

    tracing::debug!(element = %signed.local_name, "XML signature verified");
    Ok(())
}

fn required_child<'a>(parent: &'a Element, local_name: &str) -> Result<&'a Element> {
    parent.child(NS_XML_DSIG, local_name).ok_or_else(|| {
        AuthError::invalid_signature(format!("{} has no {local_name}", parent.local_name))
    })
}

fn check_reference_target(document: &Document, signed: &Element, reference: &Element) -> Result<()> {
    let uri = reference.attr("URI").unwrap_or_default();
    let id = uri
        .strip_prefix('#')
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AuthError::invalid_signature("Reference must point at an element ID"))?;

    if signed.id() != Some(id) {
        return Err(AuthError::invalid_signature(
            "Reference does not point at the signed element",
        ));
    }
    let target = document.find_by_id(id)?;
    if !std::ptr::eq(target, signed) {
        return Err(AuthError::invalid_signature(
            "Reference resolves to a different element",
        ));
    }
    Ok(())
}

/// Validate the transform chain and return the c14n prefix list it carries.
fn check_transforms(reference: &Element) -> Result<Vec<String>> {
    let transforms = required_child(reference, "Transforms")?;
    let mut enveloped = false;
    let mut prefixes = Vec::new();

    for transform in transforms.children_named(NS_XML_DSIG, "Transform") {
        match transform.attr("Algorithm") {
            Some(ALG_ENVELOPED_SIGNATURE) => enveloped = true,
            Some(ALG_EXC_C14N) => prefixes = inclusive_prefixes(transform),
            other => {
                return Err(AuthError::invalid_signature(format!(
                    "unsupported transform {}",
                    other.unwrap_or("<none>")
                )));
            }
        }
    }

    if !enveloped {
        return Err(AuthError::invalid_signature(
            "enveloped-signature transform missing",
        ));
    }
    Ok(prefixes)
}

fn inclusive_prefixes(method: &Element) -> Vec<String> {
    method
        .child_elements()
        .find(|e| e.local_name == "InclusiveNamespaces")
        .and_then(|e| e.attr("PrefixList"))
        .map(|list| list.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

fn decode_base64(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(compact)
        .map_err(|e| AuthError::invalid_signature(format!("Invalid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNSIGNED: &str = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a1"><saml:Issuer>idp</saml:Issuer></saml:Assertion>"#;

    #[test]
    fn test_unsigned_element_has_no_signature() {
        let doc = Document::parse(UNSIGNED).unwrap();
        assert!(enveloped_signature(&doc.root).unwrap().is_none());
    }

    #[test]
    fn test_bad_certificate_is_configuration_error() {
        let err = IdpCertificate::from_pem("not a certificate").unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
        assert!(IdpCertificate::from_der(&[0x30, 0x03, 0x02, 0x01, 0x01]).is_err());
    }

    #[test]
    fn test_certificate_key_algorithms() {
        let p256 = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let cert = rcgen::CertificateParams::new(vec!["idp.test".to_string()])
            .unwrap()
            .self_signed(&p256)
            .unwrap();
        let loaded = IdpCertificate::from_der(cert.der()).unwrap();
        assert_eq!(loaded.algorithm(), KeyAlgorithm::EcdsaP256);

        let p384 = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384).unwrap();
        let cert = rcgen::CertificateParams::new(vec!["idp.test".to_string()])
            .unwrap()
            .self_signed(&p384)
            .unwrap();
        let err = IdpCertificate::from_der(cert.der()).unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }), "{err:?}");
        assert!(err.to_string().contains("1.3.132.0.34"), "{err}");
    }

    #[test]
    fn test_transform_chain_requires_enveloped() {
        let xml = format!(
            r##"<ds:Reference xmlns:ds="{NS_XML_DSIG}" URI="#_a1"><ds:Transforms><ds:Transform Algorithm="{ALG_EXC_C14N}"/></ds:Transforms></ds:Reference>"##
        );
        let doc = Document::parse(&xml).unwrap();
        assert!(check_transforms(&doc.root).is_err());

        let xml = format!(
            r##"<ds:Reference xmlns:ds="{NS_XML_DSIG}" URI="#_a1"><ds:Transforms><ds:Transform Algorithm="{ALG_ENVELOPED_SIGNATURE}"/><ds:Transform Algorithm="{ALG_EXC_C14N}"><ec:InclusiveNamespaces xmlns:ec="{ALG_EXC_C14N}" PrefixList="xs saml"/></ds:Transform></ds:Transforms></ds:Reference>"##
        );
        let doc = Document::parse(&xml).unwrap();
        assert_eq!(check_transforms(&doc.root).unwrap(), vec!["xs", "saml"]);
    }

    #[test]
    fn test_reference_must_target_signed_element() {
        let xml = format!(
            r##"<r ID="_r"><a ID="_a1"/><ds:Reference xmlns:ds="{NS_XML_DSIG}" URI="#_r"/></r>"##
        );
        let doc = Document::parse(&xml).unwrap();
        let assertion = doc.root.child_elements().next().unwrap();
        let reference = doc.root.child(NS_XML_DSIG, "Reference").unwrap();
        assert!(check_reference_target(&doc, assertion, reference).is_err());
        assert!(check_reference_target(&doc, &doc.root, reference).is_ok());
    }
}
