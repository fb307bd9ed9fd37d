//! Enveloped XML-DSig verification against the IdP certificate.
//!
//! A response is trusted only when a `ds:Signature` whose single `Reference`
//! points at the Response itself or at its one assertion verifies: the
//! referenced element (minus the signature), canonicalized as its transforms
//! say, must hash to `DigestValue`, and `SignedInfo`, canonicalized per its
//! `CanonicalizationMethod`, must verify under the certificate's key.

use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::hash::{hash, MessageDigest};
use openssl::sign::Verifier;
use openssl::x509::X509;
use tracing::debug;

use sso_bridge_core::error::{Result, SsoError};

use crate::c14n::Canonicalization;
use crate::xml::Document;

pub const ALG_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const ALG_RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
pub const ALG_RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

pub const DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const DIGEST_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
pub const DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

pub const TRANSFORM_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

fn failed(msg: impl Into<String>) -> SsoError {
    SsoError::SignatureVerification(msg.into())
}

/// Parse the configured IdP certificate: PEM, or bare base64 DER as found in
/// IdP metadata.
pub fn parse_certificate(certificate: &str) -> Result<X509> {
    let trimmed = certificate.trim();
    let parsed = if trimmed.contains("-----BEGIN CERTIFICATE-----") {
        X509::from_pem(trimmed.as_bytes()).map_err(|e| e.to_string())
    } else {
        let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(compact)
            .map_err(|e| e.to_string())
            .and_then(|der| X509::from_der(&der).map_err(|e| e.to_string()))
    };
    parsed.map_err(|e| SsoError::InvalidConfiguration(format!("invalid SAML certificate: {e}")))
}

pub(crate) fn digest_algorithm(uri: &str) -> Result<MessageDigest> {
    match uri {
        DIGEST_SHA1 => Ok(MessageDigest::sha1()),
        DIGEST_SHA256 => Ok(MessageDigest::sha256()),
        DIGEST_SHA384 => Ok(MessageDigest::sha384()),
        DIGEST_SHA512 => Ok(MessageDigest::sha512()),
        other => Err(failed(format!("unsupported digest algorithm {other}"))),
    }
}

pub(crate) fn signature_algorithm(uri: &str) -> Result<MessageDigest> {
    match uri {
        ALG_RSA_SHA1 => Ok(MessageDigest::sha1()),
        ALG_RSA_SHA256 => Ok(MessageDigest::sha256()),
        ALG_RSA_SHA384 => Ok(MessageDigest::sha384()),
        ALG_RSA_SHA512 => Ok(MessageDigest::sha512()),
        other => Err(failed(format!("unsupported signature algorithm {other}"))),
    }
}

/// Base64 digest of `target` with `signature` cut out, as the enveloped
/// transform prescribes.
pub(crate) fn reference_digest(
    doc: &Document<'_>,
    target: usize,
    signature: usize,
    method: &Canonicalization,
    digest: MessageDigest,
) -> Result<String> {
    let canonical = method.canonicalize(doc, target, Some(signature))?;
    let bytes = hash(digest, canonical.as_bytes())
        .map_err(|e| failed(format!("digest computation failed: {e}")))?;
    Ok(STANDARD.encode(bytes))
}

pub(crate) fn canonical_signed_info(
    doc: &Document<'_>,
    signed_info: usize,
    method: &Canonicalization,
) -> Result<String> {
    method.canonicalize(doc, signed_info, None)
}

/// The canonicalization an algorithm-bearing element names, with the
/// `InclusiveNamespaces PrefixList` it carries.
fn canonicalization_of(doc: &Document<'_>, element: usize) -> Result<Canonicalization> {
    let alg = doc.attr(element, "Algorithm").unwrap_or_default();
    let method = Canonicalization::from_algorithm(alg)
        .ok_or_else(|| failed(format!("unsupported canonicalization {alg}")))?;
    Ok(match doc
        .child(element, "InclusiveNamespaces")
        .and_then(|i| doc.attr(i, "PrefixList"))
    {
        Some(list) => method.with_prefix_list(list),
        None => method,
    })
}

/// One `ds:Signature` element, resolved to the element it covers.
struct SignatureParts {
    signed_info: usize,
    target: usize,
    target_id: String,
    reference_c14n: Canonicalization,
    signed_info_c14n: Canonicalization,
    digest_method: String,
    digest_value: String,
    signature_method: String,
    signature_value: String,
}

fn resolve(doc: &Document<'_>, signature: usize, accepted_ids: &[&str]) -> Result<SignatureParts> {
    let signed_info = doc
        .child(signature, "SignedInfo")
        .ok_or_else(|| failed("Signature has no SignedInfo"))?;

    let references: Vec<usize> = doc
        .children(signed_info)
        .filter(|&i| doc.element(i).local == "Reference")
        .collect();
    let [reference] = references[..] else {
        return Err(failed(format!(
            "expected exactly one Reference, found {}",
            references.len()
        )));
    };

    let uri = doc.attr(reference, "URI").unwrap_or_default();
    let target_id = uri
        .strip_prefix('#')
        .filter(|id| accepted_ids.contains(id))
        .ok_or_else(|| failed(format!("Reference {uri:?} does not cover the response or its assertion")))?
        .to_string();
    let target = doc
        .by_id(&target_id)?
        .ok_or_else(|| failed(format!("no element with ID {target_id}")))?;
    if doc.element(signature).parent != Some(target) {
        return Err(failed("Signature is not enveloped by the element it references"));
    }

    // Without an explicit canonicalization transform the node-set is
    // serialized with inclusive C14N.
    let mut reference_c14n = Canonicalization::inclusive();
    let mut enveloped = false;
    if let Some(transforms) = doc.child(reference, "Transforms") {
        for t in doc.children(transforms) {
            let alg = doc.attr(t, "Algorithm").unwrap_or_default();
            if alg == TRANSFORM_ENVELOPED {
                enveloped = true;
            } else {
                reference_c14n = canonicalization_of(doc, t)
                    .map_err(|_| failed(format!("unsupported transform {alg}")))?;
            }
        }
    }
    if !enveloped {
        return Err(failed("Reference lacks the enveloped-signature transform"));
    }

    let canonicalization_method = doc
        .child(signed_info, "CanonicalizationMethod")
        .ok_or_else(|| failed("missing CanonicalizationMethod"))?;
    let signed_info_c14n = canonicalization_of(doc, canonicalization_method)?;

    let attr_of = |parent: usize, local: &str| {
        doc.child(parent, local)
            .and_then(|i| doc.attr(i, "Algorithm"))
            .map(str::to_string)
            .ok_or_else(|| failed(format!("missing {local}")))
    };
    let text_of = |parent: usize, local: &str| {
        doc.child(parent, local)
            .map(|i| doc.text(i).chars().filter(|c| !c.is_whitespace()).collect::<String>())
            .ok_or_else(|| failed(format!("missing {local}")))
    };

    Ok(SignatureParts {
        signed_info,
        target,
        target_id,
        reference_c14n: reference_c14n.without_comments(),
        signed_info_c14n,
        digest_method: attr_of(reference, "DigestMethod")?,
        digest_value: text_of(reference, "DigestValue")?,
        signature_method: attr_of(signed_info, "SignatureMethod")?,
        signature_value: text_of(signature, "SignatureValue")?,
    })
}

fn check(doc: &Document<'_>, signature: usize, parts: &SignatureParts, cert: &X509) -> Result<()> {
    let computed = reference_digest(
        doc,
        parts.target,
        signature,
        &parts.reference_c14n,
        digest_algorithm(&parts.digest_method)?,
    )?;
    if computed != parts.digest_value {
        return Err(failed(format!("digest mismatch for #{}", parts.target_id)));
    }

    let signed_info = canonical_signed_info(doc, parts.signed_info, &parts.signed_info_c14n)?;
    let signature_bytes = STANDARD
        .decode(&parts.signature_value)
        .map_err(|e| failed(format!("SignatureValue is not base64: {e}")))?;
    let public_key = cert
        .public_key()
        .map_err(|e| failed(format!("certificate has no usable public key: {e}")))?;

    let mut verifier = Verifier::new(signature_algorithm(&parts.signature_method)?, &public_key)
        .map_err(|e| failed(format!("verifier creation failed: {e}")))?;
    verifier
        .update(signed_info.as_bytes())
        .map_err(|e| failed(format!("signature update failed: {e}")))?;
    let valid = verifier
        .verify(&signature_bytes)
        .map_err(|e| failed(format!("signature verification failed: {e}")))?;

    if valid {
        Ok(())
    } else {
        Err(failed("signature does not match the configured certificate"))
    }
}

/// Verify the document's signatures; returns the ID of the covered element.
/// At least one signature must reference one of `accepted_ids` and verify.
pub(crate) fn verify_document(doc: &Document<'_>, cert: &X509, accepted_ids: &[&str]) -> Result<String> {
    let signatures = doc.all("Signature");
    if signatures.is_empty() {
        return Err(failed("response is not signed"));
    }

    let mut last_error = None;
    for signature in signatures {
        match resolve(doc, signature, accepted_ids).and_then(|parts| {
            check(doc, signature, &parts, cert)?;
            Ok(parts.target_id)
        }) {
            Ok(id) => {
                debug!(reference = %id, "SAML signature verified");
                return Ok(id);
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| failed("no valid signature")))
}

/// Verify a response document on its own, accepting a signature over the
/// Response or over its assertion.
pub fn verify_signature(xml: &str, cert: &X509) -> Result<String> {
    let doc = Document::parse(xml)?;
    let root = doc.root();
    let mut accepted: Vec<&str> = Vec::new();
    if let Some(id) = doc.attr(root, "ID") {
        accepted.push(id);
    }
    if let Some(&assertion) = doc.all("Assertion").first() {
        if let Some(id) = doc.attr(assertion, "ID") {
            accepted.push(id);
        }
    }
    verify_document(&doc, cert, &accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{ResponseFixture, SignTarget, SigningFixture};
    use chrono::Utc;

    /// Signed with an outside toolchain: exclusive c14n with an
    /// `InclusiveNamespaces PrefixList`, pretty-printed, unsorted attributes.
    const EXTERNAL_RESPONSE: &str = include_str!("../tests/data/external_response.xml");
    const EXTERNAL_IDP_CERT: &str = include_str!("../tests/data/external_idp.pem");

    #[test]
    fn test_parse_certificate_pem_and_bare() {
        let signer = SigningFixture::generate();
        assert!(parse_certificate(&signer.certificate_pem()).is_ok());
        assert!(parse_certificate(&signer.certificate_base64()).is_ok());

        let err = parse_certificate("not a certificate").unwrap_err();
        assert!(matches!(err, SsoError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_assertion_signature_verifies() {
        let signer = SigningFixture::generate();
        let xml = ResponseFixture::new(Utc::now()).to_xml(&signer);
        assert_eq!(verify_signature(&xml, signer.certificate()).unwrap(), "_assertion-1");
    }

    #[test]
    fn test_response_signature_verifies() {
        let signer = SigningFixture::generate();
        let xml = ResponseFixture::new(Utc::now())
            .sign(SignTarget::Response)
            .to_xml(&signer);
        assert_eq!(verify_signature(&xml, signer.certificate()).unwrap(), "_response-1");
    }

    #[test]
    fn test_tampered_assertion_fails_digest() {
        let signer = SigningFixture::generate();
        let xml = ResponseFixture::new(Utc::now())
            .to_xml(&signer)
            .replace("user@example.com", "admin@example.com");
        let err = verify_signature(&xml, signer.certificate()).unwrap_err();
        assert!(matches!(err, SsoError::SignatureVerification(ref m) if m.contains("digest")));
    }

    #[test]
    fn test_other_certificate_fails() {
        let signer = SigningFixture::generate();
        let other = SigningFixture::generate();
        let xml = ResponseFixture::new(Utc::now()).to_xml(&signer);
        let err = verify_signature(&xml, other.certificate()).unwrap_err();
        assert!(matches!(err, SsoError::SignatureVerification(_)));
    }

    #[test]
    fn test_unsigned_rejected() {
        let signer = SigningFixture::generate();
        let xml = ResponseFixture::new(Utc::now())
            .sign(SignTarget::None)
            .to_xml(&signer);
        let err = verify_signature(&xml, signer.certificate()).unwrap_err();
        assert_eq!(err, SsoError::SignatureVerification("response is not signed".into()));
    }

    #[test]
    fn test_externally_signed_assertion_verifies() {
        let cert = parse_certificate(EXTERNAL_IDP_CERT).unwrap();
        assert_eq!(verify_signature(EXTERNAL_RESPONSE, &cert).unwrap(), "_a1");
    }

    #[test]
    fn test_externally_signed_assertion_tamper_detected() {
        let cert = parse_certificate(EXTERNAL_IDP_CERT).unwrap();
        let xml = EXTERNAL_RESPONSE.replace("R&amp;D", "Sales");
        let err = verify_signature(&xml, &cert).unwrap_err();
        assert!(matches!(err, SsoError::SignatureVerification(ref m) if m.contains("digest")));
    }

    #[test]
    fn test_comments_are_not_digested() {
        let cert = parse_certificate(EXTERNAL_IDP_CERT).unwrap();
        let xml = EXTERNAL_RESPONSE.replace(
            "<!-- subject of the assertion -->",
            "<!-- rewritten in transit -->",
        );
        assert_eq!(verify_signature(&xml, &cert).unwrap(), "_a1");
    }

    #[test]
    fn test_missing_enveloped_transform_rejected() {
        let signer = SigningFixture::generate();
        let xml = ResponseFixture::new(Utc::now())
            .to_xml(&signer)
            .replace(&format!(r#"<ds:Transform Algorithm="{TRANSFORM_ENVELOPED}"/>"#), "");
        let err = verify_signature(&xml, signer.certificate()).unwrap_err();
        assert!(matches!(err, SsoError::SignatureVerification(ref m) if m.contains("enveloped")));
    }

    #[test]
    fn test_unknown_canonicalization_rejected() {
        let signer = SigningFixture::generate();
        let xml = ResponseFixture::new(Utc::now()).to_xml(&signer).replace(
            r#"<ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/>"#,
            r#"<ds:CanonicalizationMethod Algorithm="http://www.w3.org/2006/12/xml-c14n11"/>"#,
        );
        let err = verify_signature(&xml, signer.certificate()).unwrap_err();
        assert!(matches!(err, SsoError::SignatureVerification(ref m) if m.contains("canonicalization")));
    }

    #[test]
    fn test_algorithm_tables() {
        assert!(digest_algorithm(DIGEST_SHA1).is_ok());
        assert!(digest_algorithm(DIGEST_SHA512).is_ok());
        assert!(digest_algorithm("urn:md5").is_err());
        assert!(signature_algorithm(ALG_RSA_SHA384).is_ok());
        assert!(signature_algorithm("urn:dsa").is_err());
    }
}
