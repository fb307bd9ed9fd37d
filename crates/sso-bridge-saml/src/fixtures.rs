//! Signed SAML responses for tests.
//!
//! `SigningFixture` holds a throwaway RSA key and a self-signed certificate;
//! `ResponseFixture` renders a `samlp:Response` and signs it with the same
//! digest and canonicalization routines the verifier uses.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::x509::{X509Builder, X509NameBuilder, X509};

use sso_bridge_core::config::DEFAULT_NAME_ID_FORMAT;

use crate::c14n::{Canonicalization, C14N_EXCLUSIVE};
use crate::response::STATUS_SUCCESS;
use crate::signature::{
    canonical_signed_info, reference_digest, ALG_RSA_SHA256, DIGEST_SHA256, TRANSFORM_ENVELOPED,
};
use crate::xml::Document;

pub const FIXTURE_IDP_ENTITY_ID: &str = "https://idp.example.com/metadata";
pub const FIXTURE_IDP_SSO_URL: &str = "https://idp.example.com/sso";
pub const FIXTURE_SP_ENTITY_ID: &str = "https://sp.example.com";
pub const FIXTURE_ACS_URL: &str = "https://sp.example.com/sso/acs";

/// RSA key plus self-signed certificate standing in for an IdP.
pub struct SigningFixture {
    key: PKey<Private>,
    cert: X509,
}

impl SigningFixture {
    pub fn generate() -> Self {
        let key = PKey::from_rsa(Rsa::generate(2048).expect("generate RSA key"))
            .expect("wrap RSA key");

        let mut name = X509NameBuilder::new().expect("name builder");
        name.append_entry_by_text("CN", "idp.example.com")
            .expect("CN entry");
        let name = name.build();

        let mut serial = BigNum::new().expect("bignum");
        serial
            .rand(64, MsbOption::MAYBE_ZERO, false)
            .expect("random serial");

        let mut builder = X509Builder::new().expect("x509 builder");
        builder.set_version(2).expect("version");
        builder
            .set_serial_number(&serial.to_asn1_integer().expect("serial"))
            .expect("set serial");
        builder.set_subject_name(&name).expect("subject");
        builder.set_issuer_name(&name).expect("issuer");
        builder.set_pubkey(&key).expect("pubkey");
        builder
            .set_not_before(&Asn1Time::days_from_now(0).expect("not before"))
            .expect("set not before");
        builder
            .set_not_after(&Asn1Time::days_from_now(365).expect("not after"))
            .expect("set not after");
        builder
            .sign(&key, MessageDigest::sha256())
            .expect("self-sign certificate");

        Self {
            key,
            cert: builder.build(),
        }
    }

    pub fn certificate(&self) -> &X509 {
        &self.cert
    }

    pub fn certificate_pem(&self) -> String {
        String::from_utf8(self.cert.to_pem().expect("PEM encode")).expect("PEM is ASCII")
    }

    /// Bare base64 DER, the form IdP metadata usually carries.
    pub fn certificate_base64(&self) -> String {
        STANDARD.encode(self.cert.to_der().expect("DER encode"))
    }

    fn sign(&self, data: &[u8]) -> String {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.key).expect("signer");
        signer.update(data).expect("signer update");
        STANDARD.encode(signer.sign_to_vec().expect("sign"))
    }
}

/// Which element carries the enveloped signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignTarget {
    Assertion,
    Response,
    None,
}

/// Builder for a SAML response document.
#[derive(Debug, Clone)]
pub struct ResponseFixture {
    pub response_id: String,
    pub assertion_id: String,
    pub issuer: String,
    pub name_id: String,
    pub name_id_format: String,
    pub destination: String,
    pub audience: Option<String>,
    pub issue_instant: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub not_on_or_after: DateTime<Utc>,
    pub status: String,
    pub attributes: Vec<(String, Vec<String>)>,
    pub sign: SignTarget,
    pub injected_assertion: bool,
}

fn instant(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

impl ResponseFixture {
    /// A successful, assertion-signed response for `user@example.com` with
    /// `first_name=John` and `last_name=Doe`, valid for five minutes.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            response_id: "_response-1".into(),
            assertion_id: "_assertion-1".into(),
            issuer: FIXTURE_IDP_ENTITY_ID.into(),
            name_id: "user@example.com".into(),
            name_id_format: DEFAULT_NAME_ID_FORMAT.into(),
            destination: FIXTURE_ACS_URL.into(),
            audience: Some(FIXTURE_SP_ENTITY_ID.into()),
            issue_instant: now,
            not_before: now - Duration::minutes(1),
            not_on_or_after: now + Duration::minutes(5),
            status: STATUS_SUCCESS.into(),
            attributes: vec![
                ("first_name".into(), vec!["John".into()]),
                ("last_name".into(), vec!["Doe".into()]),
            ],
            sign: SignTarget::Assertion,
            injected_assertion: false,
        }
    }

    pub fn name_id(mut self, name_id: &str) -> Self {
        self.name_id = name_id.into();
        self
    }

    pub fn issuer(mut self, issuer: &str) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn audience(mut self, audience: Option<&str>) -> Self {
        self.audience = audience.map(str::to_string);
        self
    }

    pub fn not_on_or_after(mut self, at: DateTime<Utc>) -> Self {
        self.not_on_or_after = at;
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = status.into();
        self
    }

    pub fn attribute(mut self, name: &str, values: &[&str]) -> Self {
        self.attributes
            .push((name.into(), values.iter().map(|v| v.to_string()).collect()));
        self
    }

    pub fn sign(mut self, target: SignTarget) -> Self {
        self.sign = target;
        self
    }

    /// Append a second, unsigned assertion after the signed one.
    pub fn inject_assertion(mut self) -> Self {
        self.injected_assertion = true;
        self
    }

    fn signature_block(target_id: &str, digest: &str, signature: &str) -> String {
        format!(
            r##"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="{C14N_EXCLUSIVE}"/><ds:SignatureMethod Algorithm="{ALG_RSA_SHA256}"/><ds:Reference URI="#{target_id}"><ds:Transforms><ds:Transform Algorithm="{TRANSFORM_ENVELOPED}"/><ds:Transform Algorithm="{C14N_EXCLUSIVE}"/></ds:Transforms><ds:DigestMethod Algorithm="{DIGEST_SHA256}"/><ds:DigestValue>{digest}</ds:DigestValue></ds:Reference></ds:SignedInfo><ds:SignatureValue>{signature}</ds:SignatureValue></ds:Signature>"##
        )
    }

    fn render(&self, signature: Option<(&str, &str)>) -> String {
        let block_for = |target: SignTarget, id: &str| match signature {
            Some((digest, value)) if self.sign == target => {
                Self::signature_block(id, digest, value)
            }
            _ => String::new(),
        };

        let attributes: String = self
            .attributes
            .iter()
            .map(|(name, values)| {
                let values: String = values
                    .iter()
                    .map(|v| format!("<saml:AttributeValue>{v}</saml:AttributeValue>"))
                    .collect();
                format!(r#"<saml:Attribute Name="{name}">{values}</saml:Attribute>"#)
            })
            .collect();
        let audience = self
            .audience
            .as_deref()
            .map(|a| {
                format!("<saml:AudienceRestriction><saml:Audience>{a}</saml:Audience></saml:AudienceRestriction>")
            })
            .unwrap_or_default();
        let injected = if self.injected_assertion {
            format!(
                r#"<saml:Assertion ID="_injected" Version="2.0" IssueInstant="{now}"><saml:Issuer>{issuer}</saml:Issuer><saml:Subject><saml:NameID>attacker@example.com</saml:NameID></saml:Subject></saml:Assertion>"#,
                now = instant(self.issue_instant),
                issuer = self.issuer,
            )
        } else {
            String::new()
        };

        format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{rid}" Version="2.0" IssueInstant="{now}" Destination="{dest}"><saml:Issuer>{issuer}</saml:Issuer>{response_sig}<samlp:Status><samlp:StatusCode Value="{status}"/></samlp:Status><saml:Assertion ID="{aid}" Version="2.0" IssueInstant="{now}"><saml:Issuer>{issuer}</saml:Issuer>{assertion_sig}<saml:Subject><saml:NameID Format="{format}">{name_id}</saml:NameID><saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer"><saml:SubjectConfirmationData Recipient="{dest}" NotOnOrAfter="{noa}"/></saml:SubjectConfirmation></saml:Subject><saml:Conditions NotBefore="{nb}" NotOnOrAfter="{noa}">{audience}</saml:Conditions><saml:AuthnStatement AuthnInstant="{now}" SessionIndex="{aid}"/><saml:AttributeStatement>{attributes}</saml:AttributeStatement></saml:Assertion>{injected}</samlp:Response>"#,
            rid = self.response_id,
            aid = self.assertion_id,
            now = instant(self.issue_instant),
            nb = instant(self.not_before),
            noa = instant(self.not_on_or_after),
            dest = self.destination,
            issuer = self.issuer,
            status = self.status,
            format = self.name_id_format,
            name_id = self.name_id,
            response_sig = block_for(SignTarget::Response, &self.response_id),
            assertion_sig = block_for(SignTarget::Assertion, &self.assertion_id),
        )
    }

    /// Render and sign. The digest is computed over the document with an
    /// empty signature, then `SignedInfo` is signed once the digest is in.
    pub fn to_xml(&self, signer: &SigningFixture) -> String {
        let target_id = match self.sign {
            SignTarget::Assertion => self.assertion_id.as_str(),
            SignTarget::Response => self.response_id.as_str(),
            SignTarget::None => return self.render(None),
        };

        let locate = |doc: &Document<'_>| {
            let target = doc
                .by_id(target_id)
                .expect("unique ids")
                .expect("signed element present");
            let signature = doc
                .child(target, "Signature")
                .expect("signature placeholder");
            (target, signature)
        };

        let unsigned = self.render(Some(("", "")));
        let digest = {
            let doc = Document::parse(&unsigned).expect("fixture parses");
            let (target, signature) = locate(&doc);
            reference_digest(
                &doc,
                target,
                signature,
                &Canonicalization::exclusive(),
                MessageDigest::sha256(),
            )
            .expect("digest")
        };

        let with_digest = self.render(Some((digest.as_str(), "")));
        let signature_value = {
            let doc = Document::parse(&with_digest).expect("fixture parses");
            let (_, signature) = locate(&doc);
            let signed_info = doc.child(signature, "SignedInfo").expect("SignedInfo");
            let canonical = canonical_signed_info(&doc, signed_info, &Canonicalization::exclusive())
                .expect("canonical SignedInfo");
            signer.sign(canonical.as_bytes())
        };

        self.render(Some((digest.as_str(), signature_value.as_str())))
    }

    /// The `SAMLResponse` form value.
    pub fn to_base64(&self, signer: &SigningFixture) -> String {
        STANDARD.encode(self.to_xml(signer))
    }
}
