//! AuthnRequest construction for the HTTP-Redirect binding.

use base64::Engine;
use chrono::{DateTime, Utc};
use quick_xml::escape::escape;

use sso_bridge_core::utils::generate_id_with_length;

/// The fields of an AuthnRequest we send, kept for correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthnRequest {
    pub id: String,
    pub issue_instant: DateTime<Utc>,
    pub issuer: String,
    pub destination: String,
    pub assertion_consumer_service_url: String,
    pub name_id_format: String,
}

impl AuthnRequest {
    pub fn new(
        sp_entity_id: &str,
        acs_url: &str,
        idp_sso_url: &str,
        name_id_format: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("_{}", generate_id_with_length(32)),
            issue_instant: now,
            issuer: sp_entity_id.to_string(),
            destination: idp_sso_url.to_string(),
            assertion_consumer_service_url: acs_url.to_string(),
            name_id_format: name_id_format.to_string(),
        }
    }

    pub fn to_xml(&self) -> String {
        format!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}" AssertionConsumerServiceURL="{acs}" ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"><saml:Issuer>{issuer}</saml:Issuer><samlp:NameIDPolicy Format="{format}" AllowCreate="true"/></samlp:AuthnRequest>"#,
            id = self.id,
            instant = self.issue_instant.format("%Y-%m-%dT%H:%M:%SZ"),
            destination = escape(self.destination.as_str()),
            acs = escape(self.assertion_consumer_service_url.as_str()),
            issuer = escape(self.issuer.as_str()),
            format = escape(self.name_id_format.as_str()),
        )
    }
}

/// Build an AuthnRequest, returning its XML alongside the request fields.
pub fn build_authn_request(
    sp_entity_id: &str,
    acs_url: &str,
    idp_sso_url: &str,
    name_id_format: &str,
    now: DateTime<Utc>,
) -> (String, AuthnRequest) {
    let request = AuthnRequest::new(sp_entity_id, acs_url, idp_sso_url, name_id_format, now);
    (request.to_xml(), request)
}

/// Plain base64 of the request XML (no DEFLATE).
pub fn encode_authn_request(xml: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(xml.as_bytes())
}

/// Append `SAMLRequest` (and `RelayState` when given) to the IdP SSO URL.
pub fn build_sso_redirect_url(
    idp_sso_url: &str,
    encoded_request: &str,
    relay_state: Option<&str>,
) -> String {
    let mut url = format!(
        "{}{}SAMLRequest={}",
        idp_sso_url,
        if idp_sso_url.contains('?') { "&" } else { "?" },
        urlencoding::encode(encoded_request),
    );
    if let Some(rs) = relay_state.filter(|rs| !rs.is_empty()) {
        url.push_str("&RelayState=");
        url.push_str(&urlencoding::encode(rs));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMAT: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";

    #[test]
    fn test_build_authn_request() {
        let now = Utc::now();
        let (xml, req) = build_authn_request(
            "https://sp.example.com",
            "https://sp.example.com/sso/callback",
            "https://idp.example.com/sso",
            FORMAT,
            now,
        );
        assert!(xml.starts_with("<samlp:AuthnRequest"));
        assert!(xml.contains("<saml:Issuer>https://sp.example.com</saml:Issuer>"));
        assert!(xml.contains(r#"Destination="https://idp.example.com/sso""#));
        assert!(xml.contains(FORMAT));
        assert!(req.id.starts_with('_'));
        assert_eq!(req.issue_instant, now);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let now = Utc::now();
        let (_, a) = build_authn_request("sp", "acs", "idp", FORMAT, now);
        let (_, b) = build_authn_request("sp", "acs", "idp", FORMAT, now);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_encode_authn_request() {
        let encoded = encode_authn_request("<xml>test</xml>");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .unwrap();
        assert_eq!(std::str::from_utf8(&decoded).unwrap(), "<xml>test</xml>");
    }

    #[test]
    fn test_build_sso_redirect_url() {
        let url = build_sso_redirect_url("https://idp.example.com/sso", "a+b/c=", Some("state-1"));
        assert_eq!(
            url,
            "https://idp.example.com/sso?SAMLRequest=a%2Bb%2Fc%3D&RelayState=state-1"
        );
    }

    #[test]
    fn test_redirect_url_with_existing_query() {
        let url = build_sso_redirect_url("https://idp.example.com/sso?tenant=x", "abc", None);
        assert_eq!(url, "https://idp.example.com/sso?tenant=x&SAMLRequest=abc");
    }
}
