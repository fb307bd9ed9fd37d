//! `samlp:Response` parsing.

use std::collections::HashMap;

use base64::Engine;
use chrono::{DateTime, Utc};

use sso_bridge_core::error::{Result, SsoError};

use crate::xml::Document;

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// The parts of a SAML response the service provider acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamlResponse {
    pub id: Option<String>,
    pub destination: Option<String>,
    pub in_response_to: Option<String>,
    pub issuer: Option<String>,
    pub status_code: String,
    pub status_message: Option<String>,
    /// `None` only for non-success responses.
    pub assertion: Option<SamlAssertion>,
}

impl SamlResponse {
    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_SUCCESS
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamlAssertion {
    pub id: String,
    pub issuer: Option<String>,
    pub name_id: String,
    pub name_id_format: Option<String>,
    pub session_index: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    pub audiences: Vec<String>,
    /// From `SubjectConfirmationData`.
    pub recipient: Option<String>,
    pub subject_not_on_or_after: Option<DateTime<Utc>>,
    /// Attribute statement flattened by `Name` (and `FriendlyName` when set).
    pub attributes: HashMap<String, Vec<String>>,
}

fn invalid(msg: impl Into<String>) -> SsoError {
    SsoError::InvalidSamlResponse(msg.into())
}

fn parse_instant(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| invalid(format!("invalid timestamp {v:?}: {e}")))
        })
        .transpose()
}

/// Decode the `SAMLResponse` form value. Line breaks inserted by some IdPs
/// are tolerated.
pub fn decode_saml_response(encoded: &str) -> Result<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| invalid(format!("SAMLResponse is not valid base64: {e}")))?;
    String::from_utf8(bytes).map_err(|_| invalid("SAMLResponse is not valid UTF-8"))
}

/// Parse a response document. At most one assertion is accepted and
/// encrypted assertions are refused.
pub fn parse_response(xml: &str) -> Result<SamlResponse> {
    let doc = Document::parse(xml)?;
    parse_document(&doc)
}

pub(crate) fn parse_document(doc: &Document<'_>) -> Result<SamlResponse> {
    let root = doc.root();
    if doc.element(root).local != "Response" {
        return Err(invalid(format!(
            "expected a Response element, found {}",
            doc.element(root).local
        )));
    }

    if !doc.all("EncryptedAssertion").is_empty() {
        return Err(invalid("encrypted assertions are not supported"));
    }

    let status = doc
        .child(root, "Status")
        .ok_or_else(|| invalid("response has no Status"))?;
    let status_code = doc
        .child(status, "StatusCode")
        .and_then(|sc| doc.attr(sc, "Value"))
        .ok_or_else(|| invalid("response has no StatusCode"))?
        .to_string();
    let status_message = doc.child(status, "StatusMessage").map(|m| doc.text(m));

    let assertions = doc.all("Assertion");
    if assertions.len() > 1 {
        return Err(invalid(format!(
            "expected exactly one assertion, found {}",
            assertions.len()
        )));
    }
    let assertion = assertions
        .first()
        .map(|&a| parse_assertion(doc, a))
        .transpose()?;

    Ok(SamlResponse {
        id: doc.attr(root, "ID").map(str::to_string),
        destination: doc.attr(root, "Destination").map(str::to_string),
        in_response_to: doc.attr(root, "InResponseTo").map(str::to_string),
        issuer: doc.child(root, "Issuer").map(|i| doc.text(i)),
        status_code,
        status_message,
        assertion,
    })
}

fn parse_assertion(doc: &Document<'_>, idx: usize) -> Result<SamlAssertion> {
    let id = doc
        .attr(idx, "ID")
        .ok_or_else(|| invalid("assertion has no ID"))?
        .to_string();

    let subject = doc
        .child(idx, "Subject")
        .ok_or_else(|| invalid("assertion has no Subject"))?;
    let name_id_el = doc
        .child(subject, "NameID")
        .ok_or_else(|| invalid("assertion has no NameID"))?;
    let name_id = doc.text(name_id_el);
    if name_id.is_empty() {
        return Err(invalid("NameID is empty"));
    }

    let confirmation = doc.descendant(subject, "SubjectConfirmationData");
    let conditions = doc.child(idx, "Conditions");

    let audiences = conditions
        .map(|c| {
            doc.descendants(c)
                .filter(|&i| doc.element(i).local == "Audience")
                .map(|i| doc.text(i))
                .collect()
        })
        .unwrap_or_default();

    let mut attributes: HashMap<String, Vec<String>> = HashMap::new();
    for statement in doc
        .children(idx)
        .filter(|&i| doc.element(i).local == "AttributeStatement")
    {
        for attr in doc
            .children(statement)
            .filter(|&i| doc.element(i).local == "Attribute")
        {
            let values: Vec<String> = doc
                .children(attr)
                .filter(|&i| doc.element(i).local == "AttributeValue")
                .map(|i| doc.text(i))
                .collect();
            for key in [doc.attr(attr, "Name"), doc.attr(attr, "FriendlyName")]
                .into_iter()
                .flatten()
            {
                attributes
                    .entry(key.to_string())
                    .or_default()
                    .extend(values.iter().cloned());
            }
        }
    }

    Ok(SamlAssertion {
        id,
        issuer: doc.child(idx, "Issuer").map(|i| doc.text(i)),
        name_id,
        name_id_format: doc.attr(name_id_el, "Format").map(str::to_string),
        session_index: doc
            .child(idx, "AuthnStatement")
            .and_then(|s| doc.attr(s, "SessionIndex"))
            .map(str::to_string),
        not_before: parse_instant(conditions.and_then(|c| doc.attr(c, "NotBefore")))?,
        not_on_or_after: parse_instant(conditions.and_then(|c| doc.attr(c, "NotOnOrAfter")))?,
        audiences,
        recipient: confirmation
            .and_then(|c| doc.attr(c, "Recipient"))
            .map(str::to_string),
        subject_not_on_or_after: parse_instant(
            confirmation.and_then(|c| doc.attr(c, "NotOnOrAfter")),
        )?,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_resp1" Destination="https://sp.example.com/acs" InResponseTo="_req1">
  <saml:Issuer>https://idp.example.com</saml:Issuer>
  <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
  <saml:Assertion ID="_a1" Version="2.0">
    <saml:Issuer>https://idp.example.com</saml:Issuer>
    <saml:Subject>
      <saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress">user@example.com</saml:NameID>
      <saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">
        <saml:SubjectConfirmationData Recipient="https://sp.example.com/acs" NotOnOrAfter="2030-01-01T00:05:00Z"/>
      </saml:SubjectConfirmation>
    </saml:Subject>
    <saml:Conditions NotBefore="2030-01-01T00:00:00Z" NotOnOrAfter="2030-01-01T00:05:00Z">
      <saml:AudienceRestriction><saml:Audience>https://sp.example.com</saml:Audience></saml:AudienceRestriction>
    </saml:Conditions>
    <saml:AuthnStatement SessionIndex="_s1"/>
    <saml:AttributeStatement>
      <saml:Attribute Name="first_name"><saml:AttributeValue>John</saml:AttributeValue></saml:Attribute>
      <saml:Attribute Name="urn:oid:2.5.4.4" FriendlyName="last_name"><saml:AttributeValue>Doe</saml:AttributeValue></saml:Attribute>
      <saml:Attribute Name="groups"><saml:AttributeValue>eng</saml:AttributeValue><saml:AttributeValue>ops</saml:AttributeValue></saml:Attribute>
    </saml:AttributeStatement>
  </saml:Assertion>
</samlp:Response>"#;

    #[test]
    fn test_parse_response() {
        let resp = parse_response(RESPONSE).unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.id.as_deref(), Some("_resp1"));
        assert_eq!(resp.issuer.as_deref(), Some("https://idp.example.com"));
        assert_eq!(resp.in_response_to.as_deref(), Some("_req1"));

        let a = resp.assertion.unwrap();
        assert_eq!(a.id, "_a1");
        assert_eq!(a.name_id, "user@example.com");
        assert_eq!(a.audiences, vec!["https://sp.example.com"]);
        assert_eq!(a.session_index.as_deref(), Some("_s1"));
        assert_eq!(a.recipient.as_deref(), Some("https://sp.example.com/acs"));
        assert!(a.not_before.unwrap() < a.not_on_or_after.unwrap());
        assert_eq!(a.attributes["first_name"], vec!["John"]);
        assert_eq!(a.attributes["last_name"], vec!["Doe"]);
        assert_eq!(a.attributes["urn:oid:2.5.4.4"], vec!["Doe"]);
        assert_eq!(a.attributes["groups"], vec!["eng", "ops"]);
    }

    #[test]
    fn test_non_success_status_without_assertion() {
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"><samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Requester"/><samlp:StatusMessage>denied</samlp:StatusMessage></samlp:Status></samlp:Response>"#;
        let resp = parse_response(xml).unwrap();
        assert!(!resp.is_success());
        assert_eq!(resp.status_message.as_deref(), Some("denied"));
        assert!(resp.assertion.is_none());
    }

    #[test]
    fn test_multiple_assertions_rejected() {
        let doubled = RESPONSE.replacen(
            "</samlp:Response>",
            r#"<saml:Assertion ID="_a2"/></samlp:Response>"#,
            1,
        );
        let err = parse_response(&doubled).unwrap_err();
        assert!(matches!(err, SsoError::InvalidSamlResponse(ref m) if m.contains("exactly one")));
    }

    #[test]
    fn test_encrypted_assertion_rejected() {
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"><samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status><saml:EncryptedAssertion/></samlp:Response>"#;
        assert!(parse_response(xml).is_err());
    }

    #[test]
    fn test_wrong_root_rejected() {
        assert!(parse_response("<foo/>").is_err());
    }

    #[test]
    fn test_decode_tolerates_line_breaks() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("<a/>");
        let (head, tail) = encoded.split_at(2);
        assert_eq!(decode_saml_response(&format!("{head}\r\n{tail}")).unwrap(), "<a/>");
        assert!(decode_saml_response("%%%").is_err());
    }
}
