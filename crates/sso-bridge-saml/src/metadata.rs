// Service-provider metadata published to identity providers.

use quick_xml::escape::escape;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpMetadata {
    pub entity_id: String,
    pub acs_url: String,
    pub name_id_format: String,
}

/// Render the SP `EntityDescriptor` XML.
pub fn build_sp_metadata(metadata: &SpMetadata) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata"
    entityID="{entity_id}">
    <md:SPSSODescriptor
        AuthnRequestsSigned="false"
        WantAssertionsSigned="true"
        protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
        <md:NameIDFormat>{name_id_format}</md:NameIDFormat>
        <md:AssertionConsumerService
            Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"
            Location="{acs_url}"
            index="1"
            isDefault="true"/>
    </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
        entity_id = escape(metadata.entity_id.as_str()),
        acs_url = escape(metadata.acs_url.as_str()),
        name_id_format = escape(metadata.name_id_format.as_str()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_sp_metadata() {
        let xml = build_sp_metadata(&SpMetadata {
            entity_id: "https://sp.example.com".into(),
            acs_url: "https://sp.example.com/sso/acs?tenant=a&x=1".into(),
            name_id_format: "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress".into(),
        });
        assert!(xml.contains(r#"entityID="https://sp.example.com""#));
        assert!(xml.contains("tenant=a&amp;x=1"));
        assert!(xml.contains("WantAssertionsSigned=\"true\""));
    }
}
