// SAML 2.0 service-provider implementing the common SSO capability set.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use openssl::x509::X509;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use sso_bridge_core::audit::{AuditAction, AuditEvent, AuditSink};
use sso_bridge_core::clock::Clock;
use sso_bridge_core::config::{ProviderType, SamlSettings, SsoConfiguration};
use sso_bridge_core::error::{Result, SsoError};
use sso_bridge_core::mapping::{self, EMAIL_CLAIMS, FIRST_NAME_CLAIMS, LAST_NAME_CLAIMS, USERNAME_CLAIMS};
use sso_bridge_core::provider::SsoProvider;
use sso_bridge_core::types::{CallbackParams, Credentials, ProviderUserInfo, SsoSession, TokenSet};

use crate::conditions::{validate_conditions, ValidationContext};
use crate::metadata::{build_sp_metadata, SpMetadata};
use crate::request::{build_authn_request, build_sso_redirect_url, encode_authn_request};
use crate::response::{decode_saml_response, parse_document, SamlAssertion};
use crate::signature::{parse_certificate, verify_document};
use crate::xml::Document;

/// Redirect login and POSTed-response handling for one configured IdP.
#[derive(Clone)]
pub struct SamlProvider {
    config: SsoConfiguration,
    settings: SamlSettings,
    certificate: X509,
    sp_entity_id: String,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl fmt::Debug for SamlProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamlProvider")
            .field("config_id", &self.config.id)
            .field("sp_entity_id", &self.sp_entity_id)
            .field("idp_entity_id", &self.settings.entity_id)
            .finish()
    }
}

impl SamlProvider {
    /// Bind to `config`. The certificate is parsed here, so a configuration
    /// with an unusable certificate never yields a provider.
    ///
    /// `sp_entity_id` is our own entity id; without one the ACS URL is used.
    pub fn new(
        config: SsoConfiguration,
        sp_entity_id: Option<&str>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let settings = config.saml_settings()?.clone();
        let certificate = parse_certificate(&settings.certificate)?;
        let sp_entity_id = sp_entity_id
            .filter(|id| !id.is_empty())
            .unwrap_or(&settings.acs_url)
            .to_string();

        Ok(Self {
            config,
            settings,
            certificate,
            sp_entity_id,
            clock,
            audit,
        })
    }

    pub fn config(&self) -> &SsoConfiguration {
        &self.config
    }

    pub fn sp_entity_id(&self) -> &str {
        &self.sp_entity_id
    }

    /// SP metadata for this configuration.
    pub fn sp_metadata(&self) -> String {
        build_sp_metadata(&SpMetadata {
            entity_id: self.sp_entity_id.clone(),
            acs_url: self.settings.acs_url.clone(),
            name_id_format: self.settings.name_id_format.clone(),
        })
    }

    /// Verify and validate a decoded response document, returning its
    /// assertion.
    pub fn verify_response(&self, xml: &str) -> Result<SamlAssertion> {
        let doc = Document::parse(xml)?;
        let response = parse_document(&doc)?;

        // Claims and status are only read once the signature verifies.
        let mut accepted: Vec<&str> = Vec::new();
        if let Some(id) = response.id.as_deref() {
            accepted.push(id);
        }
        if let Some(assertion) = response.assertion.as_ref() {
            accepted.push(&assertion.id);
        }
        verify_document(&doc, &self.certificate, &accepted)?;

        let ctx = ValidationContext::new(
            self.clock.now(),
            &self.sp_entity_id,
            &self.settings.entity_id,
            &self.settings.acs_url,
        );
        validate_conditions(&response, &ctx).cloned()
    }

    fn user_info(&self, assertion: SamlAssertion) -> ProviderUserInfo {
        let claims: HashMap<String, Value> = assertion
            .attributes
            .into_iter()
            .map(|(name, mut values)| {
                let value = if values.len() == 1 {
                    Value::String(values.remove(0))
                } else {
                    Value::from(values)
                };
                (name, value)
            })
            .collect();

        let lookup = |field: &str, candidates: &[&str]| {
            mapping::resolve_attribute(&claims, &self.config.attribute_mapping, field, candidates)
        };

        let name_id_is_email = assertion
            .name_id_format
            .as_deref()
            .unwrap_or(&self.settings.name_id_format)
            .ends_with(":emailAddress");
        let email = if name_id_is_email {
            Some(assertion.name_id.clone())
        } else {
            lookup("email", EMAIL_CLAIMS)
        };

        ProviderUserInfo {
            email,
            first_name: lookup("firstName", FIRST_NAME_CLAIMS),
            last_name: lookup("lastName", LAST_NAME_CLAIMS),
            username: lookup("username", USERNAME_CLAIMS),
            roles: mapping::map_roles(&claims, &self.config.role_mapping),
            groups: mapping::map_groups(&claims, &self.config.group_mapping),
            id: assertion.name_id,
            attributes: claims,
            tokens: None,
        }
    }
}

#[async_trait]
impl SsoProvider for SamlProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Saml
    }

    fn get_auth_url(&self, state: &str) -> Result<String> {
        let (xml, request) = build_authn_request(
            &self.sp_entity_id,
            &self.settings.acs_url,
            &self.settings.sso_url,
            &self.settings.name_id_format,
            self.clock.now(),
        );
        debug!(config_id = %self.config.id, request_id = %request.id, "built SAML AuthnRequest");
        Ok(build_sso_redirect_url(
            &self.settings.sso_url,
            &encode_authn_request(&xml),
            Some(state),
        ))
    }

    async fn handle_callback(&self, params: &CallbackParams) -> Result<ProviderUserInfo> {
        let encoded = params
            .get("SAMLResponse")
            .ok_or(SsoError::MissingSamlResponse)?;
        let xml = decode_saml_response(encoded)?;

        let assertion = self.verify_response(&xml).map_err(|e| {
            warn!(config_id = %self.config.id, error = %e, "SAML response rejected");
            e
        })?;

        let info = self.user_info(assertion);
        debug!(config_id = %self.config.id, provider_user_id = %info.id, "saml callback resolved");
        Ok(info)
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenSet> {
        Err(SsoError::unsupported("SAML", "token refresh"))
    }

    async fn authenticate(&self, _credentials: &Credentials) -> Result<ProviderUserInfo> {
        Err(SsoError::unsupported("SAML", "direct credential authentication"))
    }

    async fn logout(&self, session: &SsoSession) -> Result<()> {
        info!(config_id = %self.config.id, session_id = %session.id, "saml logout");
        self.audit
            .record(
                AuditEvent::success(AuditAction::Logout)
                    .tenant(&self.config.tenant_id)
                    .config(&self.config.id)
                    .user(&session.user_id)
                    .details(json!({ "sessionId": session.id, "provider": "saml" })),
            )
            .await;
        Ok(())
    }
}
