// SSO configuration model.
//
// One `SsoConfiguration` per tenant + identity provider. Protocol-specific
// settings live in nested blocks; the block matching `provider_type` must be
// complete before the record is accepted, so incomplete configurations fail at
// creation rather than at first login.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SsoError};
use crate::utils::json::apply_merge_patch;

/// Default OAuth scope when none is configured.
pub const DEFAULT_OAUTH_SCOPE: &str = "openid email profile";

/// Default SAML NameID policy.
pub const DEFAULT_NAME_ID_FORMAT: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";

/// Default LDAP search filter. `{username}` is replaced by the escaped login name.
pub const DEFAULT_LDAP_USER_FILTER: &str = "(uid={username})";

/// Placeholder substituted into the LDAP search filter.
pub const USERNAME_PLACEHOLDER: &str = "{username}";

/// Fields the merge-patch update never touches.
const IMMUTABLE_FIELDS: &[&str] = &["id", "tenantId", "createdAt", "createdBy"];

/// String-to-string mapping table (attribute, role or group mapping).
pub type MappingTable = HashMap<String, String>;

// ─── Provider Type ───────────────────────────────────────────────

/// Protocol an identity provider speaks.
///
/// Unknown strings survive deserialization as `Other` so that dispatch can
/// reject them explicitly instead of silently defaulting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderType {
    Saml,
    OAuth,
    Ldap,
    Other(String),
}

impl ProviderType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Saml => "saml",
            Self::OAuth => "oauth",
            Self::Ldap => "ldap",
            Self::Other(s) => s.as_str(),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<String> for ProviderType {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "saml" => Self::Saml,
            "oauth" => Self::OAuth,
            "ldap" => Self::Ldap,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for ProviderType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ProviderType> for String {
    fn from(p: ProviderType) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Protocol Blocks ─────────────────────────────────────────────

/// OAuth2 / OIDC client settings.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub authorize_url: String,
    #[serde(default)]
    pub token_url: String,
    #[serde(default)]
    pub userinfo_url: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Callback URI registered with the provider. Filled from the environment
    /// when left empty at creation.
    #[serde(default)]
    pub redirect_uri: String,
}

impl fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("userinfo_url", &self.userinfo_url)
            .field("scope", &self.scope)
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// SAML 2.0 identity provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamlSettings {
    /// IdP entity id; when set, the assertion issuer must match it.
    #[serde(default)]
    pub entity_id: String,
    /// IdP single sign-on endpoint (HTTP-Redirect binding).
    #[serde(default)]
    pub sso_url: String,
    /// IdP signing certificate, PEM or bare base64 DER.
    #[serde(default)]
    pub certificate: String,
    /// Our assertion consumer service URL.
    #[serde(default)]
    pub acs_url: String,
    #[serde(default = "default_name_id_format")]
    pub name_id_format: String,
}

impl Default for SamlSettings {
    fn default() -> Self {
        Self {
            entity_id: String::new(),
            sso_url: String::new(),
            certificate: String::new(),
            acs_url: String::new(),
            name_id_format: default_name_id_format(),
        }
    }
}

/// Directory attribute names used to build `ProviderUserInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapAttributeNames {
    #[serde(default = "default_uid_attr")]
    pub username: String,
    #[serde(default = "default_mail_attr")]
    pub email: String,
    #[serde(default = "default_given_name_attr")]
    pub first_name: String,
    #[serde(default = "default_sn_attr")]
    pub last_name: String,
    #[serde(default = "default_member_of_attr")]
    pub groups: String,
}

impl Default for LdapAttributeNames {
    fn default() -> Self {
        Self {
            username: default_uid_attr(),
            email: default_mail_attr(),
            first_name: default_given_name_attr(),
            last_name: default_sn_attr(),
            groups: default_member_of_attr(),
        }
    }
}

impl LdapAttributeNames {
    /// All attribute names, for the search request.
    pub fn all(&self) -> Vec<String> {
        vec![
            self.username.clone(),
            self.email.clone(),
            self.first_name.clone(),
            self.last_name.clone(),
            self.groups.clone(),
        ]
    }
}

/// LDAP directory settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapSettings {
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub bind_dn: String,
    #[serde(default)]
    pub bind_password: String,
    #[serde(default)]
    pub base_dn: String,
    #[serde(default = "default_user_filter")]
    pub user_search_filter: String,
    #[serde(default)]
    pub attributes: LdapAttributeNames,
}

impl Default for LdapSettings {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            bind_dn: String::new(),
            bind_password: String::new(),
            base_dn: String::new(),
            user_search_filter: default_user_filter(),
            attributes: LdapAttributeNames::default(),
        }
    }
}

impl fmt::Debug for LdapSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapSettings")
            .field("server_url", &self.server_url)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"<redacted>")
            .field("base_dn", &self.base_dn)
            .field("user_search_filter", &self.user_search_filter)
            .field("attributes", &self.attributes)
            .finish()
    }
}

fn default_true() -> bool {
    true
}
fn default_scope() -> String {
    DEFAULT_OAUTH_SCOPE.to_string()
}
fn default_name_id_format() -> String {
    DEFAULT_NAME_ID_FORMAT.to_string()
}
fn default_user_filter() -> String {
    DEFAULT_LDAP_USER_FILTER.to_string()
}
fn default_uid_attr() -> String {
    "uid".to_string()
}
fn default_mail_attr() -> String {
    "mail".to_string()
}
fn default_given_name_attr() -> String {
    "givenName".to_string()
}
fn default_sn_attr() -> String {
    "sn".to_string()
}
fn default_member_of_attr() -> String {
    "memberOf".to_string()
}

// ─── Configuration Record ────────────────────────────────────────

/// A persisted, tenant-scoped identity provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoConfiguration {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub provider_type: ProviderType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saml: Option<SamlSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ldap: Option<LdapSettings>,
    /// Internal field name → provider attribute/claim name.
    #[serde(default)]
    pub attribute_mapping: MappingTable,
    /// Provider claim/flag/group → internal role.
    #[serde(default)]
    pub role_mapping: MappingTable,
    /// Provider claim/flag/group → internal group.
    #[serde(default)]
    pub group_mapping: MappingTable,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl SsoConfiguration {
    /// Check that the block required by `provider_type` is present and complete.
    pub fn validate(&self) -> Result<()> {
        require("tenantId", &self.tenant_id)?;
        require("name", &self.name)?;

        match &self.provider_type {
            ProviderType::OAuth => validate_oauth(self.oauth_settings()?),
            ProviderType::Saml => validate_saml(self.saml_settings()?),
            ProviderType::Ldap => validate_ldap(self.ldap_settings()?),
            ProviderType::Other(other) => Err(SsoError::UnsupportedProvider(other.clone())),
        }
    }

    pub fn oauth_settings(&self) -> Result<&OAuthSettings> {
        self.oauth
            .as_ref()
            .ok_or_else(|| SsoError::InvalidConfiguration("oauth settings are required".into()))
    }

    pub fn saml_settings(&self) -> Result<&SamlSettings> {
        self.saml
            .as_ref()
            .ok_or_else(|| SsoError::InvalidConfiguration("saml settings are required".into()))
    }

    pub fn ldap_settings(&self) -> Result<&LdapSettings> {
        self.ldap
            .as_ref()
            .ok_or_else(|| SsoError::InvalidConfiguration("ldap settings are required".into()))
    }

    /// Apply a JSON merge patch (RFC 7386), then validate the merged record.
    ///
    /// `id`, `tenantId`, `createdAt` and `createdBy` are never changed;
    /// `updatedAt` is set to `now`.
    pub fn merged(&self, patch: &serde_json::Value, now: DateTime<Utc>) -> Result<Self> {
        let patch_obj = patch.as_object().ok_or_else(|| {
            SsoError::InvalidConfiguration("configuration patch must be a JSON object".into())
        })?;

        let mut filtered = patch_obj.clone();
        for field in IMMUTABLE_FIELDS {
            filtered.remove(*field);
        }

        let mut merged = serde_json::to_value(self)?;
        apply_merge_patch(&mut merged, &serde_json::Value::Object(filtered));

        let mut updated: SsoConfiguration = serde_json::from_value(merged)
            .map_err(|e| SsoError::InvalidConfiguration(format!("invalid patch: {e}")))?;
        updated.updated_at = now;
        updated.validate()?;
        Ok(updated)
    }
}

/// Input for creating a configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConfiguration {
    pub tenant_id: String,
    pub name: String,
    pub provider_type: ProviderType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub oauth: Option<OAuthSettings>,
    #[serde(default)]
    pub saml: Option<SamlSettings>,
    #[serde(default)]
    pub ldap: Option<LdapSettings>,
    #[serde(default)]
    pub attribute_mapping: MappingTable,
    #[serde(default)]
    pub role_mapping: MappingTable,
    #[serde(default)]
    pub group_mapping: MappingTable,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl NewConfiguration {
    fn base(tenant_id: &str, name: &str, provider_type: ProviderType) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            provider_type,
            enabled: true,
            oauth: None,
            saml: None,
            ldap: None,
            attribute_mapping: MappingTable::new(),
            role_mapping: MappingTable::new(),
            group_mapping: MappingTable::new(),
            created_by: None,
        }
    }

    pub fn oauth(tenant_id: &str, name: &str, settings: OAuthSettings) -> Self {
        Self {
            oauth: Some(settings),
            ..Self::base(tenant_id, name, ProviderType::OAuth)
        }
    }

    pub fn saml(tenant_id: &str, name: &str, settings: SamlSettings) -> Self {
        Self {
            saml: Some(settings),
            ..Self::base(tenant_id, name, ProviderType::Saml)
        }
    }

    pub fn ldap(tenant_id: &str, name: &str, settings: LdapSettings) -> Self {
        Self {
            ldap: Some(settings),
            ..Self::base(tenant_id, name, ProviderType::Ldap)
        }
    }

    pub fn with_role_mapping(mut self, from: &str, to: &str) -> Self {
        self.role_mapping.insert(from.to_string(), to.to_string());
        self
    }

    pub fn with_group_mapping(mut self, from: &str, to: &str) -> Self {
        self.group_mapping.insert(from.to_string(), to.to_string());
        self
    }

    pub fn with_attribute_mapping(mut self, field: &str, attribute: &str) -> Self {
        self.attribute_mapping
            .insert(field.to_string(), attribute.to_string());
        self
    }

    pub fn created_by(mut self, who: &str) -> Self {
        self.created_by = Some(who.to_string());
        self
    }

    /// Build the record. Does not validate; callers validate before persisting.
    pub fn into_configuration(self, id: String, now: DateTime<Utc>) -> SsoConfiguration {
        SsoConfiguration {
            id,
            tenant_id: self.tenant_id,
            name: self.name,
            provider_type: self.provider_type,
            enabled: self.enabled,
            oauth: self.oauth,
            saml: self.saml,
            ldap: self.ldap,
            attribute_mapping: self.attribute_mapping,
            role_mapping: self.role_mapping,
            group_mapping: self.group_mapping,
            created_at: now,
            updated_at: now,
            created_by: self.created_by,
        }
    }
}

// ─── Validation ──────────────────────────────────────────────────

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SsoError::InvalidConfiguration(format!("{field} is required")));
    }
    Ok(())
}

fn require_url(field: &str, value: &str) -> Result<()> {
    require(field, value)?;
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| SsoError::InvalidConfiguration(format!("{field} is not a valid URL: {e}")))
}

fn validate_oauth(s: &OAuthSettings) -> Result<()> {
    require("oauth.clientId", &s.client_id)?;
    require("oauth.clientSecret", &s.client_secret)?;
    require_url("oauth.authorizeUrl", &s.authorize_url)?;
    require_url("oauth.tokenUrl", &s.token_url)?;
    require_url("oauth.userinfoUrl", &s.userinfo_url)?;
    require("oauth.scope", &s.scope)?;
    require_url("oauth.redirectUri", &s.redirect_uri)
}

fn validate_saml(s: &SamlSettings) -> Result<()> {
    require("saml.entityId", &s.entity_id)?;
    require_url("saml.ssoUrl", &s.sso_url)?;
    require("saml.certificate", &s.certificate)?;
    require_url("saml.acsUrl", &s.acs_url)?;
    require("saml.nameIdFormat", &s.name_id_format)
}

fn validate_ldap(s: &LdapSettings) -> Result<()> {
    require("ldap.serverUrl", &s.server_url)?;
    if !(s.server_url.starts_with("ldap://") || s.server_url.starts_with("ldaps://")) {
        return Err(SsoError::InvalidConfiguration(
            "ldap.serverUrl must use ldap:// or ldaps://".into(),
        ));
    }
    require("ldap.bindDn", &s.bind_dn)?;
    require("ldap.bindPassword", &s.bind_password)?;
    require("ldap.baseDn", &s.base_dn)?;
    require("ldap.userSearchFilter", &s.user_search_filter)?;
    if !s.user_search_filter.contains(USERNAME_PLACEHOLDER) {
        return Err(SsoError::InvalidConfiguration(format!(
            "ldap.userSearchFilter must contain {USERNAME_PLACEHOLDER}"
        )));
    }
    require("ldap.attributes.username", &s.attributes.username)?;
    require("ldap.attributes.email", &s.attributes.email)
}
