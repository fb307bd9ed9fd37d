// LDAP provider: direct credential authentication against a directory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use sso_bridge_core::audit::{AuditAction, AuditEvent, AuditSink};
use sso_bridge_core::config::{LdapSettings, ProviderType, SsoConfiguration};
use sso_bridge_core::error::{Result, SsoError};
use sso_bridge_core::mapping::{self, MEMBERSHIP_CLAIMS};
use sso_bridge_core::provider::SsoProvider;
use sso_bridge_core::types::{CallbackParams, Credentials, ProviderUserInfo, SsoSession, TokenSet};
use sso_bridge_core::utils::with_timeout;

use crate::directory::{Directory, DirectoryEntry, Ldap3Directory};
use crate::filter::build_user_filter;

/// Username/password authentication for one configured directory.
#[derive(Debug, Clone)]
pub struct LdapProvider {
    config: SsoConfiguration,
    settings: LdapSettings,
    directory: Arc<dyn Directory>,
    timeout: Duration,
    audit: Arc<dyn AuditSink>,
}

impl LdapProvider {
    /// Bind to `config` using `directory` for server access. `timeout` bounds
    /// each directory operation.
    pub fn new(
        config: SsoConfiguration,
        directory: Arc<dyn Directory>,
        timeout: Duration,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let settings = config.ldap_settings()?.clone();
        Ok(Self {
            config,
            settings,
            directory,
            timeout,
            audit,
        })
    }

    /// Bind to `config` against the live server named in its settings.
    pub fn with_timeout(
        config: SsoConfiguration,
        timeout: Duration,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        Self::new(config, Arc::new(Ldap3Directory::new(timeout)), timeout, audit)
    }

    pub fn config(&self) -> &SsoConfiguration {
        &self.config
    }

    async fn lookup(&self, username: &str) -> Result<Option<DirectoryEntry>> {
        let filter = build_user_filter(&self.settings.user_search_filter, username);
        let attrs = self.settings.attributes.all();
        with_timeout(
            self.timeout,
            "LDAP user search",
            self.directory.find_user(&self.settings, &filter, &attrs),
        )
        .await
    }

    async fn check_password(&self, dn: &str, password: &str) -> Result<bool> {
        with_timeout(
            self.timeout,
            "LDAP user bind",
            self.directory.verify_password(&self.settings, dn, password),
        )
        .await
    }

    fn user_info(&self, username: &str, entry: DirectoryEntry) -> ProviderUserInfo {
        let names = &self.settings.attributes;

        let mut claims: HashMap<String, Value> = entry
            .attrs
            .iter()
            .map(|(name, values)| {
                let value = match values.as_slice() {
                    [single] => Value::String(single.clone()),
                    _ => Value::from(values.clone()),
                };
                (name.clone(), value)
            })
            .collect();
        if !MEMBERSHIP_CLAIMS.contains(&names.groups.as_str()) {
            if let Some(groups) = entry.values(&names.groups) {
                claims.insert("groups".into(), Value::from(groups.clone()));
            }
        }
        claims.insert("dn".into(), Value::String(entry.dn.clone()));

        let lookup = |field: &str, attr: &str| {
            mapping::resolve_attribute(&claims, &self.config.attribute_mapping, field, &[attr])
                .or_else(|| entry.first(attr).map(str::to_string))
        };

        ProviderUserInfo {
            id: username.to_string(),
            username: Some(username.to_string()),
            email: lookup("email", &names.email),
            first_name: lookup("firstName", &names.first_name),
            last_name: lookup("lastName", &names.last_name),
            roles: mapping::map_roles(&claims, &self.config.role_mapping),
            groups: mapping::map_groups(&claims, &self.config.group_mapping),
            attributes: claims,
            tokens: None,
        }
    }
}

#[async_trait]
impl SsoProvider for LdapProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Ldap
    }

    fn get_auth_url(&self, _state: &str) -> Result<String> {
        Err(SsoError::unsupported("LDAP", "redirect-based authentication"))
    }

    async fn handle_callback(&self, _params: &CallbackParams) -> Result<ProviderUserInfo> {
        Err(SsoError::unsupported("LDAP", "callback-based authentication"))
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenSet> {
        Err(SsoError::unsupported("LDAP", "token refresh"))
    }

    /// Every failure collapses into `AuthenticationFailed`; the cause is only
    /// logged.
    async fn authenticate(&self, credentials: &Credentials) -> Result<ProviderUserInfo> {
        let username = credentials.username.trim();
        // An empty password would be an unauthenticated bind, which most
        // servers accept.
        if username.is_empty() || credentials.password.is_empty() {
            debug!(config_id = %self.config.id, "empty LDAP credentials");
            return Err(SsoError::AuthenticationFailed);
        }

        let entry = match self.lookup(username).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(config_id = %self.config.id, "LDAP user not found");
                return Err(SsoError::AuthenticationFailed);
            }
            Err(e) => {
                warn!(config_id = %self.config.id, error = %e, "LDAP user search failed");
                return Err(SsoError::AuthenticationFailed);
            }
        };

        match self.check_password(&entry.dn, &credentials.password).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(config_id = %self.config.id, "LDAP user bind rejected");
                return Err(SsoError::AuthenticationFailed);
            }
            Err(e) => {
                warn!(config_id = %self.config.id, error = %e, "LDAP user bind failed");
                return Err(SsoError::AuthenticationFailed);
            }
        }

        debug!(config_id = %self.config.id, dn = %entry.dn, "LDAP authentication succeeded");
        Ok(self.user_info(username, entry))
    }

    async fn logout(&self, session: &SsoSession) -> Result<()> {
        info!(config_id = %self.config.id, session_id = %session.id, "ldap logout");
        self.audit
            .record(
                AuditEvent::success(AuditAction::Logout)
                    .tenant(&self.config.tenant_id)
                    .config(&self.config.id)
                    .user(&session.user_id)
                    .details(json!({ "sessionId": session.id, "provider": "ldap" })),
            )
            .await;
        Ok(())
    }
}
