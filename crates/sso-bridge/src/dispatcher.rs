// Provider dispatch: one concrete provider per configuration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use sso_bridge_core::audit::AuditSink;
use sso_bridge_core::clock::Clock;
use sso_bridge_core::config::{ProviderType, SsoConfiguration};
use sso_bridge_core::error::{Result, SsoError};
use sso_bridge_core::provider::SsoProvider;
use sso_bridge_core::types::{CallbackParams, Credentials, ProviderUserInfo, SsoSession, TokenSet};
use sso_bridge_ldap::{Directory, LdapProvider};
use sso_bridge_oauth2::OAuthProvider;
use sso_bridge_saml::SamlProvider;

/// The closed set of supported protocols.
#[derive(Debug, Clone)]
pub enum Provider {
    OAuth(OAuthProvider),
    Saml(SamlProvider),
    Ldap(LdapProvider),
}

impl Provider {
    fn inner(&self) -> &dyn SsoProvider {
        match self {
            Self::OAuth(p) => p,
            Self::Saml(p) => p,
            Self::Ldap(p) => p,
        }
    }

    pub fn config(&self) -> &SsoConfiguration {
        match self {
            Self::OAuth(p) => p.config(),
            Self::Saml(p) => p.config(),
            Self::Ldap(p) => p.config(),
        }
    }

    /// Service-provider metadata XML. Only SAML publishes any.
    pub fn sp_metadata(&self) -> Result<String> {
        match self {
            Self::Saml(p) => Ok(p.sp_metadata()),
            Self::OAuth(_) => Err(SsoError::unsupported("OAuth", "service-provider metadata")),
            Self::Ldap(_) => Err(SsoError::unsupported("LDAP", "service-provider metadata")),
        }
    }
}

#[async_trait]
impl SsoProvider for Provider {
    fn provider_type(&self) -> ProviderType {
        self.inner().provider_type()
    }

    fn get_auth_url(&self, state: &str) -> Result<String> {
        self.inner().get_auth_url(state)
    }

    async fn handle_callback(&self, params: &CallbackParams) -> Result<ProviderUserInfo> {
        self.inner().handle_callback(params).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet> {
        self.inner().refresh_token(refresh_token).await
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<ProviderUserInfo> {
        self.inner().authenticate(credentials).await
    }

    async fn logout(&self, session: &SsoSession) -> Result<()> {
        self.inner().logout(session).await
    }
}

/// Builds providers from configurations, sharing one HTTP client, clock and
/// audit sink between them.
#[derive(Debug, Clone)]
pub struct ProviderDispatcher {
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    sp_entity_id: Option<String>,
    request_timeout: Duration,
    directory: Option<Arc<dyn Directory>>,
}

impl ProviderDispatcher {
    pub fn new(
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        sp_entity_id: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: sso_bridge_oauth2::build_http_client(request_timeout)?,
            clock,
            audit,
            sp_entity_id,
            request_timeout,
            directory: None,
        })
    }

    /// Route every LDAP configuration through `directory` instead of a live
    /// `ldap3` connection.
    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// The provider for `config.provider_type`. Unknown types are rejected
    /// with `UnsupportedProvider`.
    pub fn get_provider(&self, config: &SsoConfiguration) -> Result<Provider> {
        let config = config.clone();
        let provider = match config.provider_type.clone() {
            ProviderType::OAuth => {
                Provider::OAuth(OAuthProvider::new(
                config,
                self.http.clone(),
                self.clock.clone(),
                self.audit.clone(),
            )?)
            }
            ProviderType::Saml => Provider::Saml(SamlProvider::new(
                config,
                self.sp_entity_id.as_deref(),
                self.clock.clone(),
                self.audit.clone(),
            )?),
            ProviderType::Ldap => Provider::Ldap(match &self.directory {
                Some(directory) => LdapProvider::new(
                    config,
                    directory.clone(),
                    self.request_timeout,
                    self.audit.clone(),
                )?,
                None => LdapProvider::with_timeout(config, self.request_timeout, self.audit.clone())?,
            }),
            ProviderType::Other(other) => return Err(SsoError::UnsupportedProvider(other)),
        };
        Ok(provider)
    }
}
