// OAuth2 / OIDC provider implementing the common SSO capability set.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use sso_bridge_core::audit::{AuditAction, AuditEvent, AuditSink};
use sso_bridge_core::clock::Clock;
use sso_bridge_core::config::{OAuthSettings, ProviderType, SsoConfiguration};
use sso_bridge_core::error::{Result, SsoError};
use sso_bridge_core::provider::SsoProvider;
use sso_bridge_core::types::{CallbackParams, Credentials, ProviderUserInfo, SsoSession, TokenSet};

use crate::authorization_url::create_authorization_url;
use crate::code_exchange::exchange_authorization_code;
use crate::refresh::refresh_access_token;
use crate::userinfo::{fetch_user_info, normalize_claims};

/// Authorization-code flow against one configured identity provider.
#[derive(Debug, Clone)]
pub struct OAuthProvider {
    config: SsoConfiguration,
    settings: OAuthSettings,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl OAuthProvider {
    /// Bind to `config`, sharing an existing HTTP client. Token expiry is
    /// stamped from `clock`.
    pub fn new(
        config: SsoConfiguration,
        client: reqwest::Client,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let settings = config.oauth_settings()?.clone();
        Ok(Self {
            config,
            settings,
            client,
            clock,
            audit,
        })
    }

    /// Bind to `config` with a dedicated client using `timeout` for every request.
    pub fn with_timeout(
        config: SsoConfiguration,
        timeout: Duration,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        Self::new(config, build_http_client(timeout)?, clock, audit)
    }

    pub fn config(&self) -> &SsoConfiguration {
        &self.config
    }

    /// Code exchange only, returning the raw token set.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        exchange_authorization_code(&self.client, &self.settings, code, self.clock.now()).await
    }
}

/// HTTP client shared by OAuth providers.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SsoError::Internal(format!("failed to build HTTP client: {e}")))
}

#[async_trait]
impl SsoProvider for OAuthProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OAuth
    }

    fn get_auth_url(&self, state: &str) -> Result<String> {
        Ok(create_authorization_url(&self.settings, state))
    }

    async fn handle_callback(&self, params: &CallbackParams) -> Result<ProviderUserInfo> {
        if let Some(error) = params.get("error") {
            let description = params.get("error_description").unwrap_or_default();
            return Err(SsoError::ProviderRejected(
                format!("{error} {description}").trim().to_string(),
            ));
        }
        let code = params
            .get("code")
            .ok_or(SsoError::MissingAuthorizationCode)?;

        let tokens = self.exchange_code(code).await?;
        let claims = fetch_user_info(&self.client, &self.settings, &tokens.access_token).await?;
        let mut info = normalize_claims(claims, &self.config)?;
        info.tokens = Some(tokens);

        debug!(config_id = %self.config.id, provider_user_id = %info.id, "oauth callback resolved");
        Ok(info)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet> {
        refresh_access_token(&self.client, &self.settings, refresh_token, self.clock.now()).await
    }

    async fn authenticate(&self, _credentials: &Credentials) -> Result<ProviderUserInfo> {
        Err(SsoError::unsupported("OAuth", "direct credential authentication"))
    }

    async fn logout(&self, session: &SsoSession) -> Result<()> {
        info!(config_id = %self.config.id, session_id = %session.id, "oauth logout");
        self.audit
            .record(
                AuditEvent::success(AuditAction::Logout)
                    .tenant(&self.config.tenant_id)
                    .config(&self.config.id)
                    .user(&session.user_id)
                    .details(json!({ "sessionId": session.id, "provider": "oauth" })),
            )
            .await;
        Ok(())
    }
}
