// SsoManager: the façade host handlers call.
//
// Owns configuration lifecycle, provider dispatch, the login pipeline
// (provider exchange -> provisioning -> session -> audit), session
// maintenance and audit queries. Every state change appends one audit entry
// after the change itself has been written; audit failures are swallowed by
// `AuditLogger`.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use sso_bridge_core::audit::{AuditAction, AuditEvent, AuditLogEntry, AuditLogFilter, AuditSink};
use sso_bridge_core::clock::Clock;
use sso_bridge_core::config::{NewConfiguration, SsoConfiguration};
use sso_bridge_core::db::adapter::{Adapter, FindManyQuery, SortDirection, WhereClause};
use sso_bridge_core::db::schema::CONFIGURATIONS_TABLE;
use sso_bridge_core::error::{Result, SsoError};
use sso_bridge_core::identity::{IdentityStore, IdentityUser};
use sso_bridge_core::options::SsoOptions;
use sso_bridge_core::provider::SsoProvider;
use sso_bridge_core::types::{CallbackParams, Credentials, ProviderUserInfo, SsoSession};
use sso_bridge_core::utils::{generate_id, with_timeout};
use sso_bridge_ldap::Directory;

use crate::audit::AuditLogger;
use crate::dispatcher::{Provider, ProviderDispatcher};
use crate::provisioning::Provisioner;
use crate::rows;
use crate::session::{self, SessionManager};

/// What a completed login hands back to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginOutcome {
    pub user: IdentityUser,
    pub session: SsoSession,
    /// Whether provisioning created the account during this login.
    pub created_user: bool,
    /// One-time sign-in link, when `issue_login_links` is enabled.
    pub login_link: Option<String>,
}

/// Multi-tenant SSO service over one datastore and one identity store.
#[derive(Debug, Clone)]
pub struct SsoManager {
    adapter: Arc<dyn Adapter>,
    identity: Arc<dyn IdentityStore>,
    clock: Arc<dyn Clock>,
    options: SsoOptions,
    audit: Arc<AuditLogger>,
    dispatcher: ProviderDispatcher,
    sessions: SessionManager,
    provisioner: Provisioner,
}

impl SsoManager {
    pub fn new(
        adapter: Arc<dyn Adapter>,
        identity: Arc<dyn IdentityStore>,
        clock: Arc<dyn Clock>,
        options: SsoOptions,
    ) -> Result<Self> {
        let timeout = options.persistence_timeout();
        let audit = Arc::new(AuditLogger::new(adapter.clone(), clock.clone(), timeout));
        let sink: Arc<dyn AuditSink> = audit.clone();

        let dispatcher = ProviderDispatcher::new(
            clock.clone(),
            sink.clone(),
            options.sp_entity_id.clone(),
            options.request_timeout(),
        )?;
        let sessions = SessionManager::new(adapter.clone(), clock.clone(), options.session_ttl, timeout);
        let provisioner = Provisioner::new(
            adapter.clone(),
            identity.clone(),
            sink,
            clock.clone(),
            timeout,
        );

        Ok(Self {
            adapter,
            identity,
            clock,
            options,
            audit,
            dispatcher,
            sessions,
            provisioner,
        })
    }

    /// Serve LDAP configurations from `directory` instead of live `ldap3`
    /// connections.
    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.dispatcher = self.dispatcher.with_directory(directory);
        self
    }

    pub fn options(&self) -> &SsoOptions {
        &self.options
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    async fn record(&self, event: AuditEvent) {
        self.audit.record(event).await;
    }

    // ─── Configurations ──────────────────────────────────────────

    /// Configurations of `tenant_id`, oldest first.
    pub async fn list_configurations(&self, tenant_id: &str) -> Result<Vec<SsoConfiguration>> {
        let query = FindManyQuery::filter(vec![WhereClause::eq("tenantId", tenant_id)])
            .sort("createdAt", SortDirection::Asc);
        let rows = self.persist("configuration list", self.adapter.find_many(CONFIGURATIONS_TABLE, query)).await?;
        rows::decode_all(CONFIGURATIONS_TABLE, rows)
    }

    /// The configuration with `id`, or `None`.
    pub async fn get_configuration(&self, id: &str) -> Result<Option<SsoConfiguration>> {
        let row = self
            .persist(
                "configuration lookup",
                self.adapter
                    .find_one(CONFIGURATIONS_TABLE, &[WhereClause::eq("id", id)]),
            )
            .await?;
        row.map(|r| rows::decode(CONFIGURATIONS_TABLE, r)).transpose()
    }

    /// Validate and store a new configuration.
    ///
    /// Empty OAuth redirect URIs and SAML ACS URLs are filled from the
    /// options first. The protocol provider is built once as part of
    /// validation, so an unparseable SAML certificate is rejected here.
    pub async fn create_configuration(&self, input: NewConfiguration) -> Result<SsoConfiguration> {
        let tenant_id = input.tenant_id.clone();
        let result = self.try_create_configuration(input).await;

        let event = match &result {
            Ok(config) => AuditEvent::success(AuditAction::Configuration)
                .config(&config.id)
                .details(json!({ "operation": "create", "providerType": config.provider_type })),
            Err(e) => AuditEvent::failure(AuditAction::Configuration, e)
                .details(json!({ "operation": "create" })),
        };
        self.record(event.tenant(tenant_id)).await;
        result
    }

    async fn try_create_configuration(&self, mut input: NewConfiguration) -> Result<SsoConfiguration> {
        if let Some(oauth) = input.oauth.as_mut() {
            if oauth.redirect_uri.trim().is_empty() {
                if let Some(uri) = &self.options.default_oauth_redirect_uri {
                    oauth.redirect_uri = uri.clone();
                }
            }
        }
        if let Some(saml) = input.saml.as_mut() {
            if saml.acs_url.trim().is_empty() {
                if let Some(url) = &self.options.default_saml_acs_url {
                    saml.acs_url = url.clone();
                }
            }
        }

        let config = input.into_configuration(generate_id(), self.clock.now());
        config.validate()?;
        self.dispatcher.get_provider(&config)?;

        let row = self
            .persist(
                "configuration create",
                self.adapter
                    .create(CONFIGURATIONS_TABLE, serde_json::to_value(&config)?),
            )
            .await?;
        let stored: SsoConfiguration = rows::decode(CONFIGURATIONS_TABLE, row)?;
        info!(config_id = %stored.id, tenant_id = %stored.tenant_id, provider_type = %stored.provider_type, "sso configuration created");
        Ok(stored)
    }

    /// Merge `patch` (RFC 7386) into the stored record, validate the result,
    /// then persist it.
    pub async fn update_configuration(&self, id: &str, patch: &Value) -> Result<SsoConfiguration> {
        let result = self.try_update_configuration(id, patch).await;

        let event = match &result {
            Ok(config) => AuditEvent::success(AuditAction::Configuration)
                .tenant(&config.tenant_id)
                .details(json!({ "operation": "update" })),
            Err(e) => AuditEvent::failure(AuditAction::Configuration, e)
                .details(json!({ "operation": "update" })),
        };
        self.record(event.config(id)).await;
        result
    }

    async fn try_update_configuration(&self, id: &str, patch: &Value) -> Result<SsoConfiguration> {
        let existing = self
            .get_configuration(id)
            .await?
            .ok_or_else(|| SsoError::ConfigurationNotFound(id.to_string()))?;
        let merged = existing.merged(patch, self.clock.now())?;
        self.dispatcher.get_provider(&merged)?;

        let row = self
            .persist(
                "configuration update",
                self.adapter.update(
                    CONFIGURATIONS_TABLE,
                    &[WhereClause::eq("id", id)],
                    full_row(&merged)?,
                ),
            )
            .await?
            .ok_or_else(|| SsoError::ConfigurationNotFound(id.to_string()))?;
        debug!(config_id = id, "sso configuration updated");
        rows::decode(CONFIGURATIONS_TABLE, row)
    }

    /// Delete a configuration and every session issued through it.
    /// Returns `false` when there was nothing to delete.
    pub async fn delete_configuration(&self, id: &str) -> Result<bool> {
        let Some(config) = self.get_configuration(id).await? else {
            return Ok(false);
        };

        let result = async {
            let sessions = self.sessions.delete_for_config(id).await?;
            let deleted = self
                .persist(
                    "configuration delete",
                    self.adapter
                        .delete(CONFIGURATIONS_TABLE, &[WhereClause::eq("id", id)]),
                )
                .await?;
            Ok::<_, SsoError>((deleted, sessions))
        }
        .await;

        let event = match &result {
            Ok((_, sessions)) => AuditEvent::success(AuditAction::Configuration)
                .details(json!({ "operation": "delete", "sessionsRemoved": sessions })),
            Err(e) => AuditEvent::failure(AuditAction::Configuration, e)
                .details(json!({ "operation": "delete" })),
        };
        self.record(event.tenant(&config.tenant_id).config(id)).await;

        let (deleted, sessions) = result?;
        info!(config_id = id, sessions_removed = sessions, "sso configuration deleted");
        Ok(deleted)
    }

    /// The provider for `config`; `UnsupportedProvider` for unknown types.
    pub fn get_provider(&self, config: &SsoConfiguration) -> Result<Provider> {
        self.dispatcher.get_provider(config)
    }

    /// SP metadata XML for a SAML configuration.
    pub async fn sp_metadata(&self, config_id: &str) -> Result<String> {
        let config = self
            .get_configuration(config_id)
            .await?
            .ok_or_else(|| SsoError::ConfigurationNotFound(config_id.to_string()))?;
        self.get_provider(&config)?.sp_metadata()
    }

    // ─── Login ───────────────────────────────────────────────────

    /// Redirect URL that starts a browser login, carrying `state`.
    pub async fn begin_login(&self, config_id: &str, state: &str) -> Result<String> {
        let (config, provider) = self.usable_provider(config_id).await?;
        provider.get_auth_url(state).map_err(|e| {
            warn!(config_id = %config.id, error = %e, "could not build sso redirect");
            e
        })
    }

    /// Finish a redirect-based login from the callback parameters the host
    /// received verbatim.
    pub async fn complete_callback(
        &self,
        config_id: &str,
        params: &CallbackParams,
    ) -> Result<LoginOutcome> {
        let (config, provider) = self.usable_provider(config_id).await?;
        let exchanged = provider.handle_callback(params).await;
        self.establish(&config, exchanged).await
    }

    /// Log in with directly submitted credentials (LDAP).
    pub async fn authenticate_credentials(
        &self,
        config_id: &str,
        credentials: &Credentials,
    ) -> Result<LoginOutcome> {
        let (config, provider) = self.usable_provider(config_id).await?;
        let exchanged = provider.authenticate(credentials).await;
        self.establish(&config, exchanged).await
    }

    /// Load `config_id` and build its provider. Missing, disabled and
    /// unbuildable configurations are audited as `error` and returned before
    /// any network call.
    async fn usable_provider(&self, config_id: &str) -> Result<(SsoConfiguration, Provider)> {
        let loaded = match self.get_configuration(config_id).await {
            Ok(Some(config)) if !config.enabled => Err(SsoError::ConfigurationDisabled(config_id.to_string())),
            Ok(Some(config)) => self.get_provider(&config).map(|p| (config, p)),
            Ok(None) => Err(SsoError::ConfigurationNotFound(config_id.to_string())),
            Err(e) => Err(e),
        };

        if let Err(e) = &loaded {
            warn!(config_id, error = %e, "sso configuration unusable");
            self.record(AuditEvent::failure(AuditAction::Error, e).config(config_id))
                .await;
        }
        loaded
    }

    /// Provisioning, session creation and the login audit entry, in that
    /// order, for the result of a provider exchange.
    async fn establish(
        &self,
        config: &SsoConfiguration,
        exchanged: Result<ProviderUserInfo>,
    ) -> Result<LoginOutcome> {
        let failure = |e: &SsoError, stage: &str| {
            AuditEvent::failure(AuditAction::Login, e)
                .tenant(&config.tenant_id)
                .config(&config.id)
                .details(json!({ "stage": stage, "code": e.code() }))
        };

        let info = match exchanged {
            Ok(info) => info,
            Err(e) => {
                warn!(config_id = %config.id, error = %e, "sso exchange failed");
                self.record(failure(&e, "exchange")).await;
                return Err(e);
            }
        };

        let provisioned = match self.provisioner.provision(config, &info).await {
            Ok(p) => p,
            Err(e) => {
                warn!(config_id = %config.id, error = %e, "sso provisioning failed");
                self.record(failure(&e, "provision")).await;
                return Err(e);
            }
        };

        let session = match self
            .sessions
            .create(&provisioned.user.id, &config.id, &config.provider_type, &info)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                warn!(config_id = %config.id, error = %e, "sso session create failed");
                self.record(failure(&e, "session").user(&provisioned.user.id)).await;
                return Err(e);
            }
        };

        let login_link = if self.options.issue_login_links {
            self.login_link(&provisioned.user.email).await
        } else {
            None
        };

        self.record(
            AuditEvent::success(AuditAction::Login)
                .tenant(&config.tenant_id)
                .config(&config.id)
                .user(&provisioned.user.id)
                .details(json!({
                    "sessionId": session.id,
                    "providerUserId": info.id,
                    "providerType": config.provider_type,
                    "createdUser": provisioned.created,
                })),
        )
        .await;
        info!(config_id = %config.id, user_id = %provisioned.user.id, "sso login completed");

        Ok(LoginOutcome {
            user: provisioned.user,
            session,
            created_user: provisioned.created,
            login_link,
        })
    }

    /// A login link is a convenience; failing to issue one does not fail
    /// the login.
    async fn login_link(&self, email: &str) -> Option<String> {
        match self
            .persist("login link", self.identity.issue_login_link(email))
            .await
        {
            Ok(link) => Some(link),
            Err(e) => {
                warn!(error = %e, "could not issue login link");
                None
            }
        }
    }

    // ─── Sessions ────────────────────────────────────────────────

    /// Persist a session for an already provisioned user, with the TTL of the
    /// configuration's protocol.
    pub async fn create_session(
        &self,
        user_id: &str,
        config_id: &str,
        info: &ProviderUserInfo,
    ) -> Result<SsoSession> {
        let config = self
            .get_configuration(config_id)
            .await?
            .ok_or_else(|| SsoError::ConfigurationNotFound(config_id.to_string()))?;
        let result = self
            .sessions
            .create(user_id, config_id, &config.provider_type, info)
            .await;

        let event = match &result {
            Ok(session) => AuditEvent::success(AuditAction::Login)
                .details(json!({ "sessionId": session.id, "providerUserId": info.id })),
            Err(e) => AuditEvent::failure(AuditAction::Login, e).details(json!({ "stage": "session" })),
        };
        self.record(event.tenant(&config.tenant_id).config(config_id).user(user_id))
            .await;
        result
    }

    /// Sessions of `user_id` whose expiry is still in the future.
    pub async fn get_user_sessions(&self, user_id: &str) -> Result<Vec<SsoSession>> {
        self.sessions.active_for_user(user_id).await
    }

    /// Extend an active session by its protocol TTL without contacting the
    /// provider.
    pub async fn touch_session(&self, session_id: &str) -> Result<SsoSession> {
        let session = self.active_session(session_id).await?;
        let config = self
            .get_configuration(&session.config_id)
            .await?
            .ok_or_else(|| SsoError::ConfigurationNotFound(session.config_id.clone()))?;
        self.sessions
            .extend(session_id, &config.provider_type, None)
            .await?
            .ok_or_else(|| SsoError::SessionNotFound(session_id.to_string()))
    }

    /// Refresh the tokens of an active session through its provider, then
    /// extend the session and store the new token set.
    pub async fn refresh_token(&self, session_id: &str, refresh_token: &str) -> Result<SsoSession> {
        let session = match self.active_session(session_id).await {
            Ok(s) => s,
            Err(e) => {
                self.record(
                    AuditEvent::failure(AuditAction::TokenRefresh, &e)
                        .details(json!({ "sessionId": session_id })),
                )
                .await;
                return Err(e);
            }
        };

        let result = async {
            let (config, provider) = self.usable_provider(&session.config_id).await?;
            let tokens = provider.refresh_token(refresh_token).await?;
            let data = session::with_tokens(&session.session_data, tokens);
            self.sessions
                .extend(session_id, &config.provider_type, Some(data))
                .await?
                .ok_or_else(|| SsoError::SessionNotFound(session_id.to_string()))
        }
        .await;

        let event = match &result {
            Ok(_) => AuditEvent::success(AuditAction::TokenRefresh),
            Err(e) => {
                warn!(session_id, error = %e, "sso token refresh failed");
                AuditEvent::failure(AuditAction::TokenRefresh, e)
            }
        };
        self.record(
            event
                .config(&session.config_id)
                .user(&session.user_id)
                .details(json!({ "sessionId": session_id })),
        )
        .await;
        result
    }

    /// End a session: provider-side logout (which audits `logout`), then
    /// delete the row. Unknown sessions are a no-op.
    pub async fn logout(&self, session_id: &str) -> Result<()> {
        let Some(session) = self.sessions.find(session_id).await? else {
            debug!(session_id, "logout for unknown session");
            return Ok(());
        };

        let provider = match self.get_configuration(&session.config_id).await {
            Ok(Some(config)) => self.get_provider(&config).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(session_id, error = %e, "configuration lookup failed during logout");
                None
            }
        };

        match provider {
            Some(provider) => {
                if let Err(e) = provider.logout(&session).await {
                    warn!(session_id, error = %e, "provider logout failed");
                }
            }
            None => {
                self.record(
                    AuditEvent::success(AuditAction::Logout)
                        .config(&session.config_id)
                        .user(&session.user_id)
                        .details(json!({ "sessionId": session_id })),
                )
                .await;
            }
        }

        self.sessions.delete(session_id).await?;
        Ok(())
    }

    async fn active_session(&self, session_id: &str) -> Result<SsoSession> {
        self.sessions
            .find_active(session_id)
            .await?
            .ok_or_else(|| SsoError::SessionNotFound(session_id.to_string()))
    }

    /// Delete every session whose expiry has passed. Returns the rows this
    /// call removed; concurrent sweeps never double-count.
    pub async fn cleanup_expired_sessions(&self) -> Result<i64> {
        match self.sessions.cleanup_expired().await {
            Ok(0) => Ok(0),
            Ok(removed) => {
                self.record(
                    AuditEvent::success(AuditAction::SessionCleanup)
                        .details(json!({ "removed": removed })),
                )
                .await;
                Ok(removed)
            }
            Err(e) => {
                self.record(AuditEvent::failure(AuditAction::SessionCleanup, &e))
                    .await;
                Err(e)
            }
        }
    }

    // ─── Audit ───────────────────────────────────────────────────

    /// Audit entries matching `filter`, newest first. The page size defaults
    /// to `audit_page_size` and is capped at `audit_max_page_size`.
    pub async fn get_audit_logs(&self, filter: &AuditLogFilter) -> Result<Vec<AuditLogEntry>> {
        self.audit
            .query(filter, self.options.audit_limit(filter.limit))
            .await
    }

    async fn persist<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        with_timeout(self.options.persistence_timeout(), operation, fut).await
    }
}

/// Serialized record with every optional column present, so that a shallow
/// row update also clears blocks the patch removed.
fn full_row(config: &SsoConfiguration) -> Result<Value> {
    let mut row = serde_json::to_value(config)?;
    if let Some(obj) = row.as_object_mut() {
        for key in ["oauth", "saml", "ldap", "createdBy"] {
            obj.entry(key).or_insert(Value::Null);
        }
    }
    Ok(row)
}
