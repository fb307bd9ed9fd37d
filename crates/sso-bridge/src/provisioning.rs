// Just-in-time user provisioning.
//
// Resolution order for a `ProviderUserInfo`:
//   1. an existing link in `sso_user_identities` for (configId, providerUserId)
//   2. an existing account with the same email
//   3. an admin-level account creation
// Concurrent first logins race on the identity store's unique email and on
// the link table's unique key; the loser of either race re-reads.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info};

use sso_bridge_core::audit::{AuditAction, AuditEvent, AuditSink};
use sso_bridge_core::clock::Clock;
use sso_bridge_core::config::SsoConfiguration;
use sso_bridge_core::db::adapter::{Adapter, WhereClause};
use sso_bridge_core::db::schema::USER_IDENTITIES_TABLE;
use sso_bridge_core::error::{Result, SsoError};
use sso_bridge_core::identity::{IdentityStore, IdentityUser, NewUserProfile};
use sso_bridge_core::types::ProviderUserInfo;
use sso_bridge_core::utils::{generate_id, with_timeout};

/// Result of provisioning: the internal account and whether this call
/// created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedUser {
    pub user: IdentityUser,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct Provisioner {
    adapter: Arc<dyn Adapter>,
    identity: Arc<dyn IdentityStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl Provisioner {
    pub fn new(
        adapter: Arc<dyn Adapter>,
        identity: Arc<dyn IdentityStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            adapter,
            identity,
            audit,
            clock,
            timeout,
        }
    }

    /// Resolve `info` to an internal account, creating one if needed.
    /// Safe to re-run: an existing account is a normal outcome.
    pub async fn provision(
        &self,
        config: &SsoConfiguration,
        info: &ProviderUserInfo,
    ) -> Result<ProvisionedUser> {
        if let Some(user) = self.linked_user(config, info).await? {
            return Ok(ProvisionedUser {
                user,
                created: false,
            });
        }

        let email = info
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                SsoError::ProviderRejected(format!(
                    "no email address for provider user {}",
                    info.id
                ))
            })?;

        let provisioned = match self.find_by_email(email).await? {
            Some(user) => ProvisionedUser {
                user,
                created: false,
            },
            None => self.create(config, info, email).await?,
        };

        self.link(config, info, &provisioned.user).await?;
        Ok(provisioned)
    }

    async fn linked_user(
        &self,
        config: &SsoConfiguration,
        info: &ProviderUserInfo,
    ) -> Result<Option<IdentityUser>> {
        let clauses = [
            WhereClause::eq("configId", config.id.as_str()),
            WhereClause::eq("providerUserId", info.id.as_str()),
        ];
        let link = with_timeout(
            self.timeout,
            "identity link lookup",
            self.adapter.find_one(USER_IDENTITIES_TABLE, &clauses),
        )
        .await?;
        let Some(user_id) = link
            .as_ref()
            .and_then(|row| row.get("userId"))
            .and_then(|v| v.as_str())
        else {
            return Ok(None);
        };

        let user = with_timeout(
            self.timeout,
            "user lookup",
            self.identity.find_user_by_id(user_id),
        )
        .await?;
        if user.is_none() {
            // The account was removed on the host side; drop the stale link.
            debug!(config_id = %config.id, user_id, "removing stale identity link");
            with_timeout(
                self.timeout,
                "identity link delete",
                self.adapter.delete(USER_IDENTITIES_TABLE, &clauses),
            )
            .await?;
        }
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityUser>> {
        with_timeout(
            self.timeout,
            "user lookup",
            self.identity.find_user_by_email(email),
        )
        .await
    }

    async fn create(
        &self,
        config: &SsoConfiguration,
        info: &ProviderUserInfo,
        email: &str,
    ) -> Result<ProvisionedUser> {
        let profile = NewUserProfile {
            email: email.to_string(),
            name: info.display_name(),
            first_name: info.first_name.clone(),
            last_name: info.last_name.clone(),
            roles: info.roles.clone(),
            groups: info.groups.clone(),
            email_verified: true,
        };

        match with_timeout(self.timeout, "user create", self.identity.create_user(profile)).await {
            Ok(user) => {
                info!(config_id = %config.id, user_id = %user.id, "provisioned sso user");
                self.audit
                    .record(
                        AuditEvent::success(AuditAction::Provision)
                            .tenant(&config.tenant_id)
                            .config(&config.id)
                            .user(&user.id)
                            .details(json!({ "providerUserId": info.id })),
                    )
                    .await;
                Ok(ProvisionedUser {
                    user,
                    created: true,
                })
            }
            Err(SsoError::Conflict(reason)) => {
                debug!(config_id = %config.id, %reason, "lost user creation race, re-reading");
                let user = self
                    .find_by_email(email)
                    .await?
                    .ok_or(SsoError::Conflict(reason))?;
                Ok(ProvisionedUser {
                    user,
                    created: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn link(
        &self,
        config: &SsoConfiguration,
        info: &ProviderUserInfo,
        user: &IdentityUser,
    ) -> Result<()> {
        let row = json!({
            "id": generate_id(),
            "configId": config.id,
            "providerUserId": info.id,
            "userId": user.id,
            "email": user.email,
            "createdAt": self.clock.now().timestamp_millis(),
        });
        match with_timeout(
            self.timeout,
            "identity link create",
            self.adapter.create(USER_IDENTITIES_TABLE, row),
        )
        .await
        {
            Ok(_) | Err(SsoError::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
