// Session store: typed operations over the `sso_sessions` table.
//
// Creation is the single `create_sso_session` procedure call. Expiry is a
// plain predicate (`expiresAt > now`), so reads never depend on the sweep
// having run.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::debug;

use sso_bridge_core::clock::Clock;
use sso_bridge_core::config::ProviderType;
use sso_bridge_core::db::adapter::{Adapter, FindManyQuery, SortDirection, WhereClause};
use sso_bridge_core::db::schema::SESSIONS_TABLE;
use sso_bridge_core::error::Result;
use sso_bridge_core::options::SessionTtl;
use sso_bridge_core::types::{ProviderUserInfo, SsoSession, TokenSet};
use sso_bridge_core::utils::{generate_id, with_timeout};

use crate::rows;

#[derive(Debug, Clone)]
pub struct SessionManager {
    adapter: Arc<dyn Adapter>,
    clock: Arc<dyn Clock>,
    ttl: SessionTtl,
    timeout: Duration,
}

/// Opaque per-session data: the protocol, whatever the provider returned
/// that later calls need, and the token set for OAuth.
pub(crate) fn session_data(provider_type: &ProviderType, info: &ProviderUserInfo) -> Value {
    let mut data = Map::new();
    data.insert("providerType".into(), json!(provider_type));
    if let Some(username) = &info.username {
        data.insert("username".into(), json!(username));
    }
    if let Some(email) = &info.email {
        data.insert("email".into(), json!(email));
    }
    if let Some(tokens) = &info.tokens {
        data.insert("tokens".into(), json!(tokens));
    }
    Value::Object(data)
}

/// `data` with its token set replaced by `tokens`. A refresh response without
/// a refresh token keeps the previous one.
pub(crate) fn with_tokens(data: &Value, tokens: TokenSet) -> Value {
    let previous: Option<TokenSet> = data
        .get("tokens")
        .and_then(|t| serde_json::from_value(t.clone()).ok());
    let tokens = TokenSet {
        refresh_token: tokens
            .refresh_token
            .or_else(|| previous.and_then(|p| p.refresh_token)),
        ..tokens
    };

    let mut data = data.as_object().cloned().unwrap_or_default();
    data.insert("tokens".into(), json!(tokens));
    Value::Object(data)
}

impl SessionManager {
    pub fn new(
        adapter: Arc<dyn Adapter>,
        clock: Arc<dyn Clock>,
        ttl: SessionTtl,
        timeout: Duration,
    ) -> Self {
        Self {
            adapter,
            clock,
            ttl,
            timeout,
        }
    }

    /// Persist a new session for `user_id` with the protocol's TTL.
    pub async fn create(
        &self,
        user_id: &str,
        config_id: &str,
        provider_type: &ProviderType,
        info: &ProviderUserInfo,
    ) -> Result<SsoSession> {
        let now = self.clock.now();
        let session = SsoSession {
            id: generate_id(),
            user_id: user_id.to_string(),
            config_id: config_id.to_string(),
            provider_user_id: info.id.clone(),
            session_data: session_data(provider_type, info),
            expires_at: now + self.ttl.for_provider(provider_type),
            created_at: now,
            last_used_at: now,
        };

        let created = with_timeout(
            self.timeout,
            "session create",
            self.adapter.create_sso_session(&session),
        )
        .await?;
        debug!(session_id = %created.id, config_id, "sso session created");
        Ok(created)
    }

    /// Sessions of `user_id` that have not expired, newest first.
    pub async fn active_for_user(&self, user_id: &str) -> Result<Vec<SsoSession>> {
        let now = self.clock.now().timestamp_millis();
        let query = FindManyQuery::filter(vec![
            WhereClause::eq("userId", user_id),
            WhereClause::gt("expiresAt", now),
        ])
        .sort("createdAt", SortDirection::Desc);

        let rows = with_timeout(
            self.timeout,
            "session list",
            self.adapter.find_many(SESSIONS_TABLE, query),
        )
        .await?;
        rows::decode_all(SESSIONS_TABLE, rows)
    }

    /// The session with `id`, expired or not.
    pub async fn find(&self, id: &str) -> Result<Option<SsoSession>> {
        let row = with_timeout(
            self.timeout,
            "session lookup",
            self.adapter.find_one(SESSIONS_TABLE, &[WhereClause::eq("id", id)]),
        )
        .await?;
        row.map(|r| rows::decode(SESSIONS_TABLE, r)).transpose()
    }

    /// The session with `id` unless it has expired.
    pub async fn find_active(&self, id: &str) -> Result<Option<SsoSession>> {
        let now = self.clock.now();
        Ok(self.find(id).await?.filter(|s| !s.is_expired(now)))
    }

    /// Push expiry out by the protocol TTL and mark the session used.
    /// `session_data`, when given, replaces the stored blob.
    pub async fn extend(
        &self,
        id: &str,
        provider_type: &ProviderType,
        session_data: Option<Value>,
    ) -> Result<Option<SsoSession>> {
        let now = self.clock.now();
        let mut patch = json!({
            "expiresAt": (now + self.ttl.for_provider(provider_type)).timestamp_millis(),
            "lastUsedAt": now.timestamp_millis(),
        });
        if let Some(data) = session_data {
            patch["sessionData"] = data;
        }

        let row = with_timeout(
            self.timeout,
            "session update",
            self.adapter
                .update(SESSIONS_TABLE, &[WhereClause::eq("id", id)], patch),
        )
        .await?;
        row.map(|r| rows::decode(SESSIONS_TABLE, r)).transpose()
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        with_timeout(
            self.timeout,
            "session delete",
            self.adapter.delete(SESSIONS_TABLE, &[WhereClause::eq("id", id)]),
        )
        .await
    }

    /// Remove every session issued through `config_id`.
    pub async fn delete_for_config(&self, config_id: &str) -> Result<i64> {
        with_timeout(
            self.timeout,
            "session delete",
            self.adapter
                .delete_many(SESSIONS_TABLE, &[WhereClause::eq("configId", config_id)]),
        )
        .await
    }

    /// Delete sessions whose expiry has passed. Returns the rows removed by
    /// this call.
    pub async fn cleanup_expired(&self) -> Result<i64> {
        with_timeout(
            self.timeout,
            "session cleanup",
            self.adapter.cleanup_expired_sessions(self.clock.now()),
        )
        .await
    }
}
