// Persistence adapter trait for the SSO tables.
//
// Schema-agnostic row CRUD over `serde_json::Value`, plus the three
// procedure-style calls the SSO layer relies on for atomic session creation,
// the expiry sweep and audit writes.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::AuditLogEntry;
use crate::db::schema::{AUDIT_LOG_TABLE, SESSIONS_TABLE};
use crate::error::{Result, SsoError};
use crate::types::SsoSession;

// ─── Where Clause ────────────────────────────────────────────────

/// Comparison operators for WHERE clauses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
}

/// A single WHERE condition. Clauses in a slice are AND-ed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    pub field: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub operator: Operator,
}

impl WhereClause {
    pub fn new(
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            operator,
        }
    }

    /// Simple equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::new(field, Operator::Eq, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::new(field, Operator::Lte, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::new(field, Operator::Gt, value)
    }
}

// ─── Sort / Pagination ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Query parameters for `find_many`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindManyQuery {
    pub where_clauses: Vec<WhereClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// Sort keys in priority order; each later key breaks ties left by the
    /// ones before it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort_by: Vec<SortBy>,
}

impl FindManyQuery {
    pub fn filter(where_clauses: Vec<WhereClause>) -> Self {
        Self {
            where_clauses,
            ..Default::default()
        }
    }

    /// Append a sort key.
    pub fn sort(mut self, field: &str, direction: SortDirection) -> Self {
        self.sort_by.push(SortBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    pub fn page(mut self, limit: Option<usize>, offset: Option<usize>) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

// ─── Adapter Trait ───────────────────────────────────────────────

/// Datastore behind the SSO tables.
///
/// Implementations must enforce the unique constraints declared in
/// [`crate::db::schema`] and report violations as [`SsoError::Conflict`];
/// provisioning depends on that to resolve concurrent first logins.
#[async_trait]
pub trait Adapter: Send + Sync + fmt::Debug {
    /// Insert a row. Returns the stored row.
    async fn create(&self, model: &str, data: serde_json::Value) -> Result<serde_json::Value>;

    async fn find_one(
        &self,
        model: &str,
        where_clauses: &[WhereClause],
    ) -> Result<Option<serde_json::Value>>;

    async fn find_many(&self, model: &str, query: FindManyQuery)
        -> Result<Vec<serde_json::Value>>;

    async fn count(&self, model: &str, where_clauses: &[WhereClause]) -> Result<i64>;

    /// Shallow-merge `data` into the first matching row.
    /// Returns the updated row, or `None` if nothing matched.
    async fn update(
        &self,
        model: &str,
        where_clauses: &[WhereClause],
        data: serde_json::Value,
    ) -> Result<Option<serde_json::Value>>;

    /// Delete the first matching row. Returns whether one was removed.
    async fn delete(&self, model: &str, where_clauses: &[WhereClause]) -> Result<bool>;

    /// Delete every matching row. Returns the number removed by this call.
    async fn delete_many(&self, model: &str, where_clauses: &[WhereClause]) -> Result<i64>;

    // ── Procedures ──

    /// Persist a session in a single insert.
    async fn create_sso_session(&self, session: &SsoSession) -> Result<SsoSession> {
        let row = self
            .create(SESSIONS_TABLE, serde_json::to_value(session)?)
            .await?;
        serde_json::from_value(row)
            .map_err(|e| SsoError::Database(format!("malformed session row: {e}")))
    }

    /// Delete every session with `expiresAt <= now`.
    /// Returns the rows removed by this invocation only.
    async fn cleanup_expired_sessions(&self, now: DateTime<Utc>) -> Result<i64> {
        self.delete_many(
            SESSIONS_TABLE,
            &[WhereClause::lte("expiresAt", now.timestamp_millis())],
        )
        .await
    }

    /// Append one audit row.
    async fn log_sso_activity(&self, entry: &AuditLogEntry) -> Result<()> {
        self.create(AUDIT_LOG_TABLE, serde_json::to_value(entry)?)
            .await
            .map(|_| ())
    }
}
