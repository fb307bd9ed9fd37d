// Audit trail types and the sink every provider writes through.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Login,
    Logout,
    TokenRefresh,
    Provision,
    Error,
    /// Configuration created, updated or deleted.
    Configuration,
    SessionCleanup,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::TokenRefresh => "token_refresh",
            Self::Provision => "provision",
            Self::Error => "error",
            Self::Configuration => "configuration",
            Self::SessionCleanup => "session_cleanup",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted, append-only audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_id: Option<String>,
    /// Absent for failures that happen before identity resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub action: AuditAction,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Write order within one logger; breaks ties between entries sharing a
    /// `created_at` millisecond.
    #[serde(default)]
    pub sequence: i64,
}

/// An audit event before it is stamped with an id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub success: bool,
    pub tenant_id: Option<String>,
    pub config_id: Option<String>,
    pub user_id: Option<String>,
    pub error_message: Option<String>,
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn success(action: AuditAction) -> Self {
        Self {
            action,
            success: true,
            tenant_id: None,
            config_id: None,
            user_id: None,
            error_message: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn failure(action: AuditAction, error: impl fmt::Display) -> Self {
        Self {
            success: false,
            error_message: Some(error.to_string()),
            ..Self::success(action)
        }
    }

    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn config(mut self, config_id: impl Into<String>) -> Self {
        self.config_id = Some(config_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn into_entry(self, id: String, at: DateTime<Utc>, sequence: i64) -> AuditLogEntry {
        AuditLogEntry {
            id,
            tenant_id: self.tenant_id,
            config_id: self.config_id,
            user_id: self.user_id,
            action: self.action,
            success: self.success,
            error_message: self.error_message,
            details: self.details,
            created_at: at,
            sequence,
        }
    }
}

/// Query filter for audit entries. All fields are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogFilter {
    pub tenant_id: Option<String>,
    pub config_id: Option<String>,
    pub user_id: Option<String>,
    pub action: Option<AuditAction>,
    pub success: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Destination for audit events.
///
/// `record` is infallible: implementations swallow and log their own
/// failures so the calling flow never fails because of auditing.
#[async_trait]
pub trait AuditSink: Send + Sync + fmt::Debug {
    async fn record(&self, event: AuditEvent);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _event: AuditEvent) {}
}
