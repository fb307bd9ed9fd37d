// Audit trail writer and reader backed by the persistence adapter.
//
// Writes go through `Adapter::log_sso_activity` under the persistence
// timeout. A failed write is logged and dropped; it never reaches the flow
// that produced the event.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use sso_bridge_core::audit::{AuditEvent, AuditLogEntry, AuditLogFilter, AuditSink};
use sso_bridge_core::clock::Clock;
use sso_bridge_core::db::adapter::{Adapter, FindManyQuery, SortDirection, WhereClause};
use sso_bridge_core::db::schema::AUDIT_LOG_TABLE;
use sso_bridge_core::error::Result;
use sso_bridge_core::utils::{generate_id, with_timeout};

use crate::rows;

/// `AuditSink` that appends to the `sso_audit_log` table.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    adapter: Arc<dyn Adapter>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    /// Shared by clones so every handle onto one logger writes in order.
    sequence: Arc<AtomicI64>,
}

impl AuditLogger {
    pub fn new(adapter: Arc<dyn Adapter>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            adapter,
            clock,
            timeout,
            sequence: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Entries matching `filter`, newest first, at most `limit` of them.
    /// Entries written in the same millisecond come back in reverse write
    /// order.
    pub async fn query(&self, filter: &AuditLogFilter, limit: usize) -> Result<Vec<AuditLogEntry>> {
        let mut clauses = Vec::new();
        if let Some(tenant_id) = &filter.tenant_id {
            clauses.push(WhereClause::eq("tenantId", tenant_id.as_str()));
        }
        if let Some(config_id) = &filter.config_id {
            clauses.push(WhereClause::eq("configId", config_id.as_str()));
        }
        if let Some(user_id) = &filter.user_id {
            clauses.push(WhereClause::eq("userId", user_id.as_str()));
        }
        if let Some(action) = filter.action {
            clauses.push(WhereClause::eq("action", action.as_str()));
        }
        if let Some(success) = filter.success {
            clauses.push(WhereClause::eq("success", success));
        }

        let query = FindManyQuery::filter(clauses)
            .sort("createdAt", SortDirection::Desc)
            .sort("sequence", SortDirection::Desc)
            .page(Some(limit), filter.offset);
        let rows = with_timeout(
            self.timeout,
            "audit log query",
            self.adapter.find_many(AUDIT_LOG_TABLE, query),
        )
        .await?;
        rows::decode_all(AUDIT_LOG_TABLE, rows)
    }
}

#[async_trait]
impl AuditSink for AuditLogger {
    async fn record(&self, event: AuditEvent) {
        let action = event.action;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let entry = event.into_entry(generate_id(), self.clock.now(), sequence);
        let written = with_timeout(
            self.timeout,
            "audit write",
            self.adapter.log_sso_activity(&entry),
        )
        .await;
        if let Err(e) = written {
            warn!(
                action = %action,
                config_id = entry.config_id.as_deref().unwrap_or_default(),
                error = %e,
                "dropping audit entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use sso_bridge_core::audit::AuditAction;
    use sso_bridge_core::clock::ManualClock;
    use sso_bridge_memory::MemoryAdapter;

    fn logger(adapter: &MemoryAdapter, clock: Arc<ManualClock>) -> AuditLogger {
        AuditLogger::new(Arc::new(adapter.clone()), clock, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed() {
        let adapter = MemoryAdapter::new();
        adapter.fail_writes_to(AUDIT_LOG_TABLE).await;
        let audit = logger(&adapter, Arc::new(ManualClock::starting_now()));

        audit.record(AuditEvent::success(AuditAction::Login)).await;

        assert_eq!(adapter.model_count(AUDIT_LOG_TABLE).await, 0);
    }

    #[tokio::test]
    async fn test_query_filters_and_orders_newest_first() {
        let adapter = MemoryAdapter::new();
        let clock = Arc::new(ManualClock::starting_now());
        let audit = logger(&adapter, clock.clone());

        for (action, config) in [
            (AuditAction::Login, "cfg-1"),
            (AuditAction::Logout, "cfg-1"),
            (AuditAction::Login, "cfg-2"),
            (AuditAction::Login, "cfg-1"),
        ] {
            audit.record(AuditEvent::success(action).config(config)).await;
            clock.advance(ChronoDuration::seconds(1));
        }

        let filter = AuditLogFilter {
            config_id: Some("cfg-1".into()),
            action: Some(AuditAction::Login),
            ..Default::default()
        };
        let entries = audit.query(&filter, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].created_at > entries[1].created_at);

        let first_page = audit.query(&AuditLogFilter::default(), 1).await.unwrap();
        assert_eq!(first_page.len(), 1);
        assert_eq!(first_page[0].id, entries[0].id);
    }

    #[tokio::test]
    async fn test_same_millisecond_entries_newest_first() {
        let adapter = MemoryAdapter::new();
        let audit = logger(&adapter, Arc::new(ManualClock::starting_now()));

        let actions = [
            AuditAction::Provision,
            AuditAction::Login,
            AuditAction::TokenRefresh,
            AuditAction::Logout,
        ];
        for action in actions {
            audit.record(AuditEvent::success(action).user("user-1")).await;
        }

        let entries = audit.query(&AuditLogFilter::default(), 10).await.unwrap();
        let order: Vec<AuditAction> = entries.iter().map(|e| e.action).collect();
        assert_eq!(
            order,
            vec![
                AuditAction::Logout,
                AuditAction::TokenRefresh,
                AuditAction::Login,
                AuditAction::Provision,
            ]
        );
        assert!(entries.windows(2).all(|w| w[0].created_at == w[1].created_at));
    }
}
