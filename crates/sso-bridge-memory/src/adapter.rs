// In-memory adapter: HashMap-based store implementing the core Adapter trait.
//
// Rows live in `HashMap<String, Vec<serde_json::Value>>` keyed by table name,
// guarded by one `tokio::sync::RwLock`. Every write holds the write lock for
// the whole check-then-insert, so unique constraints hold under concurrency.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use sso_bridge_core::db::adapter::{Adapter, FindManyQuery, Operator, SortDirection, WhereClause};
use sso_bridge_core::db::schema::unique_constraints_for;
use sso_bridge_core::error::{Result, SsoError};

type Store = HashMap<String, Vec<Value>>;

/// In-memory datastore for the SSO tables. Data is lost on drop.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    store: Arc<RwLock<Store>>,
    failing: Arc<RwLock<HashSet<String>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all tables (for tests).
    pub async fn snapshot(&self) -> Store {
        self.store.read().await.clone()
    }

    pub async fn clear(&self) {
        self.store.write().await.clear();
    }

    /// Row count for a table.
    pub async fn model_count(&self, model: &str) -> usize {
        self.store
            .read()
            .await
            .get(model)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Make every write to `model` fail with a database error until
    /// [`MemoryAdapter::restore_writes`] is called.
    pub async fn fail_writes_to(&self, model: &str) {
        self.failing.write().await.insert(model.to_string());
    }

    pub async fn restore_writes(&self) {
        self.failing.write().await.clear();
    }

    async fn check_writable(&self, model: &str) -> Result<()> {
        if self.failing.read().await.contains(model) {
            return Err(SsoError::Database(format!("{model} is unavailable")));
        }
        Ok(())
    }
}

/// All clauses must match.
fn matches_where(record: &Value, clauses: &[WhereClause]) -> bool {
    clauses.iter().all(|clause| {
        let field_val = record.get(&clause.field).unwrap_or(&Value::Null);
        match_operator(field_val, &clause.value, clause.operator)
    })
}

fn match_operator(field_val: &Value, target: &Value, op: Operator) -> bool {
    match op {
        Operator::Eq => field_val == target,
        Operator::Ne => field_val != target,
        Operator::Lt => compare_json(field_val, target).is_some_and(Ordering::is_lt),
        Operator::Lte => compare_json(field_val, target).is_some_and(Ordering::is_le),
        Operator::Gt => compare_json(field_val, target).is_some_and(Ordering::is_gt),
        Operator::Gte => compare_json(field_val, target).is_some_and(Ordering::is_ge),
        Operator::In => match target {
            Value::Array(arr) => arr.contains(field_val),
            _ => false,
        },
    }
}

/// Numbers compare numerically, strings lexicographically.
fn compare_json(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(an), Value::Number(bn)) => {
            if let (Some(ai), Some(bi)) = (an.as_i64(), bn.as_i64()) {
                return Some(ai.cmp(&bi));
            }
            an.as_f64()?.partial_cmp(&bn.as_f64()?)
        }
        (Value::String(a_s), Value::String(b_s)) => Some(a_s.cmp(b_s)),
        (Value::Bool(a_b), Value::Bool(b_b)) => Some(a_b.cmp(b_b)),
        _ => None,
    }
}

fn sort_records(records: &mut [Value], query: &FindManyQuery) {
    if query.sort_by.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        query.sort_by.iter().fold(Ordering::Equal, |acc, sort| {
            acc.then_with(|| {
                let cmp = match (a.get(&sort.field), b.get(&sort.field)) {
                    (Some(av), Some(bv)) => compare_json(av, bv).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Greater,
                    (None, Some(_)) => Ordering::Less,
                    (None, None) => Ordering::Equal,
                };
                match sort.direction {
                    SortDirection::Asc => cmp,
                    SortDirection::Desc => cmp.reverse(),
                }
            })
        })
    });
}

fn merge_update(record: &mut Value, data: &Value) {
    if let (Some(rec_obj), Some(data_obj)) = (record.as_object_mut(), data.as_object()) {
        for (k, v) in data_obj {
            rec_obj.insert(k.clone(), v.clone());
        }
    }
}

/// Name of the first unique constraint `candidate` would violate in `rows`.
/// `skip` excludes the row being updated.
fn violated_constraint(
    model: &str,
    rows: &[Value],
    candidate: &Value,
    skip: Option<usize>,
) -> Option<&'static str> {
    for constraint in unique_constraints_for(model) {
        let key: Vec<&Value> = constraint
            .fields
            .iter()
            .map(|f| candidate.get(*f).unwrap_or(&Value::Null))
            .collect();
        if key.iter().any(|v| v.is_null()) {
            continue;
        }
        let clash = rows.iter().enumerate().any(|(i, row)| {
            Some(i) != skip
                && constraint
                    .fields
                    .iter()
                    .zip(&key)
                    .all(|(f, v)| row.get(*f) == Some(*v))
        });
        if clash {
            return Some(constraint.name);
        }
    }
    None
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn create(&self, model: &str, data: Value) -> Result<Value> {
        self.check_writable(model).await?;

        let mut record = data;
        let obj = record
            .as_object_mut()
            .ok_or_else(|| SsoError::Database(format!("{model}: row must be a JSON object")))?;
        if obj.get("id").map_or(true, Value::is_null) {
            obj.insert("id".into(), Value::String(uuid::Uuid::new_v4().to_string()));
        }

        let mut store = self.store.write().await;
        let rows = store.entry(model.to_string()).or_default();
        if let Some(name) = violated_constraint(model, rows, &record, None) {
            return Err(SsoError::Conflict(format!(
                "duplicate key value violates unique constraint \"{name}\""
            )));
        }
        rows.push(record.clone());

        Ok(record)
    }

    async fn find_one(&self, model: &str, where_clauses: &[WhereClause]) -> Result<Option<Value>> {
        let store = self.store.read().await;
        Ok(store
            .get(model)
            .and_then(|rows| rows.iter().find(|r| matches_where(r, where_clauses)))
            .cloned())
    }

    async fn find_many(&self, model: &str, query: FindManyQuery) -> Result<Vec<Value>> {
        let store = self.store.read().await;
        let mut result: Vec<Value> = store
            .get(model)
            .map(|rows| {
                rows.iter()
                    .filter(|r| matches_where(r, &query.where_clauses))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        sort_records(&mut result, &query);

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(result.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, model: &str, where_clauses: &[WhereClause]) -> Result<i64> {
        let store = self.store.read().await;
        let count = store
            .get(model)
            .map(|rows| rows.iter().filter(|r| matches_where(r, where_clauses)).count())
            .unwrap_or(0);
        Ok(count as i64)
    }

    async fn update(
        &self,
        model: &str,
        where_clauses: &[WhereClause],
        data: Value,
    ) -> Result<Option<Value>> {
        self.check_writable(model).await?;

        let mut store = self.store.write().await;
        let Some(rows) = store.get_mut(model) else {
            return Ok(None);
        };
        let Some(pos) = rows.iter().position(|r| matches_where(r, where_clauses)) else {
            return Ok(None);
        };

        let mut updated = rows[pos].clone();
        merge_update(&mut updated, &data);
        if let Some(name) = violated_constraint(model, rows, &updated, Some(pos)) {
            return Err(SsoError::Conflict(format!(
                "duplicate key value violates unique constraint \"{name}\""
            )));
        }
        rows[pos] = updated.clone();
        Ok(Some(updated))
    }

    async fn delete(&self, model: &str, where_clauses: &[WhereClause]) -> Result<bool> {
        self.check_writable(model).await?;

        let mut store = self.store.write().await;
        if let Some(rows) = store.get_mut(model) {
            if let Some(pos) = rows.iter().position(|r| matches_where(r, where_clauses)) {
                rows.remove(pos);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn delete_many(&self, model: &str, where_clauses: &[WhereClause]) -> Result<i64> {
        self.check_writable(model).await?;

        let mut store = self.store.write().await;
        match store.get_mut(model) {
            Some(rows) => {
                let before = rows.len();
                rows.retain(|r| !matches_where(r, where_clauses));
                Ok((before - rows.len()) as i64)
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use sso_bridge_core::db::schema::{SESSIONS_TABLE, USER_IDENTITIES_TABLE};
    use sso_bridge_core::types::SsoSession;

    fn session(id: &str, user: &str, expires_in: Duration) -> SsoSession {
        let now = Utc::now();
        SsoSession {
            id: id.into(),
            user_id: user.into(),
            config_id: "cfg-1".into(),
            provider_user_id: format!("ext-{user}"),
            session_data: json!({}),
            expires_at: now + expires_in,
            created_at: now,
            last_used_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_and_find_one() {
        let adapter = MemoryAdapter::new();
        adapter
            .create("widgets", json!({"id": "w1", "name": "first"}))
            .await
            .unwrap();
        let found = adapter
            .find_one("widgets", &[WhereClause::eq("id", "w1")])
            .await
            .unwrap();
        assert_eq!(found.unwrap()["name"], "first");
    }

    #[tokio::test]
    async fn test_create_auto_id() {
        let adapter = MemoryAdapter::new();
        let row = adapter.create("widgets", json!({"name": "x"})).await.unwrap();
        assert!(row["id"].is_string());
    }

    #[tokio::test]
    async fn test_duplicate_primary_key_is_conflict() {
        let adapter = MemoryAdapter::new();
        adapter
            .create(SESSIONS_TABLE, json!({"id": "s1"}))
            .await
            .unwrap();
        let err = adapter
            .create(SESSIONS_TABLE, json!({"id": "s1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_identity_link_unique_per_config() {
        let adapter = MemoryAdapter::new();
        let link = |id: &str, cfg: &str| {
            json!({"id": id, "configId": cfg, "providerUserId": "ext-1", "userId": "u1"})
        };
        adapter
            .create(USER_IDENTITIES_TABLE, link("l1", "cfg-1"))
            .await
            .unwrap();
        adapter
            .create(USER_IDENTITIES_TABLE, link("l2", "cfg-2"))
            .await
            .unwrap();
        let err = adapter
            .create(USER_IDENTITIES_TABLE, link("l3", "cfg-1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sso_user_identities_config_provider_user_key"));
    }

    #[tokio::test]
    async fn test_find_many_sorted_and_paged() {
        let adapter = MemoryAdapter::new();
        for i in 0..5 {
            adapter
                .create("rows", json!({"id": format!("r{i}"), "n": i}))
                .await
                .unwrap();
        }
        let rows = adapter
            .find_many(
                "rows",
                FindManyQuery::default()
                    .sort("n", SortDirection::Desc)
                    .page(Some(2), Some(1)),
            )
            .await
            .unwrap();
        let ns: Vec<i64> = rows.iter().map(|r| r["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_find_many_secondary_sort_breaks_ties() {
        let adapter = MemoryAdapter::new();
        for (id, day, seq) in [("a", 1, 0), ("b", 2, 1), ("c", 2, 2), ("d", 1, 3)] {
            adapter
                .create("rows", json!({"id": id, "day": day, "seq": seq}))
                .await
                .unwrap();
        }
        let rows = adapter
            .find_many(
                "rows",
                FindManyQuery::default()
                    .sort("day", SortDirection::Desc)
                    .sort("seq", SortDirection::Desc),
            )
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["c", "b", "d", "a"]);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let adapter = MemoryAdapter::new();
        adapter
            .create("rows", json!({"id": "r1", "a": 1, "b": 2}))
            .await
            .unwrap();
        let updated = adapter
            .update("rows", &[WhereClause::eq("id", "r1")], json!({"b": 3}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated, json!({"id": "r1", "a": 1, "b": 3}));
        assert!(adapter
            .update("rows", &[WhereClause::eq("id", "nope")], json!({"b": 4}))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_reports_removal() {
        let adapter = MemoryAdapter::new();
        adapter.create("rows", json!({"id": "r1"})).await.unwrap();
        assert!(adapter.delete("rows", &[WhereClause::eq("id", "r1")]).await.unwrap());
        assert!(!adapter.delete("rows", &[WhereClause::eq("id", "r1")]).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_sso_session_round_trip() {
        let adapter = MemoryAdapter::new();
        let s = session("s1", "u1", Duration::hours(1));
        let stored = adapter.create_sso_session(&s).await.unwrap();
        assert_eq!(stored, s);
        assert_eq!(adapter.model_count(SESSIONS_TABLE).await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_counts_only_this_invocation() {
        let adapter = MemoryAdapter::new();
        adapter
            .create_sso_session(&session("old", "u1", Duration::hours(-1)))
            .await
            .unwrap();
        adapter
            .create_sso_session(&session("live", "u1", Duration::hours(1)))
            .await
            .unwrap();

        let now = Utc::now();
        assert_eq!(adapter.cleanup_expired_sessions(now).await.unwrap(), 1);
        assert_eq!(adapter.cleanup_expired_sessions(now).await.unwrap(), 0);
        assert_eq!(adapter.model_count(SESSIONS_TABLE).await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_cleanup_deletes_each_row_once() {
        let adapter = MemoryAdapter::new();
        for i in 0..20 {
            adapter
                .create_sso_session(&session(&format!("s{i}"), "u1", Duration::minutes(-5)))
                .await
                .unwrap();
        }
        let now = Utc::now();
        let (a, b) = tokio::join!(
            adapter.cleanup_expired_sessions(now),
            adapter.cleanup_expired_sessions(now)
        );
        assert_eq!(a.unwrap() + b.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let adapter = MemoryAdapter::new();
        adapter.fail_writes_to("rows").await;
        let err = adapter.create("rows", json!({"id": "x"})).await.unwrap_err();
        assert!(matches!(err, SsoError::Database(_)));
        adapter.restore_writes().await;
        assert!(adapter.create("rows", json!({"id": "x"})).await.is_ok());
    }

    #[tokio::test]
    async fn test_operator_lte_on_millis() {
        let adapter = MemoryAdapter::new();
        adapter
            .create("rows", json!({"id": "a", "t": 1_700_000_000_000_i64}))
            .await
            .unwrap();
        let n = adapter
            .count("rows", &[WhereClause::lte("t", 1_700_000_000_000_i64)])
            .await
            .unwrap();
        assert_eq!(n, 1);
    }
}
