//! In-memory remote service
//!
//! Backs the engine's integration tests and local development. Supports
//! injecting transient failures and per-table validation rejections, and
//! keeps an ordered log of applied operations so tests can assert replay
//! order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use super::{RemoteError, RemoteResult, RemoteService};

#[derive(Default)]
struct Inner {
    tables: HashMap<String, BTreeMap<String, Value>>,
    /// Number of upcoming calls that fail with a transient error
    transient_failures: u32,
    /// Tables whose mutations are rejected as invalid
    rejected_tables: HashSet<String>,
    /// Applied mutations, in order (`"update tasks/t1"`)
    log: Vec<String>,
}

/// A remote canonical service held entirely in memory
#[derive(Default)]
pub struct InMemoryRemote {
    inner: Mutex<Inner>,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Place a record server-side without going through the service surface
    pub fn seed(&self, table: &str, id: &str, record: Value) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), record);
    }

    /// Current server copy of a record
    #[must_use]
    pub fn record(&self, table: &str, id: &str) -> Option<Value> {
        self.lock()
            .tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    /// Make the next `count` calls fail with a transient error
    pub fn fail_next(&self, count: u32) {
        self.lock().transient_failures = count;
    }

    /// Reject every mutation against `table` as invalid
    pub fn reject_table(&self, table: &str) {
        self.lock().rejected_tables.insert(table.to_string());
    }

    /// Mutations applied so far, in order
    #[must_use]
    pub fn applied_ops(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    fn check_failures(inner: &mut Inner, table: &str) -> RemoteResult<()> {
        if inner.transient_failures > 0 {
            inner.transient_failures -= 1;
            return Err(RemoteError::Transient("injected network failure".into()));
        }
        if inner.rejected_tables.contains(table) {
            return Err(RemoteError::Rejected(format!(
                "schema validation failed for table '{table}'"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteService for InMemoryRemote {
    async fn insert(&self, table: &str, record: &Value) -> RemoteResult<Value> {
        let mut inner = self.lock();
        Self::check_failures(&mut inner, table)?;

        let id = record
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Rejected("record is missing a string 'id' field".into()))?
            .to_string();

        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id.clone(), record.clone());
        inner.log.push(format!("insert {table}/{id}"));
        Ok(record.clone())
    }

    async fn update(&self, table: &str, id: &str, record: &Value) -> RemoteResult<Value> {
        let mut inner = self.lock();
        Self::check_failures(&mut inner, table)?;

        let rows = inner.tables.entry(table.to_string()).or_default();
        if !rows.contains_key(id) {
            return Err(RemoteError::Rejected(format!(
                "no such record: {table}/{id}"
            )));
        }
        rows.insert(id.to_string(), record.clone());
        inner.log.push(format!("update {table}/{id}"));
        Ok(record.clone())
    }

    async fn delete(&self, table: &str, id: &str) -> RemoteResult<()> {
        let mut inner = self.lock();
        Self::check_failures(&mut inner, table)?;

        if let Some(rows) = inner.tables.get_mut(table) {
            rows.remove(id);
        }
        inner.log.push(format!("delete {table}/{id}"));
        Ok(())
    }

    async fn fetch(&self, table: &str, id: &str) -> RemoteResult<Option<Value>> {
        let mut inner = self.lock();
        Self::check_failures(&mut inner, table)?;

        Ok(inner
            .tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_then_fetch() {
        let remote = InMemoryRemote::new();
        remote
            .insert("tasks", &json!({"id": "t1", "title": "x"}))
            .await
            .unwrap();

        let fetched = remote.fetch("tasks", "t1").await.unwrap().unwrap();
        assert_eq!(fetched["title"], "x");
        assert!(remote.fetch("tasks", "t2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transient_failures_are_consumed() {
        let remote = InMemoryRemote::new();
        remote.fail_next(1);

        let err = remote.fetch("tasks", "t1").await.unwrap_err();
        assert!(err.is_transient());
        assert!(remote.fetch("tasks", "t1").await.is_ok());
    }

    #[tokio::test]
    async fn test_rejected_table() {
        let remote = InMemoryRemote::new();
        remote.reject_table("tasks");

        let err = remote
            .insert("tasks", &json!({"id": "t1"}))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_update_requires_existing_record() {
        let remote = InMemoryRemote::new();
        let err = remote
            .update("tasks", "t1", &json!({"id": "t1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
    }
}
