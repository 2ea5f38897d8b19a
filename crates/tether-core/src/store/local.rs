//! Schema-light local persistence layer
//!
//! Records are JSON documents keyed by `(table, id)`. Typed access is
//! generic over serde; the stored shape is validated only at this
//! boundary (a record must carry a string `"id"` field).

use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{QueueAction, QueueItem};
use crate::queue;

use super::connection::Database;

/// Meta key holding the completion time of the last successful drain
pub const META_LAST_SYNC_TIME: &str = "last_sync_time";

/// Durable key/value-per-table store with read-your-writes semantics.
///
/// Each table write is independently durable; there is no cross-table
/// transaction surface. Storage failures are returned to the caller,
/// never swallowed.
#[derive(Clone)]
pub struct LocalStore {
    db: Database,
}

impl LocalStore {
    /// Create a store over an open database
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// All records in a table, in last-updated order (newest first)
    pub fn get_all<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT data FROM records WHERE table_name = ? ORDER BY updated_at DESC",
        )?;

        let rows = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(Error::from))
            .collect()
    }

    /// Fetch one record by id
    pub fn get_by_id<T: DeserializeOwned>(&self, table: &str, id: &str) -> Result<Option<T>> {
        self.get_raw(table, id)?
            .map(|value| serde_json::from_value(value).map_err(Error::from))
            .transpose()
    }

    /// Insert or replace a record
    pub fn put<T: Serialize>(&self, table: &str, record: &T) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.put_raw(table, &value)
    }

    /// Insert or replace a batch of records in one transaction
    pub fn put_all<T: Serialize>(&self, table: &str, records: &[T]) -> Result<()> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        for record in records {
            let value = serde_json::to_value(record)?;
            upsert_record(&tx, table, &value)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove a record; absent ids are a no-op
    pub fn remove(&self, table: &str, id: &str) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "DELETE FROM records WHERE table_name = ? AND id = ?",
            params![table, id],
        )?;
        Ok(())
    }

    /// Fetch one record as a raw JSON value
    pub fn get_raw(&self, table: &str, id: &str) -> Result<Option<Value>> {
        let conn = self.db.lock()?;
        let result = conn.query_row(
            "SELECT data FROM records WHERE table_name = ? AND id = ?",
            params![table, id],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert or replace a raw JSON record
    pub fn put_raw(&self, table: &str, value: &Value) -> Result<()> {
        let conn = self.db.lock()?;
        upsert_record(&conn, table, value)
    }

    /// Apply a mutation optimistically and enqueue it, in one transaction.
    ///
    /// Either the record change and the queue row both land, or neither
    /// does; a mutation is never partially applied.
    pub fn apply_mutation(&self, item: &QueueItem) -> Result<()> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        match item.action {
            QueueAction::Insert | QueueAction::Update => {
                upsert_record(&tx, &item.table, &item.data)?;
            }
            QueueAction::Delete => {
                tx.execute(
                    "DELETE FROM records WHERE table_name = ? AND id = ?",
                    params![item.table, item.record_id],
                )?;
            }
        }
        queue::insert_item(&tx, item)?;
        tx.commit()?;

        tracing::debug!(
            table = %item.table,
            record_id = %item.record_id,
            action = %item.action,
            "Applied optimistic mutation and enqueued it"
        );
        Ok(())
    }

    /// Last server-observed version of a record, if one was recorded
    pub fn shadow(&self, table: &str, id: &str) -> Result<Option<Value>> {
        let conn = self.db.lock()?;
        let result = conn.query_row(
            "SELECT data FROM sync_shadows WHERE table_name = ? AND id = ?",
            params![table, id],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Record the server version just observed for a record
    pub fn put_shadow(&self, table: &str, id: &str, value: &Value) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO sync_shadows (table_name, id, data, observed_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(table_name, id) DO UPDATE SET
                data = excluded.data,
                observed_at = excluded.observed_at",
            params![
                table,
                id,
                serde_json::to_string(value)?,
                chrono::Utc::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// Drop the recorded server version for a record
    pub fn remove_shadow(&self, table: &str, id: &str) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "DELETE FROM sync_shadows WHERE table_name = ? AND id = ?",
            params![table, id],
        )?;
        Ok(())
    }

    /// Read an engine metadata value
    pub fn meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.db.lock()?;
        let result = conn.query_row(
            "SELECT value FROM meta WHERE key = ?",
            params![key],
            |row| row.get(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write an engine metadata value
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }
}

/// Insert or replace a record row, preserving `created_at` on replace
fn upsert_record(conn: &Connection, table: &str, value: &Value) -> Result<()> {
    let id = record_id(value)?;
    let now = chrono::Utc::now().timestamp_millis();
    conn.execute(
        "INSERT INTO records (table_name, id, data, created_at, updated_at) VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(table_name, id) DO UPDATE SET
            data = excluded.data,
            updated_at = excluded.updated_at",
        params![table, id, serde_json::to_string(value)?, now, now],
    )?;
    Ok(())
}

/// Extract the mandatory string `"id"` field from a record payload
pub(crate) fn record_id(value: &Value) -> Result<&str> {
    value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput("record is missing a string 'id' field".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Task {
        id: String,
        title: String,
        done: bool,
    }

    fn setup() -> LocalStore {
        LocalStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_put_and_get_by_id() {
        let store = setup();
        let task = Task {
            id: "t1".into(),
            title: "write tests".into(),
            done: false,
        };

        store.put("tasks", &task).unwrap();
        let fetched: Task = store.get_by_id("tasks", "t1").unwrap().unwrap();
        assert_eq!(fetched, task);
    }

    #[test]
    fn test_get_by_id_absent() {
        let store = setup();
        let fetched: Option<Task> = store.get_by_id("tasks", "missing").unwrap();
        assert!(fetched.is_none());
    }

    #[test]
    fn test_put_replaces_existing() {
        let store = setup();
        store
            .put_raw("tasks", &json!({"id": "t1", "title": "old"}))
            .unwrap();
        store
            .put_raw("tasks", &json!({"id": "t1", "title": "new"}))
            .unwrap();

        let value = store.get_raw("tasks", "t1").unwrap().unwrap();
        assert_eq!(value["title"], "new");
        let all: Vec<Value> = store.get_all("tasks").unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_put_all_and_get_all() {
        let store = setup();
        let tasks = vec![
            Task {
                id: "t1".into(),
                title: "a".into(),
                done: false,
            },
            Task {
                id: "t2".into(),
                title: "b".into(),
                done: true,
            },
        ];

        store.put_all("tasks", &tasks).unwrap();
        let all: Vec<Task> = store.get_all("tasks").unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_tables_are_independent() {
        let store = setup();
        store.put_raw("tasks", &json!({"id": "x"})).unwrap();
        store.put_raw("profiles", &json!({"id": "x"})).unwrap();

        store.remove("tasks", "x").unwrap();
        assert!(store.get_raw("tasks", "x").unwrap().is_none());
        assert!(store.get_raw("profiles", "x").unwrap().is_some());
    }

    #[test]
    fn test_put_rejects_record_without_id() {
        let store = setup();
        let err = store.put_raw("tasks", &json!({"title": "no id"})).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_shadow_round_trip() {
        let store = setup();
        assert!(store.shadow("tasks", "t1").unwrap().is_none());

        store
            .put_shadow("tasks", "t1", &json!({"id": "t1", "title": "server"}))
            .unwrap();
        let shadow = store.shadow("tasks", "t1").unwrap().unwrap();
        assert_eq!(shadow["title"], "server");

        store.remove_shadow("tasks", "t1").unwrap();
        assert!(store.shadow("tasks", "t1").unwrap().is_none());
    }

    #[test]
    fn test_meta_round_trip() {
        let store = setup();
        assert!(store.meta(META_LAST_SYNC_TIME).unwrap().is_none());
        store.set_meta(META_LAST_SYNC_TIME, "1700000000000").unwrap();
        assert_eq!(
            store.meta(META_LAST_SYNC_TIME).unwrap().as_deref(),
            Some("1700000000000")
        );
    }
}
