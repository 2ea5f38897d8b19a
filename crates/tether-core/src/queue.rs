//! Durable, ordered log of pending mutations
//!
//! Layered on the local store's database in a dedicated `sync_queue`
//! table. Items come back in enqueue order: by `enqueued_at`, ties broken
//! by the autoincrement sequence. Replaying same-table mutations out of
//! order would leave the remote record at a stale intermediate state, so
//! this ordering is load-bearing.

use rusqlite::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{QueueAction, QueueItem};
use crate::store::Database;

/// Handle to the persistent sync queue
#[derive(Clone)]
pub struct SyncQueue {
    db: Database,
}

/// Raw row shape pulled out of `sync_queue` before action parsing
struct RawItem {
    id: String,
    table: String,
    action: String,
    record_id: String,
    data: String,
    enqueued_at: i64,
    attempts: u32,
    conflicted: bool,
}

const SELECT_COLUMNS: &str =
    "id, table_name, action, record_id, data, enqueued_at, attempts, conflicted";

impl SyncQueue {
    /// Create a queue over an open database
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a mutation to the queue
    pub fn add(&self, item: &QueueItem) -> Result<()> {
        let conn = self.db.lock()?;
        insert_item(&conn, item)
    }

    /// All pending items, in enqueue order
    pub fn all(&self) -> Result<Vec<QueueItem>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM sync_queue ORDER BY enqueued_at, seq"
        ))?;

        let raw = stmt
            .query_map([], parse_raw)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter().map(RawItem::into_item).collect()
    }

    /// Fetch one queue item by id
    pub fn get(&self, id: &str) -> Result<Option<QueueItem>> {
        let conn = self.db.lock()?;
        let result = conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM sync_queue WHERE id = ?"),
            params![id],
            parse_raw,
        );

        match result {
            Ok(raw) => Ok(Some(raw.into_item()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a queue item after its remote apply succeeded (or it was
    /// judged permanently unrecoverable)
    pub fn remove(&self, id: &str) -> Result<()> {
        let conn = self.db.lock()?;
        let rows = conn.execute("DELETE FROM sync_queue WHERE id = ?", params![id])?;
        if rows == 0 {
            return Err(Error::NotFound(format!("queue item {id}")));
        }
        Ok(())
    }

    /// Number of pending items
    pub fn len(&self) -> Result<usize> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Whether the queue has no pending items
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Bump an item's transient-failure count, returning the new count
    pub fn record_attempt(&self, id: &str) -> Result<u32> {
        let conn = self.db.lock()?;
        let rows = conn.execute(
            "UPDATE sync_queue SET attempts = attempts + 1 WHERE id = ?",
            params![id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!("queue item {id}")));
        }
        let attempts: u32 = conn.query_row(
            "SELECT attempts FROM sync_queue WHERE id = ?",
            params![id],
            |row| row.get(0),
        )?;
        Ok(attempts)
    }

    /// Mark or clear an item's awaiting-user-resolution flag
    pub fn set_conflicted(&self, id: &str, conflicted: bool) -> Result<()> {
        let conn = self.db.lock()?;
        let rows = conn.execute(
            "UPDATE sync_queue SET conflicted = ? WHERE id = ?",
            params![i32::from(conflicted), id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!("queue item {id}")));
        }
        Ok(())
    }

    /// Drop every pending item
    pub fn clear(&self) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute("DELETE FROM sync_queue", [])?;
        Ok(())
    }
}

/// Insert a queue row on an existing connection or transaction
pub(crate) fn insert_item(conn: &Connection, item: &QueueItem) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_queue (id, table_name, action, record_id, data, enqueued_at, attempts, conflicted)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            item.id,
            item.table,
            item.action.as_str(),
            item.record_id,
            serde_json::to_string(&item.data)?,
            item.enqueued_at,
            item.attempts,
            i32::from(item.conflicted)
        ],
    )?;
    Ok(())
}

fn parse_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawItem> {
    Ok(RawItem {
        id: row.get(0)?,
        table: row.get(1)?,
        action: row.get(2)?,
        record_id: row.get(3)?,
        data: row.get(4)?,
        enqueued_at: row.get(5)?,
        attempts: row.get(6)?,
        conflicted: row.get::<_, i32>(7)? != 0,
    })
}

impl RawItem {
    fn into_item(self) -> Result<QueueItem> {
        let action: QueueAction = self.action.parse().map_err(Error::InvalidInput)?;
        Ok(QueueItem {
            id: self.id,
            table: self.table,
            action,
            record_id: self.record_id,
            data: serde_json::from_str(&self.data)?,
            enqueued_at: self.enqueued_at,
            attempts: self.attempts,
            conflicted: self.conflicted,
        })
    }
}
