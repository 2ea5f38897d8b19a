//! Database connection management

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::{Error, Result};

use super::migrations;

/// Shared handle to the local `SQLite` database.
///
/// The connection sits behind a mutex so the async sync manager can hold
/// store handles across await points; the guard is only ever held for the
/// duration of a synchronous statement, never across an await.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        configure(&conn)?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the underlying connection for a batch of statements
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("database connection mutex poisoned".into()))
    }
}

/// Configure `SQLite` for durability and concurrency
fn configure(conn: &Connection) -> Result<()> {
    // WAL keeps readers unblocked during the drain loop's writes
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        let value: i32 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_open_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tether.db");

        {
            let db = Database::open(&path).unwrap();
            let conn = db.lock().unwrap();
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('probe', '1')",
                [],
            )
            .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let conn = db.lock().unwrap();
        let value: String = conn
            .query_row("SELECT value FROM meta WHERE key = 'probe'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(value, "1");
    }
}
