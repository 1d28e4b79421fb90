//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex so every read and write is
//! serialized. Opening a database configures PRAGMAs only; the schema is
//! owned by the migration manager.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, Transaction};
use tracing::info;

use memovox_core::error::{MemovoxError, Result};

/// Map a rusqlite error to the store's fatal storage error with context.
pub(crate) fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> MemovoxError + '_ {
    move |e| MemovoxError::StorageUnavailable(format!("{}: {}", context, e))
}

/// Thread-safe SQLite database wrapper.
///
/// `synchronous = FULL` makes every committed write durable before the call
/// that issued it returns.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MemovoxError::StorageUnavailable(format!(
                        "Failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path).map_err(storage_err("Failed to open database"))?;
        conn.busy_timeout(busy_timeout)
            .map_err(storage_err("Failed to set busy timeout"))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(storage_err("Failed to set pragmas"))?;

        info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(storage_err("Failed to open in-memory db"))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(storage_err("Failed to set pragmas"))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| {
            MemovoxError::StorageUnavailable(format!("Database lock poisoned: {}", e))
        })?;
        f(&conn)
    }

    /// Execute a closure inside a transaction.
    ///
    /// Commits when the closure returns `Ok`, rolls back otherwise.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| {
            MemovoxError::StorageUnavailable(format!("Database lock poisoned: {}", e))
        })?;
        let tx = conn
            .transaction()
            .map_err(storage_err("Failed to begin transaction"))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(storage_err("Failed to commit transaction"))?;
        Ok(value)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
