//! Local replica of the package index
//!
//! The replica is a single embedded SQLite file. It is only ever written by
//! the synchronizer and is held through exactly one connection, so there is a
//! single writer per process.

pub mod migrations;

use crate::{PackageError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub use migrations::SCHEMA_VERSION;

/// Single-connection handle on the local index replica
pub struct LocalReplica {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl LocalReplica {
    /// Open (creating if needed) the replica at `path` and migrate its schema
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PackageError::local_store(format!(
                    "cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            PackageError::local_store(format!("cannot open {}: {}", path.display(), e))
        })?;

        debug!("Opened local index at {}", path.display());
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Delete any existing replica file and start from an empty one
    pub fn recreate(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Removing local index at {}", path.display());
            std::fs::remove_file(path).map_err(|e| {
                PackageError::local_store(format!("cannot remove {}: {}", path.display(), e))
            })?;
        }
        Self::open(path)
    }

    /// Replica that lives only in memory
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PackageError::local_store(e.to_string()))?;
        Self::init(conn, None)
    }

    fn init(mut conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::migrate(&mut conn).map_err(|e| {
            PackageError::local_store(format!("cannot migrate local index schema: {}", e))
        })?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// File backing the replica, `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` with shared access to the connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` with exclusive access, e.g. to open a transaction
    pub fn with_conn_mut<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    /// Applied schema version
    pub fn schema_version(&self) -> Result<i64> {
        self.with_conn(migrations::current_version)
    }

    /// Whether a table exists in the replica
    pub fn has_table(&self, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Row count of a table
    pub fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        self.with_conn(|conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))
    }
}

/// Quote an SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_schema() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("index.db");
        let replica = LocalReplica::open(&path).unwrap();

        assert!(path.exists());
        assert_eq!(replica.schema_version().unwrap(), SCHEMA_VERSION);
        assert!(replica.has_table("packages").unwrap());
        assert!(!replica.has_table("licenses").unwrap());
        assert_eq!(replica.row_count("versions").unwrap(), 0);
    }

    #[test]
    fn test_recreate_discards_rows() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.db");

        {
            let replica = LocalReplica::open(&path).unwrap();
            replica
                .with_conn(|conn| {
                    conn.execute(
                        "INSERT INTO packages (id, name, description) VALUES (1, 'root', 'ROOT')",
                        [],
                    )?;
                    Ok(())
                })
                .unwrap();
            assert_eq!(replica.row_count("packages").unwrap(), 1);
        }

        let replica = LocalReplica::recreate(&path).unwrap();
        assert_eq!(replica.row_count("packages").unwrap(), 0);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("packages"), "\"packages\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
