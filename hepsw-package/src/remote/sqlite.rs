//! Remote index served from a SQLite file

use super::{user_tables, RemoteStore, RemoteTable, RowSet, LIST_TABLES_SQL};
use crate::{PackageError, Result};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::path::Path;

/// File-backed remote, opened read-only
pub struct SqliteRemote {
    conn: Mutex<Connection>,
}

impl SqliteRemote {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PackageError::connection(format!(
                "remote index file {} does not exist",
                path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| PackageError::connection(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl RemoteStore for SqliteRemote {
    fn ping(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| PackageError::connection(e.to_string()))
    }

    fn list_tables(&self) -> Result<Vec<RemoteTable>> {
        user_tables(self.query(LIST_TABLES_SQL, &[])?)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<RowSet> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(remote_error)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<Value>>>()
            })
            .map_err(remote_error)?
            .collect::<rusqlite::Result<Vec<Vec<Value>>>>()
            .map_err(remote_error)?;

        Ok(RowSet { columns, rows })
    }
}

fn remote_error(e: rusqlite::Error) -> PackageError {
    PackageError::Remote {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_query_with_params() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("remote.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE packages (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO packages VALUES (1, 'root'), (2, 'geant4'), (3, 'pythia8');",
        )
        .unwrap();
        drop(conn);

        let remote = SqliteRemote::open(&path).unwrap();
        remote.ping().unwrap();

        let rows = remote
            .query(
                "SELECT id, name FROM packages WHERE id > ?1 ORDER BY id",
                &[Value::Integer(1)],
            )
            .unwrap();
        assert_eq!(rows.columns, vec!["id", "name"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.rows[0][1], Value::Text("geant4".to_string()));

        let tables = remote.list_tables().unwrap();
        assert_eq!(tables[0].name, "packages");
        assert!(remote.query("SELECT * FROM missing", &[]).is_err());
    }

    #[test]
    fn test_missing_file_is_connection_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = SqliteRemote::open(&temp_dir.path().join("absent.db"));
        assert!(matches!(result, Err(PackageError::Connection { .. })));
    }
}
