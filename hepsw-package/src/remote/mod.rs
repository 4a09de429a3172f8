//! Remote source of truth for the package index

mod http;
mod sqlite;

pub use http::HttpRemote;
pub use sqlite::SqliteRemote;

use crate::config::IndexConfig;
use crate::{PackageError, Result};
use rusqlite::types::Value;
use std::path::PathBuf;
use tracing::debug;

/// Table name prefixes owned by the database engine or its tooling
pub const INTERNAL_TABLE_PREFIXES: [&str; 3] = ["sqlite_", "libsql_", "_litestream_"];

/// A user table on the remote with its creation statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTable {
    pub name: String,
    pub create_sql: String,
}

/// Result of a remote query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// A SQL endpoint the local replica is synchronized from
#[cfg_attr(test, mockall::automock)]
pub trait RemoteStore: Send + Sync {
    /// Check that the remote is reachable and accepts our credentials
    fn ping(&self) -> Result<()>;

    /// User tables with their creation statements, internal tables excluded
    fn list_tables(&self) -> Result<Vec<RemoteTable>>;

    /// Run a read query with positional parameters
    fn query(&self, sql: &str, params: &[Value]) -> Result<RowSet>;
}

/// Schema introspection query shared by every backend
pub(crate) const LIST_TABLES_SQL: &str =
    "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND sql IS NOT NULL ORDER BY name";

pub fn is_internal_table(name: &str) -> bool {
    INTERNAL_TABLE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Turn the rows of [`LIST_TABLES_SQL`] into user tables
pub(crate) fn user_tables(rows: RowSet) -> Result<Vec<RemoteTable>> {
    let mut tables = Vec::new();
    for row in rows.rows {
        let (name, create_sql) = match (row.first(), row.get(1)) {
            (Some(Value::Text(name)), Some(Value::Text(sql))) => (name.clone(), sql.clone()),
            _ => continue,
        };
        if is_internal_table(&name) {
            debug!("Skipping internal table {}", name);
            continue;
        }
        tables.push(RemoteTable { name, create_sql });
    }

    if tables.is_empty() {
        return Err(PackageError::Remote {
            message: "remote index has no tables".to_string(),
        });
    }
    Ok(tables)
}

/// Open the remote named by `config.database_url`.
///
/// `file:` URLs open a SQLite file; `libsql://`, `https://` and `http://`
/// URLs speak the HTTP pipeline protocol with the configured bearer token.
pub fn open_remote(config: &IndexConfig) -> Result<Box<dyn RemoteStore>> {
    config.validate_remote()?;
    let url = config.database_url.trim();

    if let Some(path) = url.strip_prefix("file:") {
        let path = path.strip_prefix("//").unwrap_or(path);
        return Ok(Box::new(SqliteRemote::open(&PathBuf::from(path))?));
    }

    if url.starts_with("libsql://") || url.starts_with("https://") || url.starts_with("http://") {
        return Ok(Box::new(HttpRemote::new(config)?));
    }

    Err(PackageError::Config {
        message: format!("unsupported index URL scheme: {}", url),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn test_internal_tables_are_filtered() {
        let rows = RowSet {
            columns: vec!["name".to_string(), "sql".to_string()],
            rows: vec![
                vec![text("libsql_wasm_func_table"), text("CREATE TABLE libsql_wasm_func_table (x)")],
                vec![text("packages"), text("CREATE TABLE packages (id INTEGER)")],
                vec![text("sqlite_sequence"), text("CREATE TABLE sqlite_sequence(name,seq)")],
                vec![text("_litestream_seq"), text("CREATE TABLE _litestream_seq (id)")],
            ],
        };

        let tables = user_tables(rows).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "packages");
    }

    #[test]
    fn test_no_user_tables_is_an_error() {
        let rows = RowSet {
            columns: vec!["name".to_string(), "sql".to_string()],
            rows: vec![vec![text("sqlite_stat1"), text("CREATE TABLE sqlite_stat1(tbl)")]],
        };
        assert!(matches!(user_tables(rows), Err(PackageError::Remote { .. })));
    }

    #[test]
    fn test_open_remote_rejects_unknown_scheme() {
        let config = IndexConfig {
            database_url: "ftp://index.example.org".to_string(),
            auth_token: "token".to_string(),
            ..IndexConfig::default()
        };
        assert!(matches!(
            open_remote(&config),
            Err(PackageError::Config { .. })
        ));
    }
}
