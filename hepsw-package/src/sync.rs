//! Incremental synchronization of the local replica from the remote index
//!
//! Tracked tables (`packages`, `versions`, `dependencies`) have an explicit
//! local schema and a monotonic integer id. Only rows past the table's
//! watermark are fetched, and each is upserted by primary key, so repeated
//! syncs converge on the same local content. Any other remote table is a
//! reference table: it is dropped, recreated from the remote DDL and fully
//! reloaded on every sync.
//!
//! Each table's rows are applied in one local transaction. A failure in any
//! table aborts the sync and leaves the caller's watermarks untouched.

use crate::config::HepswConfig;
use crate::remote::{open_remote, RemoteStore, RemoteTable, RowSet};
use crate::retry::{with_retry, CancelToken, RetryPolicy};
use crate::store::{quote_ident, LocalReplica};
use crate::{PackageError, Result};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Schema of a table synchronized incrementally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub id_column: &'static str,
    pub columns: &'static [&'static str],
}

/// Tables with a monotonic integer id column
pub const TRACKED_TABLES: [TableSpec; 3] = [
    TableSpec {
        name: "packages",
        id_column: "id",
        columns: &[
            "id",
            "name",
            "description",
            "documentation_url",
            "maintainer",
            "tags",
            "created_time",
            "updated_time",
        ],
    },
    TableSpec {
        name: "versions",
        id_column: "id",
        columns: &[
            "id",
            "package_id",
            "version",
            "manifest_url",
            "manifest_hash",
            "source_type",
            "source_url",
            "source_ref",
            "notes",
            "deprecated",
            "yanked",
            "published_at",
        ],
    },
    TableSpec {
        name: "dependencies",
        id_column: "id",
        columns: &[
            "id",
            "version_id",
            "dependency_name",
            "dependency_package_id",
            "version_constraint",
            "optional",
            "condition",
        ],
    },
];

/// Local tables a remote table must never replace
const LOCAL_ONLY_TABLES: [&str; 1] = ["schema_version"];

pub fn tracked_table(name: &str) -> Option<&'static TableSpec> {
    TRACKED_TABLES.iter().find(|spec| spec.name == name)
}

/// Per-table watermarks: the highest row id already synchronized
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    last_seen_ids: BTreeMap<String, i64>,
}

impl SyncState {
    pub fn new(last_seen_ids: BTreeMap<String, i64>) -> Self {
        Self { last_seen_ids }
    }

    /// Watermark of a table, 0 when never synced
    pub fn last_seen(&self, table: &str) -> i64 {
        self.last_seen_ids.get(table).copied().unwrap_or(0)
    }

    /// Move a watermark forward. Returns whether it changed.
    pub fn advance(&mut self, table: &str, id: i64) -> bool {
        if id <= self.last_seen(table) {
            return false;
        }
        self.last_seen_ids.insert(table.to_string(), id);
        true
    }

    pub fn as_map(&self) -> &BTreeMap<String, i64> {
        &self.last_seen_ids
    }

    pub fn into_map(self) -> BTreeMap<String, i64> {
        self.last_seen_ids
    }
}

/// How a table was brought up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMode {
    /// Rows past the watermark upserted
    Incremental,
    /// Dropped, recreated and reloaded
    Replaced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub table: String,
    pub mode: TableMode,
    /// Rows written locally
    pub rows: usize,
    /// Watermark after the sync, for tracked tables
    pub last_seen_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub tables: Vec<TableReport>,
}

impl SyncReport {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows).sum()
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }
}

/// Pulls remote rows into a local replica
pub struct Synchronizer<'a> {
    local: &'a LocalReplica,
    remote: &'a dyn RemoteStore,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl<'a> Synchronizer<'a> {
    pub fn new(local: &'a LocalReplica, remote: &'a dyn RemoteStore) -> Self {
        Self {
            local,
            remote,
            retry: RetryPolicy::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Synchronize every remote table.
    ///
    /// `state` is only updated when all tables succeed.
    pub fn sync(&self, state: &mut SyncState) -> Result<SyncReport> {
        let tables = with_retry(&self.retry, &self.cancel, || self.remote.list_tables())?;
        debug!("Remote index has {} tables", tables.len());

        let mut next = state.clone();
        let mut report = SyncReport::default();

        for table in &tables {
            if LOCAL_ONLY_TABLES.contains(&table.name.as_str()) {
                warn!("Ignoring remote table {:?}: name is reserved locally", table.name);
                continue;
            }

            let table_report = match tracked_table(&table.name) {
                Some(spec) => self.sync_tracked(spec, &mut next),
                None => self.sync_reference(table),
            }
            .map_err(|e| e.in_table(&table.name))?;

            info!(
                "Synced table {} ({} rows{})",
                table_report.table,
                table_report.rows,
                match table_report.mode {
                    TableMode::Incremental => "",
                    TableMode::Replaced => ", replaced",
                }
            );
            report.tables.push(table_report);
        }

        *state = next;
        Ok(report)
    }

    fn fetch(&self, sql: &str, params: &[Value]) -> Result<RowSet> {
        with_retry(&self.retry, &self.cancel, || self.remote.query(sql, params))
    }

    fn sync_tracked(&self, spec: &TableSpec, state: &mut SyncState) -> Result<TableReport> {
        let last_seen = state.last_seen(spec.name);
        let table = quote_ident(spec.name);
        let id = quote_ident(spec.id_column);
        let columns = column_list(spec.columns.iter().copied());

        let select = format!(
            "SELECT {} FROM {} WHERE {} > ?1 ORDER BY {} ASC",
            columns, table, id, id
        );
        let rows = self.fetch(&select, &[Value::Integer(last_seen)])?;

        if rows.columns.iter().map(String::as_str).ne(spec.columns.iter().copied()) {
            return Err(PackageError::SchemaMismatch {
                table: spec.name.to_string(),
                message: format!(
                    "expected columns [{}], remote returned [{}]",
                    spec.columns.join(", "),
                    rows.columns.join(", ")
                ),
            });
        }

        let id_index = rows.column_index(spec.id_column).ok_or_else(|| {
            PackageError::SchemaMismatch {
                table: spec.name.to_string(),
                message: format!("missing id column {:?}", spec.id_column),
            }
        })?;

        let insert = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            table,
            columns,
            placeholders(spec.columns.len())
        );
        self.apply(&insert, None, &rows)?;

        let max_id = rows
            .rows
            .iter()
            .filter_map(|row| match row.get(id_index) {
                Some(Value::Integer(id)) => Some(*id),
                _ => None,
            })
            .max();

        if let Some(max_id) = max_id {
            if state.advance(spec.name, max_id) {
                debug!("Watermark for {} moved {} -> {}", spec.name, last_seen, max_id);
            }
        }

        Ok(TableReport {
            table: spec.name.to_string(),
            mode: TableMode::Incremental,
            rows: rows.len(),
            last_seen_id: Some(state.last_seen(spec.name)),
        })
    }

    fn sync_reference(&self, table: &RemoteTable) -> Result<TableReport> {
        let create_sql = table.create_sql.trim();
        let is_create_table = create_sql
            .get(..12)
            .map(|head| head.eq_ignore_ascii_case("CREATE TABLE"))
            .unwrap_or(false);
        if !is_create_table {
            return Err(PackageError::SchemaMismatch {
                table: table.name.clone(),
                message: "remote definition is not a CREATE TABLE statement".to_string(),
            });
        }

        let name = quote_ident(&table.name);
        let rows = self.fetch(&format!("SELECT * FROM {}", name), &[])?;

        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            name,
            column_list(rows.columns.iter().map(String::as_str)),
            placeholders(rows.columns.len())
        );
        let recreate = format!("DROP TABLE IF EXISTS {};\n{};", name, create_sql);
        self.apply(&insert, Some(&recreate), &rows)?;

        Ok(TableReport {
            table: table.name.clone(),
            mode: TableMode::Replaced,
            rows: rows.len(),
            last_seen_id: None,
        })
    }

    /// Write rows in one transaction, optionally running `prelude` first.
    /// Dropping the transaction on any error rolls everything back.
    fn apply(&self, insert: &str, prelude: Option<&str>, rows: &RowSet) -> Result<()> {
        self.local.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if let Some(prelude) = prelude {
                tx.execute_batch(prelude)?;
            }
            if !rows.is_empty() {
                let mut stmt = tx.prepare(insert)?;
                for row in &rows.rows {
                    self.cancel.check()?;
                    stmt.execute(params_from_iter(row.iter()))?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}

fn column_list<'c>(columns: impl Iterator<Item = &'c str>) -> String {
    columns.map(quote_ident).collect::<Vec<_>>().join(", ")
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Options for [`sync_index`]
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Recreate the local replica and refetch everything
    pub force: bool,
    pub cancel: CancelToken,
}

/// Synchronize the workspace's local replica from the configured remote and
/// record the new watermarks in `config`.
///
/// Watermarks are saved only after every table synced; a failure to save them
/// is logged and otherwise ignored, as the next sync refetches a superset.
pub fn sync_index(config: &mut HepswConfig, options: &SyncOptions) -> Result<SyncReport> {
    let path = config.local_index_path();
    let local = if options.force {
        LocalReplica::recreate(&path)?
    } else {
        LocalReplica::open(&path)?
    };

    let remote = open_remote(&config.index).map_err(as_connection_error)?;
    let retry = RetryPolicy::from_config(&config.index);
    with_retry(&retry, &options.cancel, || remote.ping()).map_err(as_connection_error)?;

    let mut state = if options.force {
        SyncState::default()
    } else {
        SyncState::new(config.index.last_seen_ids.clone())
    };

    let report = Synchronizer::new(&local, remote.as_ref())
        .with_retry_policy(retry)
        .with_cancel_token(options.cancel.clone())
        .sync(&mut state)?;

    config.index.last_seen_ids = state.into_map();
    if let Err(e) = config.save() {
        warn!("Index synced but sync progress could not be saved: {}", e);
    }

    info!(
        "Synchronized {} tables ({} rows)",
        report.tables.len(),
        report.total_rows()
    );
    Ok(report)
}

fn as_connection_error(err: PackageError) -> PackageError {
    match err {
        PackageError::Connection { .. }
        | PackageError::Config { .. }
        | PackageError::InvalidValue { .. }
        | PackageError::Cancelled => err,
        other => PackageError::connection(other.to_string()),
    }
}
