//! Local replica schema migrations
//!
//! Each migration moves the replica schema up by exactly one version. The
//! applied version is recorded in `schema_version`, so opening an existing
//! replica only runs the migrations it has not seen yet.

use crate::Result;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

/// Latest schema version known to this build
pub const SCHEMA_VERSION: i64 = 2;

type Migration = fn(&Connection) -> Result<()>;

const MIGRATIONS: [Migration; 2] = [migrate_v1, migrate_v2];

/// Bring the schema up to [`SCHEMA_VERSION`]
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )?;

    let current = current_version(conn)?;
    if current >= SCHEMA_VERSION {
        debug!("Local index schema is at version {}", current);
        return Ok(());
    }

    for (index, migration) in MIGRATIONS.iter().enumerate() {
        let version = index as i64 + 1;
        if version <= current {
            continue;
        }

        let tx = conn.transaction()?;
        migration(&tx)?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![version],
        )?;
        tx.commit()?;
        info!("Migrated local index schema to version {}", version);
    }

    Ok(())
}

/// Highest applied schema version, 0 for a fresh store
pub fn current_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i64>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);
    Ok(version)
}

/// Version 1: packages, versions and dependencies.
///
/// Foreign keys are not declared. Rows of each table arrive independently and
/// an upsert replaces the old row, which must not cascade into other tables.
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS packages (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            documentation_url TEXT,
            maintainer TEXT,
            tags TEXT,
            created_time TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_time TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS versions (
            id INTEGER PRIMARY KEY,
            package_id INTEGER NOT NULL,
            version TEXT NOT NULL,
            manifest_url TEXT NOT NULL,
            manifest_hash TEXT NOT NULL,
            source_type TEXT NOT NULL,
            source_url TEXT NOT NULL,
            source_ref TEXT,
            notes TEXT,
            deprecated INTEGER NOT NULL DEFAULT 0,
            yanked INTEGER NOT NULL DEFAULT 0,
            published_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS dependencies (
            id INTEGER PRIMARY KEY,
            version_id INTEGER NOT NULL,
            dependency_name TEXT NOT NULL,
            dependency_package_id INTEGER,
            version_constraint TEXT NOT NULL DEFAULT '',
            optional INTEGER NOT NULL DEFAULT 0,
            condition TEXT
        );
        ",
    )?;

    Ok(())
}

/// Version 2: lookup indexes for the query layer
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 2");

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_versions_package_id ON versions(package_id);
        CREATE INDEX IF NOT EXISTS idx_versions_published_at ON versions(published_at);
        CREATE INDEX IF NOT EXISTS idx_dependencies_version_id ON dependencies(version_id);
        CREATE INDEX IF NOT EXISTS idx_dependencies_name ON dependencies(dependency_name);
        ",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_fresh_store() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('packages', 'versions', 'dependencies')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }

    #[test]
    fn test_migrate_is_repeatable() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, SCHEMA_VERSION);
    }
}
