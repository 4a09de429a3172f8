//! Typed reads against the local replica

use crate::models::{DependencyEdge, Package, PackageStats, PackageVersion, ReverseDependency};
use crate::store::LocalReplica;
use crate::{PackageError, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::Arc;

/// Lookups the dependency resolver needs from an index
pub trait IndexSource {
    fn get_package_by_name(&self, name: &str) -> Result<Package>;

    fn get_package_by_id(&self, id: i64) -> Result<Package>;

    /// A specific version of a package
    fn get_version(&self, package_id: i64, version: &str) -> Result<PackageVersion>;

    /// Newest version that is neither deprecated nor yanked
    fn get_latest_version(&self, package_id: i64) -> Result<PackageVersion>;

    /// Dependencies of a version: required before optional, then by name
    fn get_dependencies(&self, version_id: i64) -> Result<Vec<DependencyEdge>>;
}

const PACKAGE_COLUMNS: &str =
    "id, name, description, documentation_url, maintainer, tags, created_time, updated_time";

const VERSION_COLUMNS: &str = "id, package_id, version, manifest_url, manifest_hash, source_type, \
     source_url, source_ref, notes, deprecated, yanked, published_at";

/// Query layer over the local replica
#[derive(Clone)]
pub struct Queries {
    replica: Arc<LocalReplica>,
}

impl Queries {
    pub fn new(replica: Arc<LocalReplica>) -> Self {
        Self { replica }
    }

    pub fn replica(&self) -> &Arc<LocalReplica> {
        &self.replica
    }

    /// Packages whose name equals `term`, or contains it
    pub fn search_packages(&self, term: &str, exact: bool) -> Result<Vec<Package>> {
        self.replica.with_conn(|conn| {
            if exact {
                let sql = format!(
                    "SELECT {} FROM packages WHERE name = ?1 ORDER BY name",
                    PACKAGE_COLUMNS
                );
                collect_packages(conn, &sql, &[term.to_string()])
            } else {
                let sql = format!(
                    "SELECT {} FROM packages WHERE name LIKE ?1 ESCAPE '\\' ORDER BY name",
                    PACKAGE_COLUMNS
                );
                collect_packages(conn, &sql, &[contains_pattern(term)])
            }
        })
    }

    /// One page of packages ordered by name
    pub fn list_packages(&self, limit: usize, offset: usize) -> Result<Vec<Package>> {
        let sql = format!(
            "SELECT {} FROM packages ORDER BY name LIMIT ?1 OFFSET ?2",
            PACKAGE_COLUMNS
        );
        self.replica.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let packages = stmt
                .query_map(params![limit as i64, offset as i64], package_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(packages)
        })
    }

    /// Packages carrying any of `tags` (substring match on the tag field)
    pub fn search_by_tags(&self, tags: &[&str]) -> Result<Vec<Package>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }

        let conditions = (1..=tags.len())
            .map(|i| format!("tags LIKE ?{} ESCAPE '\\'", i))
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            "SELECT DISTINCT {} FROM packages WHERE {} ORDER BY name",
            PACKAGE_COLUMNS, conditions
        );
        let patterns: Vec<String> = tags.iter().map(|t| contains_pattern(t)).collect();

        self.replica
            .with_conn(|conn| collect_packages(conn, &sql, &patterns))
    }

    /// Every version of a package, newest first, unavailable ones included
    pub fn get_versions_by_package(&self, package_id: i64) -> Result<Vec<PackageVersion>> {
        let sql = format!(
            "SELECT {} FROM versions WHERE package_id = ?1 ORDER BY published_at DESC, id DESC",
            VERSION_COLUMNS
        );
        self.replica.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let versions = stmt
                .query_map([package_id], version_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(versions)
        })
    }

    /// Package versions that declare a dependency on `dependency_name`
    pub fn get_reverse_dependencies(&self, dependency_name: &str) -> Result<Vec<ReverseDependency>> {
        self.replica.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT d.dependency_name, p.name, v.version, d.version_constraint, d.optional
                 FROM dependencies d
                 JOIN versions v ON d.version_id = v.id
                 JOIN packages p ON v.package_id = p.id
                 WHERE d.dependency_name = ?1
                 ORDER BY p.name, v.version",
            )?;
            let dependents = stmt
                .query_map([dependency_name], |row| {
                    Ok(ReverseDependency {
                        dependency_name: row.get(0)?,
                        dependent_package: row.get(1)?,
                        dependent_version: row.get(2)?,
                        version_constraint: row.get(3)?,
                        optional: row.get(4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(dependents)
        })
    }

    /// Version count and latest release per package, ordered by name
    pub fn get_package_stats(&self) -> Result<Vec<PackageStats>> {
        self.replica.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, p.name, p.description, COUNT(v.id), MAX(v.published_at)
                 FROM packages p
                 LEFT JOIN versions v ON p.id = v.package_id
                 GROUP BY p.id, p.name, p.description
                 ORDER BY p.name",
            )?;
            let stats = stmt
                .query_map([], |row| {
                    Ok(PackageStats {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        version_count: row.get(3)?,
                        latest_release: row.get(4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(stats)
        })
    }

    /// Name of a package for error messages, falling back to its id
    fn package_label(conn: &Connection, package_id: i64) -> String {
        conn.query_row(
            "SELECT name FROM packages WHERE id = ?1",
            [package_id],
            |row| row.get::<_, String>(0),
        )
        .unwrap_or_else(|_| format!("#{}", package_id))
    }
}

impl IndexSource for Queries {
    fn get_package_by_name(&self, name: &str) -> Result<Package> {
        let sql = format!("SELECT {} FROM packages WHERE name = ?1", PACKAGE_COLUMNS);
        self.replica.with_conn(|conn| {
            conn.query_row(&sql, [name], package_from_row)
                .optional()?
                .ok_or_else(|| PackageError::PackageNotFound {
                    name: name.to_string(),
                })
        })
    }

    fn get_package_by_id(&self, id: i64) -> Result<Package> {
        let sql = format!("SELECT {} FROM packages WHERE id = ?1", PACKAGE_COLUMNS);
        self.replica.with_conn(|conn| {
            conn.query_row(&sql, [id], package_from_row)
                .optional()?
                .ok_or(PackageError::PackageIdNotFound { id })
        })
    }

    fn get_version(&self, package_id: i64, version: &str) -> Result<PackageVersion> {
        let sql = format!(
            "SELECT {} FROM versions WHERE package_id = ?1 AND version = ?2",
            VERSION_COLUMNS
        );
        self.replica.with_conn(|conn| {
            conn.query_row(&sql, params![package_id, version], version_from_row)
                .optional()?
                .ok_or_else(|| PackageError::VersionNotFound {
                    package: Self::package_label(conn, package_id),
                    version: version.to_string(),
                })
        })
    }

    fn get_latest_version(&self, package_id: i64) -> Result<PackageVersion> {
        let sql = format!(
            "SELECT {} FROM versions
             WHERE package_id = ?1 AND deprecated = 0 AND yanked = 0
             ORDER BY published_at DESC, id DESC
             LIMIT 1",
            VERSION_COLUMNS
        );
        self.replica.with_conn(|conn| {
            conn.query_row(&sql, [package_id], version_from_row)
                .optional()?
                .ok_or_else(|| PackageError::NoAvailableVersion {
                    package: Self::package_label(conn, package_id),
                })
        })
    }

    fn get_dependencies(&self, version_id: i64) -> Result<Vec<DependencyEdge>> {
        self.replica.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, version_id, dependency_name, dependency_package_id,
                        version_constraint, optional, condition
                 FROM dependencies
                 WHERE version_id = ?1
                 ORDER BY optional, dependency_name",
            )?;
            let edges = stmt
                .query_map([version_id], |row| {
                    Ok(DependencyEdge {
                        id: row.get(0)?,
                        version_id: row.get(1)?,
                        dependency_name: row.get(2)?,
                        dependency_package_id: row.get(3)?,
                        version_constraint: row.get(4)?,
                        optional: row.get(5)?,
                        condition: row.get(6)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(edges)
        })
    }
}

fn collect_packages(conn: &Connection, sql: &str, args: &[String]) -> Result<Vec<Package>> {
    let mut stmt = conn.prepare(sql)?;
    let packages = stmt
        .query_map(params_from_iter(args.iter()), package_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(packages)
}

/// LIKE pattern matching `term` anywhere, with wildcards in `term` escaped
fn contains_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn package_from_row(row: &Row<'_>) -> rusqlite::Result<Package> {
    Ok(Package {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        documentation_url: row.get(3)?,
        maintainer: row.get(4)?,
        tags: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        created_time: row.get(6)?,
        updated_time: row.get(7)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<PackageVersion> {
    Ok(PackageVersion {
        id: row.get(0)?,
        package_id: row.get(1)?,
        version: row.get(2)?,
        manifest_url: row.get(3)?,
        manifest_hash: row.get(4)?,
        source_type: row.get(5)?,
        source_url: row.get(6)?,
        source_ref: row.get(7)?,
        notes: row.get(8)?,
        deprecated: row.get(9)?,
        yanked: row.get(10)?,
        published_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Queries {
        let replica = LocalReplica::open_in_memory().unwrap();
        replica
            .with_conn(|conn| {
                conn.execute_batch(
                    "
                    INSERT INTO packages (id, name, description, documentation_url, maintainer, tags) VALUES
                        (1, 'root', 'CERN ROOT Data Analysis Framework', 'https://root.cern/', 'hepsw-team', 'hep,analysis,cern'),
                        (2, 'geant4', 'Detector simulation toolkit', NULL, NULL, 'hep,simulation'),
                        (3, 'cmake', 'Build system generator', NULL, NULL, 'build'),
                        (4, 'root_legacy', 'Old ROOT', NULL, NULL, NULL);

                    INSERT INTO versions (id, package_id, version, manifest_url, manifest_hash,
                                          source_type, source_url, deprecated, yanked, published_at) VALUES
                        (1, 1, '6.28.00', 'https://m/root-6.28.yaml', 'h1', 'git', 'https://g/root', 0, 0, '2023-02-01 00:00:00'),
                        (2, 1, '6.30.02', 'https://m/root-6.30.yaml', 'h2', 'git', 'https://g/root', 0, 0, '2024-01-10 00:00:00'),
                        (3, 1, '6.32.00', 'https://m/root-6.32.yaml', 'h3', 'git', 'https://g/root', 0, 1, '2024-06-01 00:00:00'),
                        (4, 2, '11.2.0', 'https://m/g4.yaml', 'h4', 'tarball', 'https://g/g4.tgz', 1, 0, '2024-01-01 00:00:00');

                    INSERT INTO dependencies (id, version_id, dependency_name, dependency_package_id,
                                              version_constraint, optional, condition) VALUES
                        (1, 2, 'python', NULL, '>=3.8', 1, 'OPTIONS_PYTHON'),
                        (2, 2, 'gcc', NULL, '>=9.0', 0, NULL),
                        (3, 2, 'cmake', 3, '>=3.20', 0, NULL),
                        (4, 4, 'cmake', 3, '>=3.16', 0, NULL);
                    ",
                )?;
                Ok(())
            })
            .unwrap();
        Queries::new(Arc::new(replica))
    }

    #[test]
    fn test_package_lookups() {
        let queries = seeded();
        let root = queries.get_package_by_name("root").unwrap();
        assert_eq!(root.id, 1);
        assert_eq!(root.tags(), vec!["hep", "analysis", "cern"]);
        assert_eq!(queries.get_package_by_id(2).unwrap().name, "geant4");

        let err = queries.get_package_by_name("pythia8").unwrap_err();
        assert!(err.is_not_found());
        assert!(queries.get_package_by_id(99).unwrap_err().is_not_found());
    }

    #[test]
    fn test_search_packages() {
        let queries = seeded();
        let exact = queries.search_packages("root", true).unwrap();
        assert_eq!(exact.len(), 1);

        let names: Vec<_> = queries
            .search_packages("root", false)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["root", "root_legacy"]);

        // `_` is literal, not a wildcard
        assert!(queries.search_packages("t_l", false).unwrap().len() == 1);
        assert!(queries.search_packages("o_t", false).unwrap().is_empty());
    }

    #[test]
    fn test_list_and_tags() {
        let queries = seeded();
        let page: Vec<_> = queries
            .list_packages(2, 1)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(page, vec!["geant4", "root"]);

        let tagged = queries.search_by_tags(&["simulation", "build"]).unwrap();
        assert_eq!(tagged.len(), 2);
        assert!(queries.search_by_tags(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_latest_version_skips_unavailable() {
        let queries = seeded();
        let latest = queries.get_latest_version(1).unwrap();
        assert_eq!(latest.version, "6.30.02");

        let all = queries.get_versions_by_package(1).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].version, "6.32.00");

        match queries.get_latest_version(2) {
            Err(PackageError::NoAvailableVersion { package }) => assert_eq!(package, "geant4"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_get_version() {
        let queries = seeded();
        assert_eq!(queries.get_version(1, "6.28.00").unwrap().id, 1);
        match queries.get_version(1, "5.34") {
            Err(PackageError::VersionNotFound { package, version }) => {
                assert_eq!(package, "root");
                assert_eq!(version, "5.34");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_dependencies_order_and_reverse() {
        let queries = seeded();
        let names: Vec<_> = queries
            .get_dependencies(2)
            .unwrap()
            .into_iter()
            .map(|d| d.dependency_name)
            .collect();
        assert_eq!(names, vec!["cmake", "gcc", "python"]);

        let dependents = queries.get_reverse_dependencies("cmake").unwrap();
        assert_eq!(dependents.len(), 2);
        assert_eq!(dependents[0].dependent_package, "geant4");
        assert_eq!(dependents[1].dependent_version, "6.30.02");
    }

    #[test]
    fn test_package_stats() {
        let queries = seeded();
        let stats = queries.get_package_stats().unwrap();
        assert_eq!(stats.len(), 4);

        let root = stats.iter().find(|s| s.name == "root").unwrap();
        assert_eq!(root.version_count, 3);
        assert!(root.latest_release.is_some());

        let cmake = stats.iter().find(|s| s.name == "cmake").unwrap();
        assert_eq!(cmake.version_count, 0);
        assert!(cmake.latest_release.is_none());
    }
}
