//! Package index facade: cached lookups, search and resolution

use crate::cache::Cache;
use crate::config::{HepswConfig, IndexConfig};
use crate::models::{
    is_latest, DependencyEdge, Package, PackageStats, PackageVersion, ReverseDependency,
};
use crate::queries::{IndexSource, Queries};
use crate::resolver::{DependencyNode, DependencyResolver};
use crate::store::LocalReplica;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// Entry point for reading the local package index
pub struct Index {
    queries: Arc<Queries>,
    resolver: DependencyResolver,
    packages: Option<Cache<Package>>,
    versions: Option<Cache<PackageVersion>>,
}

impl Index {
    /// Open the workspace's local replica
    pub fn open(config: &HepswConfig) -> Result<Self> {
        let replica = LocalReplica::open(&config.local_index_path())?;
        Ok(Self::new(Arc::new(replica), &config.index))
    }

    pub fn new(replica: Arc<LocalReplica>, config: &IndexConfig) -> Self {
        let queries = Arc::new(Queries::new(replica));
        let resolver = DependencyResolver::new(queries.clone());

        let (packages, versions) = if config.enable_cache {
            (
                Some(Cache::new(config.cache_ttl())),
                Some(Cache::new(config.cache_ttl())),
            )
        } else {
            (None, None)
        };

        Self {
            queries,
            resolver,
            packages,
            versions,
        }
    }

    pub fn queries(&self) -> &Queries {
        &self.queries
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    /// Check that the local replica answers queries
    pub fn ping(&self) -> Result<()> {
        self.queries
            .replica()
            .with_conn(|conn| Ok(conn.query_row("SELECT 1", [], |_| Ok(()))?))
    }

    /// Package by name, cached under `pkg:<name>`
    pub fn get_package(&self, name: &str) -> Result<Package> {
        let key = format!("pkg:{}", name);
        if let Some(package) = self.packages.as_ref().and_then(|c| c.get(&key)) {
            debug!("Cache hit for {}", key);
            return Ok(package);
        }

        let package = self.queries.get_package_by_name(name)?;
        if let Some(cache) = &self.packages {
            cache.set(key, package.clone());
        }
        Ok(package)
    }

    /// Version of a package, cached under `ver:<name>:<version>`.
    /// `latest` or empty selects the newest available version.
    pub fn get_version(&self, name: &str, version: &str) -> Result<PackageVersion> {
        let key = format!("ver:{}:{}", name, version);
        if let Some(found) = self.versions.as_ref().and_then(|c| c.get(&key)) {
            debug!("Cache hit for {}", key);
            return Ok(found);
        }

        let package = self.get_package(name)?;
        let found = if is_latest(version) {
            self.queries.get_latest_version(package.id)?
        } else {
            self.queries.get_version(package.id, version)?
        };

        if let Some(cache) = &self.versions {
            cache.set(key, found.clone());
        }
        Ok(found)
    }

    pub fn get_latest_version(&self, name: &str) -> Result<PackageVersion> {
        self.get_version(name, "latest")
    }

    /// Every version of a package, newest first
    pub fn get_all_versions(&self, name: &str) -> Result<Vec<PackageVersion>> {
        let package = self.get_package(name)?;
        self.queries.get_versions_by_package(package.id)
    }

    /// Direct dependencies of a package version
    pub fn get_dependencies(&self, name: &str, version: &str) -> Result<Vec<DependencyEdge>> {
        let found = self.get_version(name, version)?;
        self.queries.get_dependencies(found.id)
    }

    pub fn get_reverse_dependencies(&self, name: &str) -> Result<Vec<ReverseDependency>> {
        self.queries.get_reverse_dependencies(name)
    }

    pub fn search_packages(&self, term: &str, exact: bool) -> Result<Vec<Package>> {
        self.queries.search_packages(term, exact)
    }

    pub fn list_packages(&self, limit: usize, offset: usize) -> Result<Vec<Package>> {
        self.queries.list_packages(limit, offset)
    }

    pub fn search_by_tags(&self, tags: &[&str]) -> Result<Vec<Package>> {
        self.queries.search_by_tags(tags)
    }

    pub fn get_package_stats(&self) -> Result<Vec<PackageStats>> {
        self.queries.get_package_stats()
    }

    pub fn resolve_dependency_tree(
        &self,
        name: &str,
        version: &str,
        include_optional: bool,
    ) -> Result<DependencyNode> {
        self.resolver
            .resolve_dependencies(name, version, include_optional)
    }

    /// Required transitive dependencies in first-visit order
    pub fn get_all_dependencies(&self, name: &str, version: &str) -> Result<Vec<String>> {
        self.resolver.get_all_dependencies(name, version)
    }

    pub fn check_circular_dependencies(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<Vec<String>>> {
        self.resolver.check_circular_dependencies(name, version)
    }

    /// Drop every cached lookup
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.packages {
            cache.clear();
        }
        if let Some(cache) = &self.versions {
            cache.clear();
        }
    }

    /// Number of cached lookups
    pub fn cache_size(&self) -> usize {
        self.packages.as_ref().map_or(0, Cache::size)
            + self.versions.as_ref().map_or(0, Cache::size)
    }
}
