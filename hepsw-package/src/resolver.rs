//! Dependency tree resolution over the package index

use crate::models::{is_latest, DependencyEdge, Package, PackageVersion};
use crate::queries::IndexSource;
use crate::{PackageError, Result};
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Default ceiling on resolution depth
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// A node of a resolved dependency tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyNode {
    /// Package name
    pub package: String,

    /// Resolved version, empty when unresolved
    pub version: String,

    /// Constraint declared by the parent
    #[serde(skip_serializing_if = "String::is_empty")]
    pub constraint: String,

    pub optional: bool,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DependencyNode>,

    pub depth: usize,
}

impl DependencyNode {
    fn leaf(edge: &DependencyEdge, depth: usize) -> Self {
        Self {
            package: edge.dependency_name.clone(),
            version: String::new(),
            constraint: edge.version_constraint.clone(),
            optional: edge.optional,
            children: Vec::new(),
            depth,
        }
    }

    /// Whether a version was found for this node
    pub fn is_resolved(&self) -> bool {
        !self.version.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Key identifying this dependency during traversal
    pub fn key(&self) -> String {
        format!("{}@{}", self.package, self.constraint)
    }

    /// Number of nodes in the tree, root included
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}

/// Node under construction, children referenced by arena index
struct ArenaEntry {
    node: DependencyNode,
    children: Vec<usize>,
}

/// Pending expansion of one resolved node
struct Frame {
    node: usize,
    depth: usize,
    deps: Vec<DependencyEdge>,
    next: usize,
}

/// Pending expansion during cycle detection
struct CycleFrame {
    name: String,
    deps: Vec<DependencyEdge>,
    next: usize,
}

/// Dependency resolver
pub struct DependencyResolver {
    /// Index to resolve against
    source: Arc<dyn IndexSource + Send + Sync>,

    max_depth: usize,
}

impl DependencyResolver {
    /// Create a new dependency resolver
    pub fn new(source: Arc<dyn IndexSource + Send + Sync>) -> Self {
        Self {
            source,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Resolve a package and version selector; `latest` or empty picks the
    /// newest available version
    pub fn resolve_version(&self, name: &str, version: &str) -> Result<(Package, PackageVersion)> {
        let package = self.source.get_package_by_name(name)?;
        let version = if is_latest(version) {
            self.source.get_latest_version(package.id)?
        } else {
            self.source.get_version(package.id, version)?
        };
        Ok((package, version))
    }

    /// Latest available version of an indexed dependency
    fn resolve_indexed(&self, package_id: i64) -> Result<PackageVersion> {
        let package = self.source.get_package_by_id(package_id)?;
        self.source.get_latest_version(package.id)
    }

    /// Build the dependency tree of `name` at `version`.
    ///
    /// Each `name@constraint` key is expanded once per call; later occurrences
    /// become leaves. Dependencies that are not indexed, or whose package has
    /// no available version, are kept as unresolved leaves.
    pub fn resolve_dependencies(
        &self,
        name: &str,
        version: &str,
        include_optional: bool,
    ) -> Result<DependencyNode> {
        let (package, root_version) = self.resolve_version(name, version)?;
        debug!("Resolving dependencies of {}@{}", package.name, root_version.version);

        let mut arena = vec![ArenaEntry {
            node: DependencyNode {
                package: package.name.clone(),
                version: root_version.version.clone(),
                constraint: String::new(),
                optional: false,
                children: Vec::new(),
                depth: 0,
            },
            children: Vec::new(),
        }];
        let mut visited = FxHashSet::default();
        let mut stack = vec![Frame {
            node: 0,
            depth: 0,
            deps: self.source.get_dependencies(root_version.id)?,
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(edge) = frame.deps.get(frame.next).cloned() else {
                stack.pop();
                continue;
            };
            frame.next += 1;
            let (parent, child_depth) = (frame.node, frame.depth + 1);

            if edge.optional && !include_optional {
                continue;
            }

            let child = arena.len();
            arena.push(ArenaEntry {
                node: DependencyNode::leaf(&edge, child_depth),
                children: Vec::new(),
            });
            arena[parent].children.push(child);

            if !visited.insert(edge.visit_key()) {
                continue;
            }

            let Some(package_id) = edge.dependency_package_id else {
                continue;
            };

            let resolved = match self.resolve_indexed(package_id) {
                Ok(resolved) => resolved,
                Err(e) if e.is_not_found() => {
                    debug!("Leaving {} unresolved: {}", edge.dependency_name, e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if child_depth > self.max_depth {
                return Err(PackageError::DepthLimitExceeded {
                    package: edge.dependency_name,
                    limit: self.max_depth,
                });
            }

            arena[child].node.version = resolved.version;
            stack.push(Frame {
                node: child,
                depth: child_depth,
                deps: self.source.get_dependencies(resolved.id)?,
                next: 0,
            });
        }

        Ok(assemble(arena))
    }

    /// Resolve without optional dependencies and flatten the tree
    pub fn get_all_dependencies(&self, name: &str, version: &str) -> Result<Vec<String>> {
        let tree = self.resolve_dependencies(name, version, false)?;
        Ok(flatten_dependencies(&tree))
    }

    /// Look for a cycle of required dependencies starting at `name`.
    ///
    /// Returns the path from the root to the first repeated package. Optional
    /// dependencies are ignored; a package reached twice through different
    /// branches is not a cycle.
    pub fn check_circular_dependencies(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<Vec<String>>> {
        let (package, root_version) = self.resolve_version(name, version)?;

        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut in_path: FxHashSet<String> = FxHashSet::default();
        in_path.insert(package.name.clone());

        let mut stack = vec![CycleFrame {
            name: package.name,
            deps: self.source.get_dependencies(root_version.id)?,
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(edge) = frame.deps.get(frame.next).cloned() else {
                if let Some(done) = stack.pop() {
                    in_path.remove(&done.name);
                }
                continue;
            };
            frame.next += 1;

            if edge.optional {
                continue;
            }

            let dep_name = edge.dependency_name;
            if in_path.contains(&dep_name) {
                let mut path: Vec<String> = stack.iter().map(|f| f.name.clone()).collect();
                path.push(dep_name);
                return Ok(Some(path));
            }

            if visited.contains(&dep_name) {
                continue;
            }

            let Some(package_id) = edge.dependency_package_id else {
                continue;
            };

            let resolved = match self.resolve_indexed(package_id) {
                Ok(resolved) => resolved,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };

            visited.insert(dep_name.clone());
            in_path.insert(dep_name.clone());
            stack.push(CycleFrame {
                name: dep_name,
                deps: self.source.get_dependencies(resolved.id)?,
                next: 0,
            });
        }

        Ok(None)
    }
}

/// Turn the arena into an owned tree. Children always sit after their parent.
fn assemble(arena: Vec<ArenaEntry>) -> DependencyNode {
    let mut built: Vec<Option<DependencyNode>> = Vec::with_capacity(arena.len());
    built.resize_with(arena.len(), || None);

    let mut root = None;
    for (index, entry) in arena.into_iter().enumerate().rev() {
        let mut node = entry.node;
        node.children = entry
            .children
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        if index == 0 {
            root = Some(node);
        } else {
            built[index] = Some(node);
        }
    }

    root.unwrap_or_else(|| DependencyNode {
        package: String::new(),
        version: String::new(),
        constraint: String::new(),
        optional: false,
        children: Vec::new(),
        depth: 0,
    })
}

/// Package names in first-visit depth-first order, one per distinct
/// `name@constraint`, root excluded
pub fn flatten_dependencies(root: &DependencyNode) -> Vec<String> {
    let mut seen = FxHashSet::default();
    let mut result = Vec::new();
    let mut stack: Vec<(&DependencyNode, usize)> = vec![(root, 0)];

    while let Some((node, next)) = stack.last_mut() {
        let node: &DependencyNode = *node;
        let Some(child) = node.children.get(*next) else {
            stack.pop();
            continue;
        };
        *next += 1;

        if seen.insert(child.key()) {
            result.push(child.package.clone());
            stack.push((child, 0));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;
    use chrono::Utc;
    use rustc_hash::FxHashMap;

    /// In-memory index where every package has one version with the same id
    #[derive(Default)]
    struct FakeIndex {
        packages: FxHashMap<String, Package>,
        unavailable: FxHashSet<i64>,
        deps: Vec<DependencyEdge>,
    }

    impl FakeIndex {
        fn add(&mut self, name: &str) -> i64 {
            let id = self.packages.len() as i64 + 1;
            self.packages.insert(
                name.to_string(),
                Package {
                    id,
                    name: name.to_string(),
                    description: String::new(),
                    documentation_url: None,
                    maintainer: None,
                    tags: String::new(),
                    created_time: Utc::now(),
                    updated_time: Utc::now(),
                },
            );
            id
        }

        fn id(&self, name: &str) -> i64 {
            self.packages[name].id
        }

        fn depend(&mut self, from: &str, to: &str, constraint: &str, optional: bool) {
            let target = self.packages.get(to).map(|p| p.id);
            self.deps.push(DependencyEdge {
                id: self.deps.len() as i64 + 1,
                version_id: self.id(from),
                dependency_name: to.to_string(),
                dependency_package_id: target,
                version_constraint: constraint.to_string(),
                optional,
                condition: None,
            });
        }

        fn version(&self, package_id: i64) -> PackageVersion {
            PackageVersion {
                id: package_id,
                package_id,
                version: format!("{}.0.0", package_id),
                manifest_url: String::new(),
                manifest_hash: String::new(),
                source_type: SourceType::Git,
                source_url: String::new(),
                source_ref: None,
                notes: None,
                deprecated: false,
                yanked: self.unavailable.contains(&package_id),
                published_at: Utc::now(),
            }
        }
    }

    impl IndexSource for FakeIndex {
        fn get_package_by_name(&self, name: &str) -> Result<Package> {
            self.packages
                .get(name)
                .cloned()
                .ok_or_else(|| PackageError::PackageNotFound {
                    name: name.to_string(),
                })
        }

        fn get_package_by_id(&self, id: i64) -> Result<Package> {
            self.packages
                .values()
                .find(|p| p.id == id)
                .cloned()
                .ok_or(PackageError::PackageIdNotFound { id })
        }

        fn get_version(&self, package_id: i64, version: &str) -> Result<PackageVersion> {
            let v = self.version(package_id);
            if v.version == version {
                Ok(v)
            } else {
                Err(PackageError::VersionNotFound {
                    package: package_id.to_string(),
                    version: version.to_string(),
                })
            }
        }

        fn get_latest_version(&self, package_id: i64) -> Result<PackageVersion> {
            let v = self.version(package_id);
            if v.is_available() {
                Ok(v)
            } else {
                Err(PackageError::NoAvailableVersion {
                    package: package_id.to_string(),
                })
            }
        }

        fn get_dependencies(&self, version_id: i64) -> Result<Vec<DependencyEdge>> {
            Ok(self
                .deps
                .iter()
                .filter(|d| d.version_id == version_id)
                .cloned()
                .collect())
        }
    }

    fn resolver(index: FakeIndex) -> DependencyResolver {
        DependencyResolver::new(Arc::new(index))
    }

    #[test]
    fn test_diamond_expands_shared_dependency_once() {
        let mut index = FakeIndex::default();
        for name in ["a", "b", "c", "d"] {
            index.add(name);
        }
        index.depend("a", "b", ">=1", false);
        index.depend("a", "c", ">=1", false);
        index.depend("b", "d", ">=1", false);
        index.depend("c", "d", ">=1", false);
        index.depend("d", "e", ">=1", false);

        let resolver = resolver(index);
        let tree = resolver.resolve_dependencies("a", "latest", false).unwrap();

        let b = &tree.children[0];
        let c = &tree.children[1];
        assert_eq!(b.children[0].package, "d");
        assert_eq!(b.children[0].children.len(), 1);
        // Second occurrence of d@>=1 is a leaf
        assert_eq!(c.children[0].package, "d");
        assert!(c.children[0].is_leaf());
        assert!(!c.children[0].is_resolved());

        assert_eq!(flatten_dependencies(&tree), vec!["b", "d", "e", "c"]);
        assert_eq!(tree.node_count(), 6);
    }

    #[test]
    fn test_distinct_constraints_are_tracked_separately() {
        let mut index = FakeIndex::default();
        for name in ["app", "lib", "zlib"] {
            index.add(name);
        }
        index.depend("app", "zlib", ">=1.2", false);
        index.depend("app", "lib", "*", false);
        index.depend("lib", "zlib", ">=1.3", false);

        let tree = resolver(index)
            .resolve_dependencies("app", "", false)
            .unwrap();
        assert_eq!(flatten_dependencies(&tree), vec!["zlib", "lib", "zlib"]);
        assert!(tree.children[1].children[0].is_resolved());
    }

    #[test]
    fn test_root_with_unindexed_dependencies() {
        let mut index = FakeIndex::default();
        let root = index.add("root");
        index.depend("root", "cmake", ">=3.20", false);
        index.depend("root", "gcc", ">=9.0", false);
        index.depend("root", "python", ">=3.8", false);
        let root_version = index.version(root).version;

        let tree = resolver(index)
            .resolve_dependencies("root", &root_version, false)
            .unwrap();

        assert_eq!(tree.version, root_version);
        assert_eq!(tree.depth, 0);
        assert_eq!(tree.children.len(), 3);
        for child in &tree.children {
            assert_eq!(child.depth, 1);
            assert!(child.is_leaf());
            assert!(!child.is_resolved());
        }
    }

    #[test]
    fn test_optional_dependencies_are_filtered() {
        let mut index = FakeIndex::default();
        index.add("geant4");
        index.add("qt5");
        index.depend("geant4", "qt5", ">=5.15", true);
        index.depend("geant4", "xerces-c", ">=3.2", false);
        let resolver = resolver(index);

        let without = resolver.resolve_dependencies("geant4", "latest", false).unwrap();
        assert_eq!(flatten_dependencies(&without), vec!["xerces-c"]);

        let with = resolver.resolve_dependencies("geant4", "latest", true).unwrap();
        assert_eq!(with.children.len(), 2);
        assert!(with.children.iter().any(|c| c.optional && c.is_resolved()));
    }

    #[test]
    fn test_unavailable_dependency_is_unresolved_leaf() {
        let mut index = FakeIndex::default();
        index.add("root");
        let vdt = index.add("vdt");
        index.unavailable.insert(vdt);
        index.depend("root", "vdt", ">=0.4", false);

        let tree = resolver(index)
            .resolve_dependencies("root", "latest", false)
            .unwrap();
        assert_eq!(tree.children.len(), 1);
        assert!(!tree.children[0].is_resolved());
    }

    #[test]
    fn test_missing_root_is_not_found() {
        let index = FakeIndex::default();
        let err = resolver(index)
            .resolve_dependencies("pythia8", "latest", false)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_depth_limit() {
        let mut index = FakeIndex::default();
        let names = ["p0", "p1", "p2", "p3", "p4"];
        for name in names {
            index.add(name);
        }
        for pair in names.windows(2) {
            index.depend(pair[0], pair[1], "*", false);
        }

        let resolver = resolver(index).with_max_depth(2);
        match resolver.resolve_dependencies("p0", "latest", false) {
            Err(PackageError::DepthLimitExceeded { package, limit }) => {
                assert_eq!(package, "p3");
                assert_eq!(limit, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    fn chain(len: usize) -> FakeIndex {
        let mut index = FakeIndex::default();
        for i in 0..len {
            index.add(&format!("p{}", i));
        }
        for i in 1..len {
            index.depend(&format!("p{}", i - 1), &format!("p{}", i), "*", false);
        }
        index
    }

    #[test]
    fn test_default_depth_ceiling() {
        // p0 at depth 0 down to p100 at depth 100
        let tree = resolver(chain(DEFAULT_MAX_DEPTH + 1))
            .resolve_dependencies("p0", "latest", false)
            .unwrap();
        let mut node = &tree;
        while let Some(child) = node.children.first() {
            node = child;
        }
        assert_eq!(node.package, format!("p{}", DEFAULT_MAX_DEPTH));
        assert_eq!(node.depth, DEFAULT_MAX_DEPTH);
        assert!(node.is_resolved());

        match resolver(chain(DEFAULT_MAX_DEPTH + 2)).resolve_dependencies("p0", "latest", false) {
            Err(PackageError::DepthLimitExceeded { package, limit }) => {
                assert_eq!(package, format!("p{}", DEFAULT_MAX_DEPTH + 1));
                assert_eq!(limit, DEFAULT_MAX_DEPTH);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_cycle_detection() {
        let mut index = FakeIndex::default();
        index.add("a");
        index.add("b");
        index.depend("a", "b", ">=1", false);
        index.depend("b", "a", ">=1", false);

        let path = resolver(index)
            .check_circular_dependencies("a", "latest")
            .unwrap();
        assert_eq!(path, Some(vec!["a".to_string(), "b".to_string(), "a".to_string()]));
    }

    #[test]
    fn test_optional_edge_breaks_cycle() {
        let mut index = FakeIndex::default();
        index.add("a");
        index.add("b");
        index.depend("a", "b", ">=1", true);
        index.depend("b", "a", ">=1", false);

        let path = resolver(index)
            .check_circular_dependencies("a", "latest")
            .unwrap();
        assert_eq!(path, None);
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let mut index = FakeIndex::default();
        for name in ["a", "b", "c", "d"] {
            index.add(name);
        }
        index.depend("a", "b", "*", false);
        index.depend("a", "c", "*", false);
        index.depend("b", "d", "*", false);
        index.depend("c", "d", "*", false);

        let resolver = resolver(index);
        assert_eq!(resolver.check_circular_dependencies("a", "latest").unwrap(), None);
        assert!(resolver.resolve_dependencies("a", "latest", true).is_ok());
    }
}
