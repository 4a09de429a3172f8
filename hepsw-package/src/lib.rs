//! HepSW package index
//!
//! This crate provides the package index for the HepSW software stack, including:
//! - Incremental synchronization of a local index replica from a remote database
//! - Typed queries over packages, versions and dependency edges
//! - Dependency tree resolution, flattening and cycle checks
//! - Build manifest access, option filtering, validation and recipe walks

pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod manifest;
pub mod models;
pub mod queries;
pub mod remote;
pub mod resolver;
pub mod retry;
pub mod store;
pub mod sync;
pub mod version;

pub use cache::Cache;
pub use config::{HepswConfig, IndexConfig, UserConfig};
pub use error::{PackageError, Result};
pub use index::Index;
pub use manifest::{Manifest, ManifestAccessor};
pub use models::{
    DependencyEdge, Package, PackageSpecifier, PackageStats, PackageVersion, ReverseDependency,
    SourceType,
};
pub use queries::{IndexSource, Queries};
pub use remote::RemoteStore;
pub use resolver::{DependencyNode, DependencyResolver};
pub use retry::{CancelToken, RetryPolicy};
pub use store::LocalReplica;
pub use sync::{sync_index, SyncOptions, SyncReport, SyncState, Synchronizer};
pub use version::{Version, VersionReq};
