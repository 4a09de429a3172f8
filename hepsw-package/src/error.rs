//! Package index error types

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PackageError>;

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Package not found: {name}")]
    PackageNotFound { name: String },

    #[error("Package with id {id} not found")]
    PackageIdNotFound { id: i64 },

    #[error("Version not found: {package}@{version}")]
    VersionNotFound { package: String, version: String },

    #[error("No available version found for {package}")]
    NoAvailableVersion { package: String },

    #[error("Cannot connect to remote index: {message}\n  hint: {hint}")]
    Connection { message: String, hint: String },

    #[error("Remote index error: {message}")]
    Remote { message: String },

    #[error("Local index error: {message}\n  hint: {hint}")]
    LocalStore { message: String, hint: String },

    #[error("Schema mismatch in table {table}: {message}")]
    SchemaMismatch { table: String, message: String },

    #[error("Failed to sync table {table:?}: {source}")]
    TableSync {
        table: String,
        #[source]
        source: Box<PackageError>,
    },

    #[error("Dependency depth limit of {limit} exceeded while resolving {package} (possible circular dependency)")]
    DepthLimitExceeded { package: String, limit: usize },

    #[error("Checksum mismatch for {package}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        package: String,
        expected: String,
        actual: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Maximum retries exceeded after {attempts} attempts: {last}")]
    MaxRetriesExceeded {
        attempts: u32,
        last: Box<PackageError>,
    },

    #[error("Invalid manifest at {path}: {message}")]
    InvalidManifest { path: PathBuf, message: String },

    #[error("Manifest {name} failed validation: {errors} error(s), {warnings} warning(s)")]
    ValidationFailed {
        name: String,
        errors: usize,
        warnings: usize,
    },

    #[error("Invalid {kind}: {value}")]
    InvalidValue { kind: &'static str, value: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl PackageError {
    /// Whether this error means the requested entity is absent.
    ///
    /// Not-found errors are never retried and resolve to unresolved leaves in
    /// the dependency tree rather than aborting resolution.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PackageError::PackageNotFound { .. }
                | PackageError::PackageIdNotFound { .. }
                | PackageError::VersionNotFound { .. }
                | PackageError::NoAvailableVersion { .. }
        )
    }

    /// Wrap an error with the table it occurred in.
    pub fn in_table(self, table: &str) -> Self {
        match self {
            PackageError::Cancelled => PackageError::Cancelled,
            other => PackageError::TableSync {
                table: table.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn connection(message: impl Into<String>) -> Self {
        PackageError::Connection {
            message: message.into(),
            hint: "check your internet connection or auth token".to_string(),
        }
    }

    pub(crate) fn local_store(message: impl Into<String>) -> Self {
        PackageError::LocalStore {
            message: message.into(),
            hint: "run `hepsw sync --force` to recreate the local index".to_string(),
        }
    }
}
