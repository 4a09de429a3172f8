//! Index records: packages, versions and dependency edges

use crate::{PackageError, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Version selector meaning "latest available"
pub const LATEST: &str = "latest";

/// A named software unit in the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: i64,

    /// Unique, lowercase alphanumeric with hyphens
    pub name: String,

    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<String>,

    /// Comma-separated tags
    #[serde(default)]
    pub tags: String,

    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

impl Package {
    /// Tags in declaration order, empty segments skipped
    pub fn tags(&self) -> Vec<&str> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().iter().any(|t| *t == tag)
    }
}

/// Where a version's source code comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Git,
    Tarball,
    Svn,
    Url,
    Local,
}

impl SourceType {
    pub const ALL: [SourceType; 5] = [
        SourceType::Git,
        SourceType::Tarball,
        SourceType::Svn,
        SourceType::Url,
        SourceType::Local,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Git => "git",
            SourceType::Tarball => "tarball",
            SourceType::Svn => "svn",
            SourceType::Url => "url",
            SourceType::Local => "local",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self> {
        SourceType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PackageError::InvalidValue {
                kind: "source type",
                value: s.to_string(),
            })
    }
}

impl FromSql for SourceType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for SourceType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// One release of a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersion {
    pub id: i64,
    pub package_id: i64,
    pub version: String,
    pub manifest_url: String,

    /// SHA-256 of the manifest, bare hex or `sha256:<hex>`
    pub manifest_hash: String,

    pub source_type: SourceType,
    pub source_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    pub deprecated: bool,
    pub yanked: bool,
    pub published_at: DateTime<Utc>,
}

impl PackageVersion {
    /// Neither deprecated nor yanked
    pub fn is_available(&self) -> bool {
        !self.deprecated && !self.yanked
    }

    /// Check manifest content against the recorded hash
    pub fn verify_manifest(&self, content: &[u8]) -> Result<()> {
        let expected = self
            .manifest_hash
            .strip_prefix("sha256:")
            .unwrap_or(&self.manifest_hash)
            .to_ascii_lowercase();
        let actual = hex::encode(Sha256::digest(content));

        if actual != expected {
            return Err(PackageError::ChecksumMismatch {
                package: format!("manifest {}", self.manifest_url),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

/// Edge from a version to a package it requires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub id: i64,
    pub version_id: i64,
    pub dependency_name: String,

    /// Link into the index; absent when the dependency is not indexed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency_package_id: Option<i64>,

    /// Free-text range expression
    pub version_constraint: String,

    pub optional: bool,

    /// Boolean expression over enabled options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl DependencyEdge {
    /// Key used to detect revisits during resolution
    pub fn visit_key(&self) -> String {
        format!("{}@{}", self.dependency_name, self.version_constraint)
    }
}

/// A package version that depends on a given name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseDependency {
    pub dependency_name: String,
    pub dependent_package: String,
    pub dependent_version: String,
    pub version_constraint: String,
    pub optional: bool,
}

/// Per-package release statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageStats {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub version_count: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_release: Option<DateTime<Utc>>,
}

/// `name`, `name:version` or `name@version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpecifier {
    pub name: String,
    pub version: String,
}

impl PackageSpecifier {
    pub fn is_latest(&self) -> bool {
        is_latest(&self.version)
    }
}

impl FromStr for PackageSpecifier {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, version) = match s.split_once(|c| c == ':' || c == '@') {
            Some((name, version)) => (name, version),
            None => (s, LATEST),
        };

        if name.is_empty() {
            return Err(PackageError::InvalidValue {
                kind: "package specifier",
                value: s.to_string(),
            });
        }

        let version = if version.is_empty() { LATEST } else { version };
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}

impl fmt::Display for PackageSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Whether a version selector asks for the latest available version
pub fn is_latest(version: &str) -> bool {
    version.is_empty() || version == LATEST
}
