//! Workspace and index configuration

use crate::manifest::evaluator::ConditionPolicy;
use crate::{PackageError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file inside the workspace root
pub const CONFIG_FILE_NAME: &str = "hepsw.toml";

/// Name of the local index replica inside the workspace root
pub const INDEX_FILE_NAME: &str = "index.db";

/// HepSW configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HepswConfig {
    /// Workspace root
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Downloaded sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<PathBuf>,

    /// Build trees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builds: Option<PathBuf>,

    /// Install prefixes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installs: Option<PathBuf>,

    /// Environment scripts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envs: Option<PathBuf>,

    /// Build logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<PathBuf>,

    /// Toolchains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolchains: Option<PathBuf>,

    /// Cached manifests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifests: Option<PathBuf>,

    /// Third-party material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thirdparty: Option<PathBuf>,

    /// Package index settings
    #[serde(default)]
    pub index: IndexConfig,

    /// User preferences
    #[serde(default)]
    pub user: UserConfig,
}

/// Package index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Remote index URL (`libsql://`, `https://` or `file://`)
    #[serde(default)]
    pub database_url: String,

    /// Bearer token for the remote index
    #[serde(default)]
    pub auth_token: String,

    /// Connect and ping timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Timeout in seconds for remote schema discovery
    #[serde(default = "default_schema_timeout")]
    pub schema_timeout_secs: u64,

    /// Timeout in seconds for a remote row fetch
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Retries for failed remote operations
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retries in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Lookup cache lifetime in seconds (0 = entries never expire)
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Whether index lookups are cached
    #[serde(default = "default_enable_cache")]
    pub enable_cache: bool,

    /// Maximum concurrent connections to the remote index
    #[serde(default = "default_remote_connections")]
    pub remote_connections: usize,

    /// Sync watermarks: table name to last synchronized row id
    #[serde(default)]
    pub last_seen_ids: BTreeMap<String, i64>,
}

/// User preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// Log verbosity (error, warn, info, debug, trace)
    #[serde(default = "default_verbosity")]
    pub verbosity: String,

    /// Parallel build jobs
    #[serde(default = "default_parallel_builds")]
    pub parallel_builds: usize,

    /// What to do with recipe conditions that cannot be evaluated
    #[serde(default)]
    pub condition_policy: ConditionPolicy,
}

fn default_workspace() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hepsw")
}

fn default_timeout() -> u64 {
    5
}

fn default_schema_timeout() -> u64 {
    30
}

fn default_fetch_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_cache_ttl() -> u64 {
    3600 // 1 hour
}

fn default_enable_cache() -> bool {
    true
}

fn default_remote_connections() -> usize {
    4
}

fn default_verbosity() -> String {
    "info".to_string()
}

fn default_parallel_builds() -> usize {
    4
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            auth_token: String::new(),
            timeout_secs: default_timeout(),
            schema_timeout_secs: default_schema_timeout(),
            fetch_timeout_secs: default_fetch_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            cache_ttl_secs: default_cache_ttl(),
            enable_cache: default_enable_cache(),
            remote_connections: default_remote_connections(),
            last_seen_ids: BTreeMap::new(),
        }
    }
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            verbosity: default_verbosity(),
            parallel_builds: default_parallel_builds(),
            condition_policy: ConditionPolicy::default(),
        }
    }
}

impl Default for HepswConfig {
    fn default() -> Self {
        Self::with_workspace(default_workspace())
    }
}

impl IndexConfig {
    /// Budget for connecting and pinging the remote
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn schema_timeout(&self) -> Duration {
        Duration::from_secs(self.schema_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Delay between retry attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Lifetime of cached lookups
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Check that the remote credentials are present
    pub fn validate_remote(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(PackageError::Config {
                message: "index database URL is required".to_string(),
            });
        }
        let local = self.database_url.starts_with("file:");
        if !local && self.auth_token.trim().is_empty() {
            return Err(PackageError::Config {
                message: "index auth token is required".to_string(),
            });
        }
        Ok(())
    }
}

impl HepswConfig {
    /// Configuration rooted at the given workspace directory
    pub fn with_workspace(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            sources: None,
            builds: None,
            installs: None,
            envs: None,
            logs: None,
            toolchains: None,
            manifests: None,
            thirdparty: None,
            index: IndexConfig::default(),
            user: UserConfig::default(),
        }
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            return Self::load_from(&path);
        }
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration into the workspace root
    pub fn save(&self) -> Result<()> {
        self.save_to(&self.workspace.join(CONFIG_FILE_NAME))
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> PathBuf {
        default_workspace().join(CONFIG_FILE_NAME)
    }

    /// Path of the local index replica
    pub fn local_index_path(&self) -> PathBuf {
        self.workspace.join(INDEX_FILE_NAME)
    }

    pub fn sources_dir(&self) -> PathBuf {
        self.dir_or_default(&self.sources, "sources")
    }

    pub fn builds_dir(&self) -> PathBuf {
        self.dir_or_default(&self.builds, "builds")
    }

    pub fn installs_dir(&self) -> PathBuf {
        self.dir_or_default(&self.installs, "installs")
    }

    pub fn envs_dir(&self) -> PathBuf {
        self.dir_or_default(&self.envs, "envs")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dir_or_default(&self.logs, "logs")
    }

    pub fn toolchains_dir(&self) -> PathBuf {
        self.dir_or_default(&self.toolchains, "toolchains")
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.dir_or_default(&self.manifests, "manifests")
    }

    pub fn thirdparty_dir(&self) -> PathBuf {
        self.dir_or_default(&self.thirdparty, "thirdparty")
    }

    fn dir_or_default(&self, dir: &Option<PathBuf>, name: &str) -> PathBuf {
        dir.clone().unwrap_or_else(|| self.workspace.join(name))
    }

    /// Create the workspace directory tree
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.workspace.clone(),
            self.sources_dir(),
            self.builds_dir(),
            self.installs_dir(),
            self.envs_dir(),
            self.logs_dir(),
            self.toolchains_dir(),
            self.manifests_dir(),
            self.thirdparty_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
