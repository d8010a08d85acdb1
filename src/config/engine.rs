//! Engine bootstrap configuration.
//!
//! Constructed once at startup, then passed around by shared reference.
//! Nothing here mutates after construction except the Snowflake node seed,
//! which the service register fills in exactly once.

use crate::error::{ErrorKind, Result, WrapError};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_GROUP_ID: &str = "default";

/// Debug-feature names honored by the engine.
pub const FEATURE_INCLUDES_APP_IDS: &str = "appConfig_includesAppIDs";
pub const FEATURE_EXTRACT_DEBUG_HOST: &str = "engine_extractDebugHost";
pub const FEATURE_IGNORE_BODY_PROCESS: &str = "engine_ignoreBodyProcess";

/// Process-wide debug feature map. A feature is honored only when its key is
/// present in the engine config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct DebugFeatures(HashMap<String, Value>);

impl DebugFeatures {
    pub fn is_enabled(&self, name: &str) -> bool {
        match self.0.get(name) {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Null) => false,
            Some(_) => true,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// The `appConfig_includesAppIDs` list, when configured.
    pub fn includes_app_ids(&self) -> Option<Vec<String>> {
        let value = self.0.get(FEATURE_INCLUDES_APP_IDS)?;
        let list = value.as_array()?;
        Some(
            list.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        )
    }
}

/// HTTP server binding.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_shutdown_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub reuse_address: bool,
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_secs(),
            reuse_address: false,
            max_body_bytes: default_max_body(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_secs() -> u64 {
    30
}

fn default_max_body() -> usize {
    100 * 1024 * 1024
}

/// Credentials for a remote app source (object storage).
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCredentials {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Where app configurations come from and how often to pull them.
#[derive(Debug, Clone, Deserialize)]
pub struct AppSourceConfig {
    /// Root under which per-app directories live (or are expanded into).
    pub local_path: PathBuf,
    /// Seconds between pulls; zero or negative means manual updates only.
    #[serde(default = "default_pull_interval")]
    pub pull_interval_secs: i64,
    /// Remote prefix for zipped app configs, e.g. `configs/production`.
    #[serde(default)]
    pub remote_path: Option<String>,
    #[serde(default)]
    pub credentials: Option<RemoteCredentials>,
}

impl AppSourceConfig {
    pub fn pull_interval(&self) -> Option<Duration> {
        if self.pull_interval_secs > 0 {
            Some(Duration::from_secs(self.pull_interval_secs as u64))
        } else {
            None
        }
    }
}

fn default_pull_interval() -> i64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    pub driver: String,
    pub url: String,
    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Object storage backed by a local directory tree.
    Local { name: String, path: PathBuf },
}

impl StorageConfig {
    pub fn name(&self) -> &str {
        match self {
            StorageConfig::Local { name, .. } => name,
        }
    }
}

/// One named pool of databases, caches and object storages.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceGroupConfig {
    #[serde(default = "default_group_id")]
    pub id: String,
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
    #[serde(default)]
    pub caches: Vec<CacheConfig>,
    #[serde(default)]
    pub storages: Vec<StorageConfig>,
}

fn default_group_id() -> String {
    DEFAULT_GROUP_ID.to_string()
}

/// A logger sink, keyed by role (`default`, `startup`) in the engine config.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "sink", rename_all = "snake_case")]
pub enum LogSinkConfig {
    Stdout {
        #[serde(default)]
        json: bool,
    },
    File {
        path: PathBuf,
    },
    Tcp {
        addr: String,
        #[serde(default = "default_reconnect_secs")]
        reconnect_delay_secs: u64,
    },
}

fn default_reconnect_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct RawEngineConfig {
    #[serde(default)]
    work_dir: Option<PathBuf>,
    service_name: String,
    #[serde(default)]
    debug_features: DebugFeatures,
    #[serde(default)]
    server: ServerConfig,
    /// Offset from UTC in seconds applied to request start times when the
    /// app does not carry its own offset.
    #[serde(default)]
    time_offset_secs: i32,
    app_source: AppSourceConfig,
    #[serde(default)]
    resource_groups: Vec<ResourceGroupConfig>,
    #[serde(default)]
    loggers: HashMap<String, LogSinkConfig>,
    #[serde(default)]
    metrics_endpoint: Option<String>,
}

/// Immutable engine-wide settings.
#[derive(Debug)]
pub struct EngineConfig {
    pub work_dir: PathBuf,
    pub service_name: String,
    pub debug_features: DebugFeatures,
    pub server: ServerConfig,
    pub time_offset_secs: i32,
    pub app_source: AppSourceConfig,
    pub resource_groups: Vec<ResourceGroupConfig>,
    pub loggers: HashMap<String, LogSinkConfig>,
    pub metrics_endpoint: Option<String>,
    snowflake_node: OnceCell<i16>,
}

impl EngineConfig {
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawEngineConfig = serde_json::from_value(value).map_err(|e| {
            WrapError::new(ErrorKind::InvalidEngineConfig).with_cause(e)
        })?;
        let work_dir = match raw.work_dir {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(|e| {
                WrapError::new(ErrorKind::InvalidEngineConfig).with_cause(e)
            })?,
        };
        Ok(EngineConfig {
            work_dir,
            service_name: raw.service_name,
            debug_features: raw.debug_features,
            server: raw.server,
            time_offset_secs: raw.time_offset_secs,
            app_source: raw.app_source,
            resource_groups: raw.resource_groups,
            loggers: raw.loggers,
            metrics_endpoint: raw.metrics_endpoint,
            snowflake_node: OnceCell::new(),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| {
            WrapError::new(ErrorKind::InvalidEngineConfig)
                .with_cause(e)
                .with_extra("path", path.as_ref().display().to_string())
        })?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
            WrapError::new(ErrorKind::InvalidEngineConfig).with_cause(e)
        })?;
        Self::from_value(value)
    }

    /// Directory where per-app warning files are written.
    pub fn warnings_dir(&self) -> PathBuf {
        self.work_dir.join("apps_warning")
    }

    /// Seed the Snowflake node id. The seed can be set exactly once; a
    /// second call reports the conflicting value.
    pub fn seed_snowflake_node(&self, node: i16) -> Result<()> {
        self.snowflake_node.set(node).map_err(|existing| {
            WrapError::new(ErrorKind::Internal)
                .with_message("snowflake node already seeded")
                .with_extra("existing", existing as i64)
        })
    }

    pub fn snowflake_node(&self) -> Option<i16> {
        self.snowflake_node.get().copied()
    }
}
