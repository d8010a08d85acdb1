//! Per-app configuration.
//!
//! Each app directory carries a `config.json`; the parsed form is an
//! [`AppConfigSet`]: the main [`AppConfig`] plus named environment variants
//! that share the immutable base and override only the module sections.

use crate::error::{ErrorKind, Result, WrapError};
use crate::store::TypedStore;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What a host binding is used for. `Request` hosts participate in
/// host-based app detection; other tags are carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostUsage {
    Request,
    Other(String),
}

impl HostUsage {
    fn from_tag(tag: &str) -> Self {
        if tag == "request" {
            HostUsage::Request
        } else {
            HostUsage::Other(tag.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostBinding {
    pub host: String,
    pub usage: HostUsage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncryptionKey {
    pub id: String,
    pub secret: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// The `allowed_origin` policy of per-app CORS options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigin {
    /// Echo the request origin back.
    OriginBased,
    /// `*`
    All,
    /// CORS headers suppressed entirely.
    None,
    /// An explicit origin list; entries are exact matches.
    Any(Vec<String>),
    /// Validation delegated to an app-registered matcher.
    Custom,
}

#[derive(Debug, Clone)]
pub struct CorsOptions {
    pub enabled: bool,
    pub allowed_origin: AllowedOrigin,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Preflight cache duration in seconds.
    pub cache_expiration: Option<u32>,
    pub exposed_headers: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawHost {
    Tagged { host: String, usage: String },
    Plain(String),
}

#[derive(Debug, Deserialize)]
struct RawCors {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    allowed_origin: Option<Value>,
    #[serde(default)]
    allowed_methods: Vec<String>,
    #[serde(default)]
    allowed_headers: Vec<String>,
    #[serde(default)]
    allow_credentials: bool,
    #[serde(default)]
    cache_expiration: Option<u32>,
    #[serde(default)]
    exposed_headers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawAppConfig {
    app_id: String,
    #[serde(default)]
    app_name: Option<String>,
    #[serde(default)]
    app_group: Option<String>,
    #[serde(default)]
    hosts: Vec<RawHost>,
    #[serde(default)]
    time_offset: i32,
    #[serde(default)]
    cors_options: Option<RawCors>,
    #[serde(default)]
    encryptions: Vec<EncryptionKey>,
    #[serde(default)]
    environments: Option<Value>,
}

fn parse_allowed_origin(value: Option<&Value>) -> Result<AllowedOrigin> {
    match value {
        None => Ok(AllowedOrigin::OriginBased),
        Some(Value::String(s)) => match s.as_str() {
            "origin_based" => Ok(AllowedOrigin::OriginBased),
            "all" => Ok(AllowedOrigin::All),
            "none" => Ok(AllowedOrigin::None),
            "custom" => Ok(AllowedOrigin::Custom),
            other => Err(WrapError::new(ErrorKind::InvalidAppConfig)
                .with_message("unknown allowed_origin")
                .with_extra("allowed_origin", other)),
        },
        Some(Value::Array(items)) => {
            let origins = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect::<Vec<_>>();
            Ok(AllowedOrigin::Any(origins))
        }
        Some(other) => Err(WrapError::new(ErrorKind::InvalidAppConfig)
            .with_message("allowed_origin must be a string or list")
            .with_extra("allowed_origin", other.clone())),
    }
}

/// A single app (or one environment variant of it). Immutable once built.
#[derive(Debug)]
pub struct AppConfig {
    pub app_id: String,
    pub app_name: String,
    pub app_group: Option<String>,
    pub hosts: Vec<HostBinding>,
    pub time_offset_secs: i32,
    pub cors: Option<CorsOptions>,
    /// Encryption keys, keyed by name (falling back to the key id).
    pub encryptions: HashMap<String, EncryptionKey>,
    /// `None` for the main config, the environment name for variants.
    pub environment: Option<String>,
    /// Raw JSON this config was parsed from; modules read their own
    /// sections out of it lazily.
    raw: Value,
    custom: TypedStore,
}

impl AppConfig {
    /// The canonical constructor: parse a `config.json` document.
    pub fn from_value(value: Value) -> Result<Self> {
        let raw_doc = value.clone();
        let parsed: RawAppConfig = serde_json::from_value(value).map_err(|e| {
            WrapError::new(ErrorKind::InvalidAppConfig).with_cause(e)
        })?;
        if parsed.app_id.is_empty() {
            return Err(WrapError::new(ErrorKind::InvalidAppConfig)
                .with_message("app_id must not be empty"));
        }
        let hosts = parsed
            .hosts
            .into_iter()
            .map(|h| match h {
                RawHost::Tagged { host, usage } => HostBinding {
                    host,
                    usage: HostUsage::from_tag(&usage),
                },
                RawHost::Plain(host) => HostBinding {
                    host,
                    usage: HostUsage::Request,
                },
            })
            .collect();
        let cors = match parsed.cors_options {
            Some(raw_cors) => Some(CorsOptions {
                allowed_origin: parse_allowed_origin(raw_cors.allowed_origin.as_ref())?,
                enabled: raw_cors.enabled,
                allowed_methods: raw_cors.allowed_methods,
                allowed_headers: raw_cors.allowed_headers,
                allow_credentials: raw_cors.allow_credentials,
                cache_expiration: raw_cors.cache_expiration,
                exposed_headers: raw_cors.exposed_headers,
            }),
            None => None,
        };
        let mut encryptions = HashMap::new();
        for key in parsed.encryptions {
            let name = key.name.clone().unwrap_or_else(|| key.id.clone());
            encryptions.insert(name, key);
        }
        Ok(AppConfig {
            app_id: parsed.app_id.clone(),
            app_name: parsed.app_name.unwrap_or(parsed.app_id),
            app_group: parsed.app_group,
            hosts,
            time_offset_secs: parsed.time_offset,
            cors,
            encryptions,
            environment: None,
            raw: raw_doc,
            custom: TypedStore::new(),
        })
    }

    /// Derive an environment variant: same immutable base, fresh typed
    /// store, and the environment's own raw section for module parsing.
    pub fn variant(&self, environment: &str, raw: Value) -> AppConfig {
        AppConfig {
            app_id: self.app_id.clone(),
            app_name: self.app_name.clone(),
            app_group: self.app_group.clone(),
            hosts: self.hosts.clone(),
            time_offset_secs: self.time_offset_secs,
            cors: self.cors.clone(),
            encryptions: self.encryptions.clone(),
            environment: Some(environment.to_string()),
            raw,
            custom: TypedStore::new(),
        }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// A named section of the raw document (used by modules).
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }

    /// The typed store holding module-parsed config.
    pub fn custom(&self) -> &TypedStore {
        &self.custom
    }

    /// Hosts tagged for routed traffic.
    pub fn request_hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts
            .iter()
            .filter(|h| h.usage == HostUsage::Request)
            .map(|h| h.host.as_str())
    }

    pub fn encryption(&self, name: &str) -> Option<&EncryptionKey> {
        self.encryptions.get(name)
    }
}

/// An app's main config plus its environment variants and accumulated
/// per-environment module warnings.
#[derive(Debug)]
pub struct AppConfigSet {
    pub main: Arc<AppConfig>,
    pub environments: HashMap<String, Arc<AppConfig>>,
    /// environment ("" = main) -> module name -> warning text
    pub warnings: HashMap<String, HashMap<String, String>>,
}

impl AppConfigSet {
    pub fn from_value(value: Value) -> Result<Self> {
        let main = AppConfig::from_value(value.clone())?;
        let mut environments = HashMap::new();
        match value.get("environments") {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (env_name, env_raw) in map {
                    environments.insert(
                        env_name.clone(),
                        Arc::new(main.variant(env_name, env_raw.clone())),
                    );
                }
            }
            Some(Value::Array(items)) => {
                for item in items {
                    let env_name = item
                        .get("environment")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            WrapError::new(ErrorKind::InvalidAppConfig)
                                .with_message("environment entry missing name")
                                .with_extra("app_id", main.app_id.clone())
                        })?;
                    environments.insert(
                        env_name.to_string(),
                        Arc::new(main.variant(env_name, item.clone())),
                    );
                }
            }
            Some(other) => {
                return Err(WrapError::new(ErrorKind::InvalidAppConfig)
                    .with_message("environments must be an object or array")
                    .with_extra("environments", other.clone()));
            }
        }
        Ok(AppConfigSet {
            main: Arc::new(main),
            environments,
            warnings: HashMap::new(),
        })
    }

    pub fn app_id(&self) -> &str {
        &self.main.app_id
    }

    /// Resolve an environment; `None` yields the main config.
    pub fn resolve(&self, environment: Option<&str>) -> Result<Arc<AppConfig>> {
        match environment {
            None => Ok(self.main.clone()),
            Some(env) => self.environments.get(env).cloned().ok_or_else(|| {
                WrapError::new(ErrorKind::EnvironmentNotFound)
                    .with_extra("app_id", self.main.app_id.clone())
                    .with_extra("environment", env)
            }),
        }
    }

    pub fn add_warning(&mut self, environment: &str, module: &str, warning: impl Into<String>) {
        self.warnings
            .entry(environment.to_string())
            .or_default()
            .insert(module.to_string(), warning.into());
    }

    pub fn has_warnings(&self) -> bool {
        self.warnings.values().any(|m| !m.is_empty())
    }
}
