//! Named resource pools shared by every app in the process.
//!
//! A [`ResourceGroup`] holds database handles, cache clients and object
//! storages by name; groups themselves are keyed by id with `"default"` as
//! the conventional group. Everything is built once at engine startup and
//! handed out by shared reference; pooling and concurrency are the concern
//! of the underlying drivers.

mod cache;
mod database;
mod storage;

pub use cache::CacheHandle;
pub use database::{DatabaseDriver, DatabaseRegistry};
pub use storage::{ListPage, LocalDirStorage, ObjectMeta, ObjectStorage};

use crate::config::{ResourceGroupConfig, StorageConfig, DEFAULT_GROUP_ID};
use crate::error::{ErrorKind, Result, WrapError};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Default)]
pub struct ResourceGroup {
    id: String,
    databases: HashMap<String, Arc<dyn Any + Send + Sync>>,
    caches: HashMap<String, Arc<CacheHandle>>,
    storages: HashMap<String, Arc<dyn ObjectStorage>>,
}

impl ResourceGroup {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Typed database getter. The handle type is whatever the registered
    /// driver opened; asking for the wrong type is a `database` error.
    pub fn database<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let handle = self.databases.get(name).ok_or_else(|| {
            WrapError::new(ErrorKind::Database)
                .with_message("unknown database")
                .with_extra("group", self.id.clone())
                .with_extra("name", name)
        })?;
        handle.clone().downcast::<T>().map_err(|_| {
            WrapError::new(ErrorKind::Database)
                .with_message("database handle type mismatch")
                .with_extra("group", self.id.clone())
                .with_extra("name", name)
        })
    }

    pub fn cache(&self, name: &str) -> Result<Arc<CacheHandle>> {
        self.caches.get(name).cloned().ok_or_else(|| {
            WrapError::new(ErrorKind::Cache)
                .with_message("unknown cache")
                .with_extra("group", self.id.clone())
                .with_extra("name", name)
        })
    }

    pub fn storage(&self, name: &str) -> Result<Arc<dyn ObjectStorage>> {
        self.storages.get(name).cloned().ok_or_else(|| {
            WrapError::new(ErrorKind::OssUnavailable)
                .with_message("unknown object storage")
                .with_extra("group", self.id.clone())
                .with_extra("name", name)
        })
    }
}

pub struct ResourceGroups {
    groups: HashMap<String, Arc<ResourceGroup>>,
}

impl ResourceGroups {
    /// Build every configured group. Database handles are opened through
    /// the driver registry; an unregistered driver name fails the build.
    pub fn build(
        configs: &[ResourceGroupConfig],
        drivers: &DatabaseRegistry,
    ) -> Result<Self> {
        let mut groups = HashMap::new();
        for cfg in configs {
            let mut group = ResourceGroup {
                id: cfg.id.clone(),
                ..ResourceGroup::default()
            };
            for db in &cfg.databases {
                let handle = drivers.open(db)?;
                group.databases.insert(db.name.clone(), handle);
            }
            for cache in &cfg.caches {
                group
                    .caches
                    .insert(cache.name.clone(), Arc::new(CacheHandle::open(&cache.url)?));
            }
            for storage in &cfg.storages {
                let built: Arc<dyn ObjectStorage> = match storage {
                    StorageConfig::Local { path, .. } => {
                        Arc::new(LocalDirStorage::new(path.clone()))
                    }
                };
                group.storages.insert(storage.name().to_string(), built);
            }
            info!(
                group = %cfg.id,
                databases = cfg.databases.len(),
                caches = cfg.caches.len(),
                storages = cfg.storages.len(),
                "resource group built"
            );
            groups.insert(cfg.id.clone(), Arc::new(group));
        }
        // an empty default group is always addressable
        groups
            .entry(DEFAULT_GROUP_ID.to_string())
            .or_insert_with(|| {
                Arc::new(ResourceGroup {
                    id: DEFAULT_GROUP_ID.to_string(),
                    ..ResourceGroup::default()
                })
            });
        Ok(ResourceGroups { groups })
    }

    pub fn group(&self, id: &str) -> Result<Arc<ResourceGroup>> {
        self.groups.get(id).cloned().ok_or_else(|| {
            WrapError::new(ErrorKind::Internal)
                .with_message("unknown resource group")
                .with_extra("group", id)
        })
    }

    pub fn default_group(&self) -> Arc<ResourceGroup> {
        self.groups
            .get(DEFAULT_GROUP_ID)
            .cloned()
            .expect("default resource group always present")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    struct FakePool {
        url: String,
    }

    struct FakeDriver;

    impl DatabaseDriver for FakeDriver {
        fn open(&self, cfg: &DatabaseConfig) -> Result<Arc<dyn Any + Send + Sync>> {
            Ok(Arc::new(FakePool {
                url: cfg.url.clone(),
            }))
        }
    }

    #[test]
    fn typed_database_getter() {
        let mut drivers = DatabaseRegistry::new();
        drivers.register("fake", Arc::new(FakeDriver));
        let configs = vec![ResourceGroupConfig {
            id: "default".to_string(),
            databases: vec![DatabaseConfig {
                name: "main".to_string(),
                driver: "fake".to_string(),
                url: "fake://main".to_string(),
                options: serde_json::Value::Null,
            }],
            caches: vec![],
            storages: vec![],
        }];
        let groups = ResourceGroups::build(&configs, &drivers).unwrap();
        let pool = groups.default_group().database::<FakePool>("main").unwrap();
        assert_eq!(pool.url, "fake://main");
        // wrong type is a database error, not a panic
        assert!(groups.default_group().database::<String>("main").is_err());
    }

    #[test]
    fn default_group_exists_even_unconfigured() {
        let groups = ResourceGroups::build(&[], &DatabaseRegistry::new()).unwrap();
        assert_eq!(groups.default_group().id(), "default");
        assert!(groups.default_group().cache("missing").is_err());
    }
}
