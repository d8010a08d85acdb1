//! Database driver registry.
//!
//! Concrete SQL drivers live outside the framework; what the core keeps is
//! the seam: a [`DatabaseDriver`] opens a handle from a [`DatabaseConfig`]
//! and the handle is stored type-erased, recovered through the group's
//! typed getter.

use crate::config::DatabaseConfig;
use crate::error::{ErrorKind, Result, WrapError};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

pub trait DatabaseDriver: Send + Sync {
    fn open(&self, cfg: &DatabaseConfig) -> Result<Arc<dyn Any + Send + Sync>>;
}

/// Driver factories keyed by the `driver` field of a database config.
#[derive(Default)]
pub struct DatabaseRegistry {
    drivers: HashMap<String, Arc<dyn DatabaseDriver>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, driver: Arc<dyn DatabaseDriver>) {
        self.drivers.insert(name.into(), driver);
    }

    pub fn open(&self, cfg: &DatabaseConfig) -> Result<Arc<dyn Any + Send + Sync>> {
        let driver = self.drivers.get(&cfg.driver).ok_or_else(|| {
            WrapError::new(ErrorKind::InvalidEngineConfig)
                .with_message("no registered driver for database")
                .with_extra("driver", cfg.driver.clone())
                .with_extra("name", cfg.name.clone())
        })?;
        driver.open(cfg)
    }
}
