//! Storage seam for the service register.
//!
//! A store keeps one row per leased node id (schema: `node_id` small-int
//! unique, `name`, `ip`, `worker`, `startup_time`, `last_rent_time`,
//! `extra` json). Writes report an affected-row count so registration can
//! detect lost races; SQL-backed stores adapt their drivers to this trait.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterModel {
    pub node_id: i16,
    pub name: String,
    pub ip: String,
    pub worker: String,
    pub startup_time: DateTime<Utc>,
    pub last_rent_time: DateTime<Utc>,
    pub extra: Value,
}

pub trait RegisterStore: Send + Sync {
    fn load_all(&self, service_name: &str) -> Result<Vec<RegisterModel>>;

    /// Insert a new row; 0 means the node id was taken concurrently.
    fn insert(&self, model: &RegisterModel) -> Result<u64>;

    /// Replace a row, guarded by `(node_id, prev_startup_time)` so two
    /// processes taking over the same stale row cannot both win.
    fn update(&self, model: &RegisterModel, prev_startup_time: DateTime<Utc>) -> Result<u64>;

    /// Refresh the lease; 0 means the row is gone or owned by someone else.
    fn renew(
        &self,
        service_name: &str,
        node_id: i16,
        worker: &str,
        last_rent_time: DateTime<Utc>,
    ) -> Result<u64>;
}

/// In-memory store: the default when no data source is configured for
/// tests and single-node runs.
#[derive(Default)]
pub struct MemoryRegisterStore {
    rows: Mutex<Vec<RegisterModel>>,
}

impl MemoryRegisterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a row (tests).
    pub fn seed(&self, model: RegisterModel) {
        self.rows.lock().unwrap().push(model);
    }

    /// Drop every row (tests).
    pub fn clear(&self) {
        self.rows.lock().unwrap().clear();
    }

    pub fn rows(&self) -> Vec<RegisterModel> {
        self.rows.lock().unwrap().clone()
    }
}

impl RegisterStore for MemoryRegisterStore {
    fn load_all(&self, service_name: &str) -> Result<Vec<RegisterModel>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.name == service_name)
            .cloned()
            .collect())
    }

    fn insert(&self, model: &RegisterModel) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|r| r.node_id == model.node_id) {
            return Ok(0);
        }
        rows.push(model.clone());
        Ok(1)
    }

    fn update(&self, model: &RegisterModel, prev_startup_time: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut() {
            if row.node_id == model.node_id && row.startup_time == prev_startup_time {
                *row = model.clone();
                return Ok(1);
            }
        }
        Ok(0)
    }

    fn renew(
        &self,
        service_name: &str,
        node_id: i16,
        worker: &str,
        last_rent_time: DateTime<Utc>,
    ) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut() {
            if row.name == service_name && row.node_id == node_id && row.worker == worker {
                row.last_rent_time = last_rent_time;
                return Ok(1);
            }
        }
        Ok(0)
    }
}
