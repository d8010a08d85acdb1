//! Redis cache handles.

use crate::error::{ErrorKind, Result, WrapError};
use redis::Commands;

/// A named cache entry in a resource group, backed by a `redis::Client`.
/// The client is cheap to share; connections are taken per call.
pub struct CacheHandle {
    client: redis::Client,
}

impl CacheHandle {
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            WrapError::new(ErrorKind::Cache)
                .with_cause(e)
                .with_extra("url", url)
        })?;
        Ok(CacheHandle { client })
    }

    /// The raw client, for callers that need more than string get/set.
    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection()?;
        conn.get(key)
            .map_err(|e| WrapError::new(ErrorKind::Cache).with_cause(e).with_extra("key", key))
    }

    pub fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection()?;
        conn.set(key, value)
            .map_err(|e| WrapError::new(ErrorKind::Cache).with_cause(e).with_extra("key", key))
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection()?;
        conn.del(key)
            .map_err(|e| WrapError::new(ErrorKind::Cache).with_cause(e).with_extra("key", key))
    }

    fn connection(&self) -> Result<redis::Connection> {
        self.client
            .get_connection()
            .map_err(|e| WrapError::new(ErrorKind::Cache).with_cause(e))
    }
}
