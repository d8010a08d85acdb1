//! Pluggable app-config updaters.
//!
//! An updater turns the app-source descriptor into the next set of parsed
//! app configs. The provider drives it on the pull interval and applies the
//! result as a whole-map swap; updaters themselves never touch live apps.

mod closure;
mod local;
mod zipped;

pub use closure::FnUpdater;
pub use local::{LocalDirUpdater, APP_CONFIG_FILE};
pub use zipped::ZippedStorageUpdater;

use crate::config::{AppConfigSet, AppSourceConfig};
use crate::error::{Result, WrapError};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

pub struct UpdateInput<'a> {
    pub source: &'a AppSourceConfig,
    /// Root under which per-app directories live.
    pub root: PathBuf,
    /// App ids to restrict the update to; empty means all.
    pub includes: HashSet<String>,
    /// Last known update time per app id.
    pub last_update_times: HashMap<String, DateTime<Utc>>,
    /// Names of the modules that will configure the apps.
    pub module_names: Vec<String>,
    pub skip_if_no_change: bool,
}

impl UpdateInput<'_> {
    /// Whether `app_id` is in scope for this update.
    pub fn includes_app(&self, app_id: &str) -> bool {
        self.includes.is_empty() || self.includes.contains(app_id)
    }
}

#[derive(Default)]
pub struct UpdateResult {
    /// Apps that changed, with their new update times.
    pub updated_apps: HashMap<String, DateTime<Utc>>,
    pub updated_app_configs: HashMap<String, AppConfigSet>,
    /// Apps deliberately left alone, with the reason.
    pub skipped_apps: HashMap<String, WrapError>,
    /// Apps the source no longer knows.
    pub removed_app_ids: HashSet<String>,
}

pub trait ConfigUpdater: Send + Sync {
    fn update(&self, input: &UpdateInput) -> Result<UpdateResult>;
}
