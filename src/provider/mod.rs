//! App registry and hot-reload pipeline.
//!
//! The provider owns the live `app_id → App` map. Each update cycle drives
//! the configured updater, builds apps from the returned config sets, and
//! publishes the new map as a single whole-map swap; in-flight requests keep
//! the snapshot they started with. Per-app build failures are isolated: the
//! prior version of that app stays live.

use crate::app::{App, AppMap};
use crate::config::{AppConfigSet, AppSourceConfig};
use crate::error::Result;
use crate::updater::{ConfigUpdater, UpdateInput};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{error, info, warn};

/// Builds a live [`App`] out of one parsed config set (modules, processor,
/// router prepare). Installed by the engine.
pub type AppBuilder = Arc<dyn Fn(AppConfigSet) -> Result<App> + Send + Sync>;

/// Notified after every app-map swap (the host detector rebuilds its index
/// through this).
pub trait AppsListener: Send + Sync {
    fn apps_updated(&self, apps: &AppMap);
}

pub struct AppConfigProvider {
    source: AppSourceConfig,
    warnings_dir: PathBuf,
    updater: Arc<dyn ConfigUpdater>,
    builder: AppBuilder,
    module_names: Vec<String>,
    includes: HashSet<String>,
    apps: RwLock<Arc<AppMap>>,
    update_times: Mutex<HashMap<String, DateTime<Utc>>>,
    /// Serializes update cycles; a timer firing mid-update waits here.
    update_latch: Mutex<()>,
    listeners: RwLock<Vec<Arc<dyn AppsListener>>>,
}

impl AppConfigProvider {
    pub fn new(
        source: AppSourceConfig,
        warnings_dir: PathBuf,
        updater: Arc<dyn ConfigUpdater>,
        builder: AppBuilder,
        module_names: Vec<String>,
        includes: HashSet<String>,
    ) -> Self {
        AppConfigProvider {
            source,
            warnings_dir,
            updater,
            builder,
            module_names,
            includes,
            apps: RwLock::new(Arc::new(AppMap::new())),
            update_times: Mutex::new(HashMap::new()),
            update_latch: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// The current snapshot. The returned map never changes; later swaps
    /// produce a fresh one.
    pub fn apps(&self) -> Arc<AppMap> {
        self.apps.read().unwrap().clone()
    }

    pub fn add_listener(&self, listener: Arc<dyn AppsListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Run one update cycle. An updater failure leaves every prior app
    /// live; per-app build failures drop only that app's replacement.
    pub fn update_once(&self, skip_if_no_change: bool) -> Result<()> {
        let _latch = self.update_latch.lock().unwrap();

        let last_update_times = self.update_times.lock().unwrap().clone();
        let input = UpdateInput {
            source: &self.source,
            root: self.source.local_path.clone(),
            includes: self.includes.clone(),
            last_update_times,
            module_names: self.module_names.clone(),
            skip_if_no_change,
        };
        let result = self.updater.update(&input)?;

        let prior = self.apps();
        let mut next = AppMap::new();
        let mut new_times = self.update_times.lock().unwrap().clone();

        for (app_id, set) in result.updated_app_configs {
            match (self.builder)(set) {
                Ok(app) => {
                    self.persist_warnings(&app);
                    next.insert(app_id.clone(), Arc::new(app));
                    if let Some(time) = result.updated_apps.get(&app_id) {
                        new_times.insert(app_id, *time);
                    }
                }
                Err(err) => {
                    error!(app_id = %app_id, error = %err, "app build failed, prior version stays");
                    self.write_warning_file(
                        &app_id,
                        &HashMap::from([(
                            "".to_string(),
                            HashMap::from([("build".to_string(), err.to_string())]),
                        )]),
                    );
                    if let Some(previous) = prior.get(&app_id) {
                        next.insert(app_id, previous.clone());
                    }
                }
            }
        }

        // carry over apps the updater did not mention and did not remove
        for (app_id, app) in prior.iter() {
            if next.contains_key(app_id) || result.removed_app_ids.contains(app_id) {
                continue;
            }
            next.insert(app_id.clone(), app.clone());
        }
        for removed in &result.removed_app_ids {
            new_times.remove(removed);
            self.delete_warning_file(removed);
        }

        // prior apps neither updated nor skipped this cycle
        let removed_ids: Vec<&String> = prior
            .keys()
            .filter(|id| {
                !result.updated_apps.contains_key(*id) && !result.skipped_apps.contains_key(*id)
            })
            .collect();

        info!(
            updated = result.updated_apps.len(),
            skipped = result.skipped_apps.len(),
            removed = ?removed_ids,
            live = next.len(),
            "app update cycle finished"
        );

        *self.update_times.lock().unwrap() = new_times;
        let published = Arc::new(next);
        *self.apps.write().unwrap() = published.clone();

        for listener in self.listeners.read().unwrap().iter() {
            listener.apps_updated(&published);
        }
        Ok(())
    }

    /// Start the pull loop: fire after every `pull_interval`, rescheduling
    /// after each completion regardless of outcome. With no interval
    /// configured, updates are manual only.
    pub fn schedule(self: &Arc<Self>) {
        let interval = match self.source.pull_interval() {
            Some(interval) => interval,
            None => {
                info!("no pull interval configured, app updates are manual");
                return;
            }
        };
        let provider = self.clone();
        may::go!(move || loop {
            may::coroutine::sleep(interval);
            if let Err(err) = provider.update_once(true) {
                error!(error = %err, "scheduled app update failed, prior apps stay live");
            }
        });
    }

    fn persist_warnings(&self, app: &App) {
        let set = app.config_set();
        if set.has_warnings() {
            self.write_warning_file(set.app_id(), &set.warnings);
        } else {
            self.delete_warning_file(set.app_id());
        }
    }

    fn write_warning_file(&self, app_id: &str, warnings: &HashMap<String, HashMap<String, String>>) {
        if let Err(err) = std::fs::create_dir_all(&self.warnings_dir) {
            warn!(error = %err, "cannot create warnings dir");
            return;
        }
        let path = self.warnings_dir.join(format!("{app_id}.json"));
        match serde_json::to_vec_pretty(warnings) {
            Ok(bytes) => {
                if let Err(err) = std::fs::write(&path, bytes) {
                    warn!(app_id = %app_id, error = %err, "cannot write warnings file");
                }
            }
            Err(err) => warn!(app_id = %app_id, error = %err, "cannot encode warnings"),
        }
    }

    fn delete_warning_file(&self, app_id: &str) {
        let path = self.warnings_dir.join(format!("{app_id}.json"));
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Convenience for swapping a fixed set of configs in (tests, embedders).
pub fn build_update_result(
    sets: Vec<AppConfigSet>,
) -> crate::updater::UpdateResult {
    let mut result = crate::updater::UpdateResult::default();
    let now = Utc::now();
    for set in sets {
        result.updated_apps.insert(set.app_id().to_string(), now);
        result
            .updated_app_configs
            .insert(set.app_id().to_string(), set);
    }
    result
}

impl std::fmt::Debug for AppConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfigProvider")
            .field("live_apps", &self.apps().len())
            .finish()
    }
}
