//! Local-filesystem updater.
//!
//! Each subdirectory of the root is one app; its `config.json` is the
//! config document and the file's mtime is the update clock.

use super::{ConfigUpdater, UpdateInput, UpdateResult};
use crate::config::AppConfigSet;
use crate::error::{ErrorKind, Result, WrapError};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, warn};

pub const APP_CONFIG_FILE: &str = "config.json";

#[derive(Default)]
pub struct LocalDirUpdater;

impl LocalDirUpdater {
    pub fn new() -> Self {
        LocalDirUpdater
    }
}

pub(super) fn read_app_dir(dir: &Path) -> Result<AppConfigSet> {
    let config_path = dir.join(APP_CONFIG_FILE);
    let bytes = std::fs::read(&config_path).map_err(|e| {
        WrapError::new(ErrorKind::InvalidAppConfig)
            .with_cause(e)
            .with_extra("path", config_path.display().to_string())
    })?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
        WrapError::new(ErrorKind::InvalidAppConfig)
            .with_cause(e)
            .with_extra("path", config_path.display().to_string())
    })?;
    AppConfigSet::from_value(value)
}

pub(super) fn modified_time(path: &Path) -> Result<DateTime<Utc>> {
    let meta = std::fs::metadata(path)
        .map_err(|e| WrapError::new(ErrorKind::InvalidAppConfig).with_cause(e))?;
    let modified = meta
        .modified()
        .map_err(|e| WrapError::new(ErrorKind::InvalidAppConfig).with_cause(e))?;
    Ok(DateTime::<Utc>::from(modified))
}

impl ConfigUpdater for LocalDirUpdater {
    fn update(&self, input: &UpdateInput) -> Result<UpdateResult> {
        let mut result = UpdateResult::default();
        let mut seen = std::collections::HashSet::new();

        let entries = match std::fs::read_dir(&input.root) {
            Ok(entries) => entries,
            Err(e) => {
                return Err(WrapError::new(ErrorKind::InvalidEngineConfig)
                    .with_cause(e)
                    .with_extra("root", input.root.display().to_string()));
            }
        };

        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let app_id = match dir.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            if !input.includes_app(&app_id) {
                continue;
            }
            let config_path = dir.join(APP_CONFIG_FILE);
            if !config_path.is_file() {
                continue;
            }
            seen.insert(app_id.clone());

            let update_time = modified_time(&config_path)?;
            if input.skip_if_no_change {
                if let Some(known) = input.last_update_times.get(&app_id) {
                    if update_time <= *known {
                        debug!(app_id = %app_id, "app config unchanged, skipped");
                        result.skipped_apps.insert(
                            app_id,
                            WrapError::new(ErrorKind::NotModified)
                                .with_message("config unchanged"),
                        );
                        continue;
                    }
                }
            }

            match read_app_dir(&dir) {
                Ok(set) => {
                    if set.app_id() != app_id {
                        warn!(
                            dir = %app_id,
                            app_id = %set.app_id(),
                            "config app_id does not match its directory"
                        );
                        result.skipped_apps.insert(
                            app_id,
                            WrapError::new(ErrorKind::InvalidAppConfig)
                                .with_message("app_id does not match directory name")
                                .with_extra("config_app_id", set.app_id().to_string()),
                        );
                        continue;
                    }
                    result.updated_apps.insert(app_id.clone(), update_time);
                    result.updated_app_configs.insert(app_id, set);
                }
                Err(err) => {
                    warn!(app_id = %app_id, error = %err, "app config unreadable");
                    result.skipped_apps.insert(app_id, err);
                }
            }
        }

        for known in input.last_update_times.keys() {
            if input.includes_app(known) && !seen.contains(known) {
                result.removed_app_ids.insert(known.clone());
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppSourceConfig;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    fn source(root: &Path) -> AppSourceConfig {
        serde_json::from_value(json!({ "local_path": root })).unwrap()
    }

    fn write_app(root: &Path, app_id: &str) {
        let dir = root.join(app_id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(APP_CONFIG_FILE),
            json!({ "app_id": app_id, "hosts": [format!("{app_id}.example")] }).to_string(),
        )
        .unwrap();
    }

    #[test]
    fn second_run_skips_everything_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        write_app(tmp.path(), "app1");
        write_app(tmp.path(), "app2");
        let source = source(tmp.path());
        let updater = LocalDirUpdater::new();

        let first = updater
            .update(&UpdateInput {
                source: &source,
                root: tmp.path().to_path_buf(),
                includes: HashSet::new(),
                last_update_times: HashMap::new(),
                module_names: vec![],
                skip_if_no_change: true,
            })
            .unwrap();
        assert_eq!(first.updated_apps.len(), 2);
        assert!(first.skipped_apps.is_empty());

        let second = updater
            .update(&UpdateInput {
                source: &source,
                root: tmp.path().to_path_buf(),
                includes: HashSet::new(),
                last_update_times: first.updated_apps.clone(),
                module_names: vec![],
                skip_if_no_change: true,
            })
            .unwrap();
        assert!(second.updated_apps.is_empty());
        assert_eq!(second.skipped_apps.len(), 2);
        for err in second.skipped_apps.values() {
            assert_eq!(err.kind(), ErrorKind::NotModified);
        }
    }

    #[test]
    fn includes_restricts_strictly() {
        let tmp = tempfile::tempdir().unwrap();
        write_app(tmp.path(), "app1");
        write_app(tmp.path(), "app2");
        let source = source(tmp.path());
        let result = LocalDirUpdater::new()
            .update(&UpdateInput {
                source: &source,
                root: tmp.path().to_path_buf(),
                includes: ["app2".to_string()].into_iter().collect(),
                last_update_times: HashMap::new(),
                module_names: vec![],
                skip_if_no_change: false,
            })
            .unwrap();
        assert_eq!(result.updated_apps.len(), 1);
        assert!(result.updated_app_configs.contains_key("app2"));
    }

    #[test]
    fn vanished_app_reported_removed() {
        let tmp = tempfile::tempdir().unwrap();
        write_app(tmp.path(), "app1");
        let source = source(tmp.path());
        let mut known = HashMap::new();
        known.insert("gone".to_string(), Utc::now());
        let result = LocalDirUpdater::new()
            .update(&UpdateInput {
                source: &source,
                root: tmp.path().to_path_buf(),
                includes: HashSet::new(),
                last_update_times: known,
                module_names: vec![],
                skip_if_no_change: true,
            })
            .unwrap();
        assert!(result.removed_app_ids.contains("gone"));
    }

    #[test]
    fn broken_config_lands_in_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bad");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(APP_CONFIG_FILE), b"{not json").unwrap();
        let source = source(tmp.path());
        let result = LocalDirUpdater::new()
            .update(&UpdateInput {
                source: &source,
                root: tmp.path().to_path_buf(),
                includes: HashSet::new(),
                last_update_times: HashMap::new(),
                module_names: vec![],
                skip_if_no_change: false,
            })
            .unwrap();
        assert_eq!(
            result.skipped_apps.get("bad").unwrap().kind(),
            ErrorKind::InvalidAppConfig
        );
    }
}
