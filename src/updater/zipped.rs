//! Zipped-object-storage updater.
//!
//! The store holds one archive per app at `<prefix>/<appID>.zip`; the
//! object's last-modified timestamp is the update clock. Changed archives
//! are expanded into `<root>/<appID>/` and parsed like a local app dir.

use super::local::read_app_dir;
use super::{ConfigUpdater, UpdateInput, UpdateResult};
use crate::error::{ErrorKind, Result, WrapError};
use crate::resource::{ObjectMeta, ObjectStorage};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ZippedStorageUpdater {
    storage: Arc<dyn ObjectStorage>,
}

impl ZippedStorageUpdater {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        ZippedStorageUpdater { storage }
    }

    fn list_all(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.storage.list(prefix, token.as_deref())?;
            objects.extend(page.objects);
            match page.continue_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(objects)
    }

    fn expand(&self, bytes: &[u8], target: &Path) -> Result<()> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
            WrapError::new(ErrorKind::InvalidAppConfig)
                .with_cause(e)
                .with_message("unreadable app archive")
        })?;
        if target.exists() {
            std::fs::remove_dir_all(target)
                .map_err(|e| WrapError::new(ErrorKind::Internal).with_cause(e))?;
        }
        std::fs::create_dir_all(target)
            .map_err(|e| WrapError::new(ErrorKind::Internal).with_cause(e))?;
        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| WrapError::new(ErrorKind::InvalidAppConfig).with_cause(e))?;
            let relative = match file.enclosed_name() {
                Some(name) => name.to_path_buf(),
                // entries escaping the target are dropped, not an error
                None => {
                    warn!(entry = %file.name(), "archive entry escapes target, dropped");
                    continue;
                }
            };
            let out_path = target.join(relative);
            if file.is_dir() {
                std::fs::create_dir_all(&out_path)
                    .map_err(|e| WrapError::new(ErrorKind::Internal).with_cause(e))?;
                continue;
            }
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| WrapError::new(ErrorKind::Internal).with_cause(e))?;
            }
            let mut contents = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut contents)
                .map_err(|e| WrapError::new(ErrorKind::Internal).with_cause(e))?;
            std::fs::write(&out_path, contents)
                .map_err(|e| WrapError::new(ErrorKind::Internal).with_cause(e))?;
        }
        Ok(())
    }
}

impl ConfigUpdater for ZippedStorageUpdater {
    fn update(&self, input: &UpdateInput) -> Result<UpdateResult> {
        let prefix = input
            .source
            .remote_path
            .clone()
            .unwrap_or_default();
        let list_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix.trim_end_matches('/'))
        };
        let objects = self.list_all(&list_prefix).map_err(|e| {
            e.wrap(ErrorKind::OssUnavailable)
        })?;

        let mut result = UpdateResult::default();
        let mut seen = std::collections::HashSet::new();

        for object in objects {
            let file_name = object
                .key
                .strip_prefix(&list_prefix)
                .unwrap_or(object.key.as_str());
            let app_id = match file_name.strip_suffix(".zip") {
                Some(app_id) if !app_id.is_empty() && !app_id.contains('/') => app_id.to_string(),
                _ => continue,
            };
            if !input.includes_app(&app_id) {
                continue;
            }
            seen.insert(app_id.clone());

            if input.skip_if_no_change {
                if let Some(known) = input.last_update_times.get(&app_id) {
                    if object.last_modified <= *known {
                        debug!(app_id = %app_id, "archive unchanged, skipped");
                        result.skipped_apps.insert(
                            app_id,
                            WrapError::new(ErrorKind::NotModified)
                                .with_message("archive unchanged"),
                        );
                        continue;
                    }
                }
            }

            let bytes = match self.storage.get(&object.key) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(app_id = %app_id, error = %err, "archive fetch failed");
                    result
                        .skipped_apps
                        .insert(app_id, err.wrap(ErrorKind::OssUnavailable));
                    continue;
                }
            };
            let target = input.root.join(&app_id);
            let parsed = self
                .expand(&bytes, &target)
                .and_then(|()| read_app_dir(&target));
            match parsed {
                Ok(set) => {
                    info!(app_id = %app_id, key = %object.key, "app archive expanded");
                    result
                        .updated_apps
                        .insert(app_id.clone(), object.last_modified);
                    result.updated_app_configs.insert(app_id, set);
                }
                Err(err) => {
                    warn!(app_id = %app_id, error = %err, "app archive rejected");
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
