//! Object storage seam.
//!
//! Remote providers are external collaborators; the framework only needs a
//! paginated listing and byte fetches with a last-modified clock. The
//! local-directory implementation backs tests and single-node deployments.

use crate::error::{ErrorKind, Result, WrapError};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

/// One page of a listing. `continue_token` is fed back to fetch the next
/// page; `None` means the listing is complete.
#[derive(Debug, Clone)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    pub continue_token: Option<String>,
}

pub trait ObjectStorage: Send + Sync {
    fn list(&self, prefix: &str, continue_token: Option<&str>) -> Result<ListPage>;
    fn get(&self, key: &str) -> Result<Vec<u8>>;
    fn stat(&self, key: &str) -> Result<ObjectMeta>;
}

/// Object storage over a local directory tree. Keys map to relative paths;
/// listings are lexicographic with the last returned key as continue token.
pub struct LocalDirStorage {
    root: PathBuf,
    page_size: usize,
}

impl LocalDirStorage {
    pub fn new(root: PathBuf) -> Self {
        LocalDirStorage {
            root,
            page_size: 200,
        }
    }

    pub fn with_page_size(root: PathBuf, page_size: usize) -> Self {
        LocalDirStorage { root, page_size }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.split('/').any(|part| part == "..") {
            return Err(WrapError::new(ErrorKind::OssUnavailable)
                .with_message("key escapes storage root")
                .with_extra("key", key));
        }
        Ok(self.root.join(key))
    }

    fn collect_keys(&self, dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.collect_keys(&path, out)?;
            } else {
                out.push(path);
            }
        }
        Ok(())
    }

    fn meta_for(&self, key: String, path: &Path) -> Result<ObjectMeta> {
        let meta = std::fs::metadata(path).map_err(|e| {
            WrapError::new(ErrorKind::OssUnavailable)
                .with_cause(e)
                .with_extra("key", key.clone())
        })?;
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(ObjectMeta {
            key,
            last_modified: modified,
            size: meta.len(),
        })
    }
}

impl ObjectStorage for LocalDirStorage {
    fn list(&self, prefix: &str, continue_token: Option<&str>) -> Result<ListPage> {
        let mut paths = Vec::new();
        if self.root.is_dir() {
            let root = self.root.clone();
            self.collect_keys(&root, &mut paths)
                .map_err(|e| WrapError::new(ErrorKind::OssUnavailable).with_cause(e))?;
        }
        let mut keys: Vec<String> = paths
            .into_iter()
            .filter_map(|p| {
                p.strip_prefix(&self.root)
                    .ok()
                    .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            })
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        let start = match continue_token {
            Some(token) => keys.partition_point(|k| k.as_str() <= token),
            None => 0,
        };
        let page: Vec<String> = keys.into_iter().skip(start).take(self.page_size).collect();
        let continue_token = if page.len() == self.page_size {
            page.last().cloned()
        } else {
            None
        };
        let mut objects = Vec::with_capacity(page.len());
        for key in page {
            let path = self.resolve(&key)?;
            objects.push(self.meta_for(key, &path)?);
        }
        Ok(ListPage {
            objects,
            continue_token,
        })
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        std::fs::read(&path).map_err(|e| {
            WrapError::new(ErrorKind::OssUnavailable)
                .with_cause(e)
                .with_extra("key", key)
        })
    }

    fn stat(&self, key: &str) -> Result<ObjectMeta> {
        let path = self.resolve(key)?;
        self.meta_for(key.to_string(), &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_paginates_with_continue_token() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("apps")).unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("apps/a{i}.zip")), b"x").unwrap();
        }
        let storage = LocalDirStorage::with_page_size(dir.path().to_path_buf(), 2);
        let first = storage.list("apps/", None).unwrap();
        assert_eq!(first.objects.len(), 2);
        let token = first.continue_token.clone().unwrap();
        let second = storage.list("apps/", Some(&token)).unwrap();
        assert_eq!(second.objects.len(), 2);
        let third = storage
            .list("apps/", second.continue_token.as_deref())
            .unwrap();
        assert_eq!(third.objects.len(), 1);
        assert!(third.continue_token.is_none());
    }

    #[test]
    fn traversal_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDirStorage::new(dir.path().to_path_buf());
        assert!(storage.get("../etc/passwd").is_err());
    }
}
