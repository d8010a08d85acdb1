//! Type-keyed value store.
//!
//! Used in two places: the per-`AppConfig` bag of module-parsed config and
//! the per-request bag on the context. Values are keyed by their `TypeId`,
//! so each type has at most one slot; the getter hands out `Arc` clones.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
pub struct TypedStore {
    values: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl TypedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Any + Send + Sync>(&self, value: T) {
        self.values
            .write()
            .unwrap()
            .insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.values
            .read()
            .unwrap()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.read().unwrap().contains_key(&TypeId::of::<T>())
    }

    /// Get the stored value or insert the one produced by `init`.
    pub fn get_or_put<T, F>(&self, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.get::<T>() {
            return existing;
        }
        let mut values = self.values.write().unwrap();
        // re-check under the write lock
        if let Some(existing) = values.get(&TypeId::of::<T>()) {
            if let Ok(typed) = existing.clone().downcast::<T>() {
                return typed;
            }
        }
        let fresh: Arc<T> = Arc::new(init());
        values.insert(TypeId::of::<T>(), fresh.clone());
        fresh
    }
}

impl std::fmt::Debug for TypedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.values.read().map(|v| v.len()).unwrap_or(0);
        f.debug_struct("TypedStore").field("entries", &len).finish()
    }
}
