//! Programmatic updater.
//!
//! Wraps a closure so embedders (and tests) can produce app sets without a
//! backing filesystem or object store.

use super::{ConfigUpdater, UpdateInput, UpdateResult};
use crate::error::Result;

pub struct FnUpdater<F>(F);

impl<F> FnUpdater<F>
where
    F: Fn(&UpdateInput) -> Result<UpdateResult> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        FnUpdater(f)
    }
}

impl<F> ConfigUpdater for FnUpdater<F>
where
    F: Fn(&UpdateInput) -> Result<UpdateResult> + Send + Sync,
{
    fn update(&self, input: &UpdateInput) -> Result<UpdateResult> {
        (self.0)(input)
    }
}
