//! Bundle caching with single-flight loading.
//!
//! Deserializing a bundle is the most expensive step of a request. [`CachedLoader`]
//! wraps any [`BundleSource`] and keeps every successfully loaded bundle for the
//! lifetime of the process. Each path owns a slot guarded by its own mutex, so
//! concurrent requests for the same path wait for one load instead of each reading
//! the file, while requests for different paths never block one another. A failed
//! load leaves the slot empty and the next caller tries again.

use crate::bundle::{BundleError, BundleSource, ModelBundle};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

type Slot = Arc<Mutex<Option<Arc<ModelBundle>>>>;

pub struct CachedLoader<S: BundleSource> {
    inner: S,
    slots: DashMap<PathBuf, Slot>,
}

impl<S: BundleSource> CachedLoader<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            slots: DashMap::new(),
        }
    }

    /// Number of bundles currently held.
    pub fn cached(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some()
            })
            .count()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: BundleSource> BundleSource for CachedLoader<S> {
    fn get_or_load(&self, path: &Path) -> Result<Arc<ModelBundle>, BundleError> {
        // Clone the slot handle so the map shard lock is released before waiting on the slot.
        let slot: Slot = self.slots.entry(path.to_path_buf()).or_default().clone();

        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bundle) = guard.as_ref() {
            return Ok(Arc::clone(bundle));
        }

        log::debug!("Bundle cache miss for '{}'", path.display());
        let bundle = self.inner.get_or_load(path)?;
        *guard = Some(Arc::clone(&bundle));
        Ok(bundle)
    }
}
