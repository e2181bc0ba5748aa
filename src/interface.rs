//! Shared access to a collection from several threads.
//!
//! A collection, together with every derived collection it owns, is one unit
//! of mutual exclusion: all access goes through a single lock. A poisoned
//! lock is reported as [`NestError::Lock`] instead of panicking.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::collection::Collection;
use crate::error::{NestError, Result};

#[derive(Clone, Default)]
pub struct SharedCollection {
    inner: Arc<Mutex<Collection>>,
}

impl SharedCollection {
    pub fn new(collection: Collection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(collection)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collection>> {
        self.inner.lock().map_err(|e| {
            warn!(error = %e, "collection lock poisoned");
            NestError::Lock(e.to_string())
        })
    }

    /// Runs `f` with exclusive access to the collection.
    pub fn with<T>(&self, f: impl FnOnce(&mut Collection) -> T) -> Result<T> {
        let mut guard = self.lock()?;
        Ok(f(&mut guard))
    }

    /// Like [`SharedCollection::with`], for closures that fail on their own.
    pub fn try_with<T>(&self, f: impl FnOnce(&mut Collection) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        f(&mut guard)
    }

    /// Runs `f` on a blocking thread, so async hosts are not stalled by long
    /// scans.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Collection) -> Result<T> + Send + 'static,
    {
        let shared = self.clone();
        tokio::task::spawn_blocking(move || shared.try_with(f))
            .await
            .map_err(|e| {
                warn!(error = %e, "join error");
                NestError::Lock(e.to_string())
            })?
    }

    /// The collection itself, if no other handle is left.
    pub fn into_inner(self) -> Result<Collection> {
        let mutex = Arc::try_unwrap(self.inner)
            .map_err(|_| NestError::Lock("collection is still shared".to_string()))?;
        mutex.into_inner().map_err(|e| NestError::Lock(e.to_string()))
    }
}
