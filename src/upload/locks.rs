//! Per-resource mutual exclusion
//!
//! Serializes load -> write -> persist for requests that target the same
//! chunk file. Requests for different resources never contend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lock table keyed by chunk file path
#[derive(Clone, Default)]
pub struct ResourceLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the resource at `key`
    pub async fn acquire(&self, key: &Path) -> ResourceGuard {
        let lock = {
            let mut table = self.inner.lock();
            table
                .entry(key.to_path_buf())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = lock.lock_owned().await;
        ResourceGuard {
            table: self.inner.clone(),
            key: key.to_path_buf(),
            guard: Some(guard),
        }
    }

    /// Number of resources with a live lock entry
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held for the duration of one resource transition
pub struct ResourceGuard {
    table: Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>,
    key: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        self.guard.take();

        // Table entry plus nobody waiting: forget the lock
        if let Some(lock) = table.get(&self.key) {
            if Arc::strong_count(lock) == 1 {
                table.remove(&self.key);
            }
        }
    }
}
