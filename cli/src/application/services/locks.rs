//! Per-machine async locks.
//!
//! `MachineLocks` queues workflows for the same machine inside one process.
//! The store's lock then excludes other processes. The persisted state is
//! re-checked after acquiring both.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct MachineLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl MachineLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `machine_id`.
    pub async fn acquire(&self, machine_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|id, l| id == machine_id || Arc::strong_count(l) > 1);
            Arc::clone(map.entry(machine_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Both halves of a machine lock. Dropping it releases the shared lock first.
pub struct Exclusive<L> {
    _shared: L,
    _local: OwnedMutexGuard<()>,
}

impl<L> Exclusive<L> {
    #[must_use]
    pub fn new(local: OwnedMutexGuard<()>, shared: L) -> Self {
        Self {
            _shared: shared,
            _local: local,
        }
    }
}
