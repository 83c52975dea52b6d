//! Per-entity write serialization.
//!
//! Two concurrent operations touching the same account or org could
//! otherwise interleave their read-modify-write steps at await points and
//! silently lose one side's update. The queue maps entity identity to a
//! FIFO-fair mutex; an operation acquires every relevant id before running
//! and releases them all when its guard drops, success or not.
//!
//! The registry is in-process memory only - it does not provide
//! cross-instance exclusion for horizontally scaled deployments.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct WriteQueue {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire exclusive access to every id in the set.
    ///
    /// Ids are deduplicated and locked in sorted order, so any two
    /// operations request overlapping ids in the same total order and
    /// cannot deadlock. Unrelated ids proceed fully concurrently.
    pub async fn acquire(&self, mut ids: Vec<String>) -> WriteGuard {
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let lock = self
                .locks
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            guards.push(lock.lock_owned().await);
        }
        WriteGuard { _guards: guards }
    }
}

/// Held for the duration of a protected operation; dropping it wakes the
/// next waiter on each id, even if the operation failed.
pub struct WriteGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}
