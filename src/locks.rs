// Per-resource write locks. Capture and rollup of the same resource take the
// same lock; different resources never contend.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct ResourceLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `resource_id`; released when the guard drops.
    /// Entries nobody holds or waits on are pruned, so deleted resources do
    /// not keep a mutex around.
    pub async fn lock(&self, resource_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // holders and waiters own a clone; a count of 1 means idle
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(resource_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of resources with a live lock entry.
    pub async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}
