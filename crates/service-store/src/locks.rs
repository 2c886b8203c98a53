//! Per-service-ID mutexes whose entries disappear once idle.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes work on the same service ID without blocking other IDs.
///
/// An entry lives only while some caller holds or waits for it, so the map
/// does not grow with every ID ever seen.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `service_id`.
    pub async fn lock(&self, service_id: &str) -> KeyedGuard<'_> {
        let lock = self
            .locks
            .entry(service_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        KeyedGuard {
            locks: &self.locks,
            service_id: service_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of IDs currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one service ID, released on drop.
pub struct KeyedGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    service_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters hold their own clone, so a count of one means only the map is left.
        self.locks
            .remove_if(&self.service_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
