use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hookline_core::BatchKind;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

type Key = (Uuid, BatchKind);
type LockMap = HashMap<Key, Arc<tokio::sync::Mutex<()>>>;

/// In-process async locks keyed by (campaign, batch kind).
///
/// Serializes submit, harvest and resubmission for one slot inside this
/// process. Other processes are kept out by the partial unique index on
/// `batch_jobs`. An entry lives only while someone holds or waits on it.
#[derive(Clone, Default)]
pub struct BatchLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl BatchLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, campaign_id: Uuid, kind: BatchKind) -> BatchLockGuard {
        let key = (campaign_id, kind);
        let lock = {
            let mut locks = self.map();
            Arc::clone(
                locks
                    .entry(key)
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        BatchLockGuard {
            guard: Some(lock.lock_owned().await),
            key,
            locks: self.clone(),
        }
    }

    fn map(&self) -> std::sync::MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Remove `key` if the map holds the only reference left.
    fn release(&self, key: &Key) {
        let mut locks = self.map();
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds one slot; dropping it unlocks and forgets the slot when idle.
pub struct BatchLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: Key,
    locks: BatchLocks,
}

impl Drop for BatchLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(&self.key);
    }
}
