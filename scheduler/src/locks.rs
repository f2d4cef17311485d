//! In-process advisory locking for sweep critical sections.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use dispatch_core::{AdvisoryLocker, LockLease, Result};

/// Lock key for the `(project_id, role)` sweep critical section.
///
/// Only needs to be stable within the process: the lock backend is
/// in-process, and a database file has a single dispatcher process.
pub fn sweep_key(project_id: &str, role: &str) -> i64 {
    let mut hasher = DefaultHasher::new();
    project_id.hash(&mut hasher);
    role.hash(&mut hasher);
    hasher.finish() as i64
}

/// Advisory locker backed by one async mutex per key.
///
/// The guard is released on drop, covering every exit path out of the
/// critical section. Keys are never evicted; the map is bounded by the
/// number of distinct (project, role) pairs the process has swept.
pub struct KeyedLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}

struct Lease {
    _guard: OwnedMutexGuard<()>,
}

impl LockLease for Lease {}

#[async_trait]
impl AdvisoryLocker for KeyedLocks {
    async fn acquire(&self, key: i64) -> Result<Box<dyn LockLease>> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
        };
        let guard = lock.lock_owned().await;
        Ok(Box::new(Lease { _guard: guard }))
    }
}
