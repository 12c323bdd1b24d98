use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockMap = DashMap<Uuid, Arc<Mutex<()>>>;

/// Per-user async mutexes
///
/// Holding a user's guard serializes every per-user critical section: the
/// similarity/suggestion recompute chain and the remove-then-add pair of an
/// interaction move. Different users never contend. A user's entry lives only
/// while someone holds or waits on it.
#[derive(Clone, Default)]
pub struct UserLocks {
    locks: Arc<LockMap>,
}

/// Exclusive access to one user's state; releasing it drops the user's entry
/// once nobody else holds or waits on it
pub struct UserGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
    user_id: Uuid,
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the Arc, so a count of 1 means only the map does.
        // The shard lock taken here also excludes a concurrent `acquire`.
        self.locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `user_id`'s state
    pub async fn acquire(&self, user_id: Uuid) -> UserGuard {
        // Clone the Arc out first so the map shard is not held across the await
        let lock = self.locks.entry(user_id).or_default().clone();
        UserGuard {
            guard: Some(lock.lock_owned().await),
            locks: self.locks.clone(),
            user_id,
        }
    }

    /// Users with a held or awaited lock
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
