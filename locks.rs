//! Per-user reader/writer locks.
//!
//! Algorithm switches and key generation take a user's lock exclusively;
//! uploads, downloads and deletes take it shared. Different users never
//! contend. Entries are created on first use and dropped by [`UserLocks::prune`]
//! once idle.

use crate::metadata::UserId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

#[derive(Clone, Default)]
pub struct UserLocks {
    locks: Arc<DashMap<UserId, Arc<RwLock<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, user_id: UserId) -> Arc<RwLock<()>> {
        self.locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    pub async fn shared(&self, user_id: UserId) -> OwnedRwLockReadGuard<()> {
        self.lock_for(user_id).read_owned().await
    }

    pub async fn exclusive(&self, user_id: UserId) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(user_id).write_owned().await
    }

    /// Drops the entries of users nobody holds or waits on. Returns how
    /// many were removed.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        // Clones are taken under the shard lock, so a count of one means idle.
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
