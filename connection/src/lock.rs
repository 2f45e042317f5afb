use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use abi::types::UserId;

type PairKey = (UserId, UserId);

/// Mutual exclusion per unordered user pair.
///
/// A->B and B->A share one lock, so a request, its counter-request and their
/// accept/reject never interleave. Entries live only while someone holds or
/// waits for them.
#[derive(Debug, Default, Clone)]
pub struct PairLocks {
    locks: Arc<DashMap<PairKey, Arc<Mutex<()>>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, a: UserId, b: UserId) -> PairGuard {
        let key = if a <= b { (a, b) } else { (b, a) };
        // clone the Arc out before awaiting so no shard lock is held across the await
        let mutex = self.locks.entry(key).or_default().value().clone();
        let guard = mutex.lock_owned().await;
        PairGuard {
            guard: Some(guard),
            key,
            locks: self.locks.clone(),
        }
    }

    /// number of pairs currently locked or contended
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct PairGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: PairKey,
    locks: Arc<DashMap<PairKey, Arc<Mutex<()>>>>,
}

impl Drop for PairGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // the map holds one reference; anything above that is a waiter
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
