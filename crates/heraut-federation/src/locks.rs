//! Per-identity async locks.
//!
//! Everything that happens to one object identity (persisting it, applying
//! it, firing its event) runs under the lock for that identity.  Distinct
//! identities never contend.  Slots are dropped from the table as soon as
//! nobody holds or waits on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use heraut_shared::ObjectId;

type Slot = Arc<AsyncMutex<()>>;

#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<ObjectId, Slot>>,
}

/// Held lock on one identity. Released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    locks: Arc<KeyedLocks>,
    key: ObjectId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait until `key` is free, then hold it.
    pub async fn lock(self: &Arc<Self>, key: &ObjectId) -> KeyGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        KeyGuard {
            locks: Arc::clone(self),
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Number of identities currently held or waited on.
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl KeyGuard {
    pub fn key(&self) -> &ObjectId {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self
            .locks
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(&self.key) {
            // Only the table itself still references the slot.
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let key = ObjectId::from("a");
        let first = locks.lock(&key).await;

        let contender = {
            let locks = Arc::clone(&locks);
            let key = key.clone();
            tokio::spawn(async move {
                let _held = locks.lock(&key).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(first);
        contender.await.unwrap();
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let locks = KeyedLocks::new();
        let a = locks.lock(&ObjectId::from("a")).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(&ObjectId::from("b")))
            .await
            .expect("distinct key must not block");
        assert_eq!(locks.active(), 2);
        assert_eq!(b.key().as_str(), "b");
        drop(a);
        drop(b);
        assert_eq!(locks.active(), 0);
    }
}
