//! Per-key write serialization: write paths (`write`, `delete`,
//! `persist_single_grant`) serialize per `(zone, object_type, object_id)`
//! key under a lock, with no global write lock. Unlike `SingleFlightGroup`,
//! writers don't share a result — each write is distinct — so this is a
//! plain per-key async mutex with idle-entry cleanup, not result
//! deduplication.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub struct KeyedMutex<K> {
    locks: SyncMutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            locks: SyncMutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the per-key lock, blocking other writers to the same key
    /// but never other keys. The guard, once dropped, does not remove the
    /// map entry — a bounded number of distinct keys (zone/object_type/
    /// object_id triples under active write load) is expected to recur, so
    /// reusing the `Arc<Mutex<()>>` avoids reallocating it on every write.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut guard = self.locks.lock();
            guard.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
        };
        entry.lock_owned().await
    }

    /// Drops map entries with no outstanding clones, bounding memory when
    /// the key space (e.g. per-object locks) grows unbounded over the
    /// process lifetime. Callers wire this into a periodic sweep alongside
    /// `sweep_expired` tuple cleanup.
    pub fn evict_idle(&self) {
        self.locks.lock().retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_writes_serialize() {
        let locks: Arc<KeyedMutex<String>> = Arc::new(KeyedMutex::new());
        let order = Arc::new(AtomicU32::new(0));
        let first_seen = Arc::new(AtomicU32::new(0));

        let l1 = locks.clone();
        let o1 = order.clone();
        let f1 = first_seen.clone();
        let h1 = tokio::spawn(async move {
            let _guard = l1.lock("zone:doc:1".to_string()).await;
            tokio::time::sleep(Duration::from_millis(30)).await;
            f1.store(o1.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(5)).await;

        let l2 = locks.clone();
        let o2 = order.clone();
        let h2 = tokio::spawn(async move {
            let _guard = l2.lock("zone:doc:1".to_string()).await;
            o2.fetch_add(1, Ordering::SeqCst);
        });

        h1.await.unwrap();
        h2.await.unwrap();
        assert_eq!(first_seen.load(Ordering::SeqCst), 1);
        assert_eq!(order.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn evict_idle_removes_unreferenced_entries() {
        let locks: KeyedMutex<String> = KeyedMutex::new();
        {
            let _guard = locks.lock("a".to_string()).await;
        }
        locks.evict_idle();
        assert_eq!(locks.locks.lock().len(), 0);
    }
}
