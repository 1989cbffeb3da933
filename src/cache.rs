//! Bounded response cache with per-key stampede control.
//!
//! Each key maps to either a completed value with an expiry or a pending
//! in-flight fetch. Concurrent callers for the same key await the single
//! in-flight result instead of issuing duplicate upstream fetches; callers
//! for different keys never serialize each other. Errors are shared with
//! waiting callers but never cached.

use crate::error::Error;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

type Shared<V> = Result<V, Arc<Error>>;

enum Slot<V> {
    Ready { value: V, expires: Instant },
    Pending(broadcast::Sender<Shared<V>>),
}

enum Role<V> {
    Hit(V),
    Follower(broadcast::Receiver<Shared<V>>),
    Leader,
}

pub struct ResponseCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
    ttl: Duration,
    capacity: usize,
}

impl<K, V> ResponseCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Return the cached value for `key`, or run `fetch` exactly once while
    /// every concurrent caller for the same key awaits its outcome.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<V, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, Error>>,
    {
        let role = {
            let mut slots = self.slots.lock().unwrap();
            match slots.get(&key) {
                Some(Slot::Ready { value, expires }) if *expires > Instant::now() => {
                    Role::Hit(value.clone())
                }
                Some(Slot::Pending(tx)) => Role::Follower(tx.subscribe()),
                _ => {
                    let (tx, _rx) = broadcast::channel(1);
                    slots.insert(key.clone(), Slot::Pending(tx));
                    Role::Leader
                }
            }
        };

        match role {
            Role::Hit(value) => Ok(value),
            Role::Follower(mut rx) => match rx.recv().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(shared)) => Err(Error::Shared(shared)),
                // Leader went away without publishing
                Err(_) => Err(Error::Canceled),
            },
            Role::Leader => {
                // If this future is dropped mid-fetch, the guard clears the
                // pending slot so followers see Canceled instead of hanging.
                let mut guard = PendingGuard {
                    cache: self,
                    key: key.clone(),
                    armed: true,
                };
                let result = fetch().await;
                guard.armed = false;

                let tx = {
                    let mut slots = self.slots.lock().unwrap();
                    let tx = match slots.remove(&key) {
                        Some(Slot::Pending(tx)) => Some(tx),
                        Some(ready) => {
                            slots.insert(key.clone(), ready);
                            None
                        }
                        None => None,
                    };
                    if let Ok(value) = &result {
                        self.evict_locked(&mut slots);
                        slots.insert(
                            key,
                            Slot::Ready {
                                value: value.clone(),
                                expires: Instant::now() + self.ttl,
                            },
                        );
                    }
                    tx
                };

                match result {
                    Ok(value) => {
                        if let Some(tx) = tx {
                            // No receivers is fine; nobody else asked
                            let _ = tx.send(Ok(value.clone()));
                        }
                        Ok(value)
                    }
                    // The pending slot is gone, so the receiver count is
                    // final. A lone leader keeps its concrete error; the Arc
                    // wrapper exists only when someone is actually waiting.
                    Err(err) => match tx.filter(|tx| tx.receiver_count() > 0) {
                        Some(tx) => {
                            let shared = Arc::new(err);
                            let _ = tx.send(Err(Arc::clone(&shared)));
                            Err(Error::Shared(shared))
                        }
                        None => Err(err),
                    },
                }
            }
        }
    }

    /// Drop expired entries, then the soonest-expiring ready entries until
    /// a new insert fits the capacity bound. Pending slots are never evicted.
    fn evict_locked(&self, slots: &mut HashMap<K, Slot<V>>) {
        let now = Instant::now();
        slots.retain(|_, slot| match slot {
            Slot::Ready { expires, .. } => *expires > now,
            Slot::Pending(_) => true,
        });

        while slots.len() >= self.capacity {
            let oldest = slots
                .iter()
                .filter_map(|(k, slot)| match slot {
                    Slot::Ready { expires, .. } => Some((k.clone(), *expires)),
                    Slot::Pending(_) => None,
                })
                .min_by_key(|(_, expires)| *expires)
                .map(|(k, _)| k);
            match oldest {
                Some(k) => {
                    slots.remove(&k);
                }
                None => break,
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

struct PendingGuard<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    cache: &'a ResponseCache<K, V>,
    key: K,
    armed: bool,
}

impl<K, V> Drop for PendingGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.cache.slots.lock().unwrap();
        if matches!(slots.get(&self.key), Some(Slot::Pending(_))) {
            slots.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn upstream_err() -> Error {
        Error::Fetch(FetchError::Upstream {
            url: "https://example.com".to_string(),
            detail: "boom".to_string(),
        })
    }

    #[tokio::test]
    async fn concurrent_requests_trigger_exactly_one_fetch() {
        let cache: Arc<ResponseCache<String, u64>> =
            Arc::new(ResponseCache::new(Duration::from_secs(60), 16));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("popular:1".to_string(), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42u64)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_keys_fetch_independently() {
        let cache: Arc<ResponseCache<String, u64>> =
            Arc::new(ResponseCache::new(Duration::from_secs(60), 16));
        let calls = Arc::new(AtomicUsize::new(0));

        let a = {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_or_fetch("popular:1".to_string(), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(1u64)
                    })
                    .await
            })
        };
        let b = {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_or_fetch("popular:2".to_string(), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(2u64)
                    })
                    .await
            })
        };

        assert_eq!(a.await.unwrap().unwrap(), 1);
        assert_eq!(b.await.unwrap().unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entries_refetch() {
        let cache: ResponseCache<String, u64> =
            ResponseCache::new(Duration::from_millis(10), 16);
        let calls = AtomicUsize::new(0);

        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7u64)
        };
        assert_eq!(cache.get_or_fetch("k".to_string(), fetch).await.unwrap(), 7);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7u64)
        };
        assert_eq!(cache.get_or_fetch("k".to_string(), fetch).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn lone_caller_error_keeps_its_concrete_kind() {
        let cache: ResponseCache<String, u64> =
            ResponseCache::new(Duration::from_secs(60), 16);

        let err = cache
            .get_or_fetch("k".to_string(), || async {
                Err(Error::Fetch(FetchError::NotFound {
                    url: "https://example.com/manga/x/".to_string(),
                }))
            })
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Fetch(FetchError::NotFound { .. })),
            "no Shared wrapper without waiters"
        );
        assert_eq!(cache.len(), 0, "errors must not occupy a slot");

        let ok = cache
            .get_or_fetch("k".to_string(), || async { Ok(9u64) })
            .await
            .unwrap();
        assert_eq!(ok, 9);
    }

    #[tokio::test]
    async fn waiting_callers_share_the_leaders_error() {
        let cache: Arc<ResponseCache<String, u64>> =
            Arc::new(ResponseCache::new(Duration::from_secs(60), 16));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("k".to_string(), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(upstream_err())
                    })
                    .await
            }));
        }

        let mut raw = 0;
        let mut shared = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap_err() {
                Error::Fetch(FetchError::Upstream { .. }) => raw += 1,
                Error::Shared(inner) => {
                    assert!(matches!(*inner, Error::Fetch(FetchError::Upstream { .. })));
                    shared += 1;
                }
                other => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "single in-flight fetch");
        assert_eq!(raw, 1, "the leader gets the error itself");
        assert_eq!(shared, 7);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn capacity_bound_evicts_oldest_ready() {
        let cache: ResponseCache<String, u64> =
            ResponseCache::new(Duration::from_secs(60), 2);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            cache
                .get_or_fetch(key.to_string(), || async move { Ok(i as u64) })
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(cache.len() <= 2);
    }
}
