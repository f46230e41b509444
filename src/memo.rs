//! Request-coalescing memoization.
//!
//! A [`Memo`] maps a key to a shared future. The first caller for a key
//! starts the computation; concurrent callers await the same future, so N
//! simultaneous requests trigger exactly one underlying call. Finished
//! values stay cached unless they fail the memo's retain predicate, and
//! errors are never cached: both are evicted once observed so the next
//! request starts fresh.
//!
//! A memo built [`with_capacity`](Memo::with_capacity) drops its least
//! recently used finished entries once it holds more than that many keys.
//! In-flight entries are never dropped.

use crate::error::{LensError, Result};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

type SharedResult<V> = Shared<BoxFuture<'static, std::result::Result<V, Arc<LensError>>>>;

struct Entry<V: Clone> {
    generation: u64,
    last_used: u64,
    future: SharedResult<V>,
}

/// Keyed, coalescing, evict-on-failure cache.
pub struct Memo<K, V: Clone> {
    name: &'static str,
    entries: Mutex<HashMap<K, Entry<V>>>,
    retain: fn(&V) -> bool,
    capacity: Option<usize>,
    generation: AtomicU64,
}

impl<K, V> Memo<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display,
    V: Clone + Send + Sync + 'static,
{
    /// Memo that keeps every successful value.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self::retain_if(name, |_| true)
    }

    /// Memo that keeps a successful value only when `retain` returns true.
    #[must_use]
    pub fn retain_if(name: &'static str, retain: fn(&V) -> bool) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            retain,
            capacity: None,
            generation: AtomicU64::new(0),
        }
    }

    /// Keep at most `capacity` entries (at least one).
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }

    /// Return the cached value for `key`, joining an in-flight computation
    /// or starting one with `init`.
    ///
    /// # Errors
    ///
    /// Returns the computation's error, shared with every concurrent caller.
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: K, init: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (future, generation) = {
            let mut entries = self.entries.lock();
            let tick = self.generation.fetch_add(1, Ordering::Relaxed);
            if let Some(entry) = entries.get_mut(&key) {
                entry.last_used = tick;
                (entry.future.clone(), entry.generation)
            } else {
                let future = init().map(|r| r.map_err(Arc::new)).boxed().shared();
                entries.insert(
                    key.clone(),
                    Entry {
                        generation: tick,
                        last_used: tick,
                        future: future.clone(),
                    },
                );
                self.trim(&mut entries);
                (future, tick)
            }
        };

        let outcome = future.await;
        let keep = outcome.as_ref().is_ok_and(|value| (self.retain)(value));
        if !keep {
            self.evict_generation(&key, generation);
        }
        outcome.map_err(LensError::from)
    }

    // Only evict the entry this caller observed; a newer computation for the
    // same key may already have replaced it.
    fn evict_generation(&self, key: &K, generation: u64) {
        let mut entries = self.entries.lock();
        if entries
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
        {
            entries.remove(key);
            debug!(memo = self.name, key = %key, "Evicted memo entry");
        }
    }

    /// Drop the entry for `key`, if any.
    pub fn invalidate(&self, key: &K) {
        if self.entries.lock().remove(key).is_some() {
            debug!(memo = self.name, key = %key, "Invalidated memo entry");
        }
    }

    fn trim(&self, entries: &mut HashMap<K, Entry<V>>) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while entries.len() > capacity {
            let Some(oldest) = entries
                .iter()
                .filter(|(_, entry)| entry.future.peek().is_some())
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            entries.remove(&oldest);
            debug!(memo = self.name, key = %oldest, "Dropped least recently used entry");
        }
    }

    /// Number of cached or in-flight entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let memo: Memo<String, usize> = Memo::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let make = || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(7)
            }
        };

        let (a, b, c) = tokio::join!(
            memo.get_or_try_insert_with("k".to_string(), make),
            memo.get_or_try_insert_with("k".to_string(), make),
            memo.get_or_try_insert_with("k".to_string(), make),
        );

        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (7, 7, 7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(memo.len(), 1);
    }

    #[tokio::test]
    async fn errors_are_evicted_and_retried() {
        let memo: Memo<String, usize> = Memo::new("test");

        let first = memo
            .get_or_try_insert_with("k".to_string(), || async {
                Err(LensError::store("k", "boom"))
            })
            .await;
        assert!(first.is_err());
        assert!(memo.is_empty());

        let second = memo
            .get_or_try_insert_with("k".to_string(), || async { Ok(3) })
            .await;
        assert_eq!(second.unwrap(), 3);
    }

    #[tokio::test]
    async fn values_failing_retain_are_not_cached() {
        let memo: Memo<String, Vec<u8>> = Memo::retain_if("test", |v| !v.is_empty());

        let empty = memo
            .get_or_try_insert_with("k".to_string(), || async { Ok(Vec::new()) })
            .await
            .unwrap();
        assert!(empty.is_empty());
        assert!(memo.is_empty());

        let full = memo
            .get_or_try_insert_with("k".to_string(), || async { Ok(vec![1]) })
            .await
            .unwrap();
        assert_eq!(full, vec![1]);
        assert_eq!(memo.len(), 1);

        // Cached: the init closure is not consulted again.
        let cached = memo
            .get_or_try_insert_with("k".to_string(), || async { Ok(vec![9]) })
            .await
            .unwrap();
        assert_eq!(cached, vec![1]);
    }

    #[tokio::test]
    async fn capacity_drops_least_recently_used() {
        let memo: Memo<String, usize> = Memo::new("test").with_capacity(2);
        let calls = Arc::new(AtomicUsize::new(0));
        let get = |key: &'static str| {
            let calls = Arc::clone(&calls);
            memo.get_or_try_insert_with(key.to_string(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(key.len())
            })
        };

        get("a").await.unwrap();
        get("bb").await.unwrap();
        get("a").await.unwrap();
        get("ccc").await.unwrap();
        assert_eq!(memo.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // "bb" was the least recently used and had to be recomputed.
        get("a").await.unwrap();
        get("bb").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn capacity_never_drops_in_flight_entries() {
        let memo: Memo<String, usize> = Memo::new("test").with_capacity(1);
        let slow = || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(1)
        };
        let (a, b) = tokio::join!(
            memo.get_or_try_insert_with("a".to_string(), slow),
            memo.get_or_try_insert_with("b".to_string(), slow),
        );
        assert_eq!((a.unwrap(), b.unwrap()), (1, 1));
        assert!(memo.len() <= 2);
    }
}
