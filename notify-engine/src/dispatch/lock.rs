//! Per-key async mutual exclusion.
//!
//! Lock handles are created on first use and shared through a `DashMap`.
//! A guard removes its entry on release when nobody else holds or awaits the
//! same key, so the map only grows with the number of keys in flight.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct KeyLock<K: Eq + Hash + Clone> {
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyLock<K> {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    fn handle(&self, key: &K) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait until `key` is free and hold it until the guard drops.
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let handle = self.handle(&key);
        let mut held = KeyGuard {
            key: Some(key),
            guard: None,
            locks: self.locks.clone(),
        };
        let acquire = handle.lock_owned();
        held.guard = Some(acquire.await);
        held
    }

    /// Take `key` only if it is free right now.
    pub fn try_lock(&self, key: K) -> Option<KeyGuard<K>> {
        let handle = self.handle(&key);
        let mut held = KeyGuard {
            key: Some(key),
            guard: None,
            locks: self.locks.clone(),
        };
        held.guard = Some(handle.try_lock_owned().ok()?);
        Some(held)
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyLock<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> fmt::Debug for KeyLock<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLock").field("keys", &self.len()).finish()
    }
}

/// Exclusive hold on one key.
pub struct KeyGuard<K: Eq + Hash + Clone> {
    key: Option<K>,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyGuard<K> {
    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        // Release first so the map holds the last reference.
        drop(self.guard.take());
        if let Some(key) = self.key.take() {
            self.locks
                .remove_if(&key, |_, handle| Arc::strong_count(handle) == 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks: KeyLock<i64> = KeyLock::new();
        {
            let _guard = locks.lock(1).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_try_lock_fails_while_held() {
        let locks: KeyLock<i64> = KeyLock::new();
        let guard = locks.lock(7).await;
        assert!(locks.try_lock(7).is_none());
        assert!(locks.try_lock(8).is_some());
        drop(guard);
        assert!(locks.try_lock(7).is_some());
        assert!(locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_never_overlaps() {
        let locks = Arc::new(KeyLock::<i64>::new());
        let inside = Arc::new(AtomicU32::new(0));
        let overlaps = Arc::new(AtomicU32::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let inside = inside.clone();
            let overlaps = overlaps.clone();
            tasks.spawn(async move {
                for _ in 0..10 {
                    let _guard = locks.lock(42).await;
                    if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_micros(100)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }
        while tasks.join_next().await.is_some() {}

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks: KeyLock<i64> = KeyLock::new();
        let _a = locks.lock(1).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock(2)).await;
        assert!(b.is_ok());
    }
}
