//! Key-value cache seam
//!
//! Sessions and verification codes live in an external TTL cache. The
//! [`CacheBackend`] trait is the only thing the rest of the crate knows about
//! that service, so deployments plug in their client and tests plug in
//! [`MemoryCache`].
//!
//! Every call goes through [`TimedStore`], which bounds each round trip with
//! a short timeout. A timeout is reported as [`StoreError::Timeout`] and is
//! never retried; callers treat it as the store being unavailable.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Boxed future returned by [`CacheBackend`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Cache failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// A TTL key-value cache. All operations are single-key and atomic.
pub trait CacheBackend: Send + Sync {
    /// Read a live value.
    fn get(&self, key: &str) -> StoreFuture<'_, Option<String>>;

    /// Write a value that expires after `ttl`, replacing any previous value.
    fn set(&self, key: &str, value: String, ttl: Duration) -> StoreFuture<'_, ()>;

    /// Remove a key. Returns whether it existed.
    fn delete(&self, key: &str) -> StoreFuture<'_, bool>;
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Debug)]
struct Entry {
    value: String,
    /// `None` when the TTL does not fit the clock
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Process-local cache for tests and single-instance deployments.
///
/// Expired entries are dropped lazily on read and by [`purge_expired`](Self::purge_expired).
/// Uses tokio's clock, so paused-time tests can advance past a TTL.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> StoreFuture<'_, Option<String>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(e) if e.is_live(Instant::now()) => Ok(Some(e.value.clone())),
                Some(_) => {
                    entries.remove(&key);
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }

    fn set(&self, key: &str, value: String, ttl: Duration) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            let expires_at = Instant::now().checked_add(ttl);
            self.entries.lock().insert(key, Entry { value, expires_at });
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> StoreFuture<'_, bool> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.entries.lock().remove(&key).is_some()) })
    }
}

// ============================================================================
// Timeout guard
// ============================================================================

/// A [`CacheBackend`] handle whose calls are bounded by a timeout.
#[derive(Clone)]
pub struct TimedStore {
    backend: Arc<dyn CacheBackend>,
    timeout: Duration,
}

impl std::fmt::Debug for TimedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimedStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TimedStore {
    pub fn new(backend: Arc<dyn CacheBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.bounded(self.backend.get(key)).await
    }

    pub async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        self.bounded(self.backend.set(key, value, ttl)).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.bounded(self.backend.delete(key)).await
    }

    async fn bounded<T>(&self, fut: StoreFuture<'_, T>) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn timed(backend: impl CacheBackend + 'static) -> TimedStore {
        TimedStore::new(Arc::new(backend), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = timed(MemoryCache::new());
        store.set("k", "v".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = timed(MemoryCache::new());
        store.set("k", "a".into(), Duration::from_secs(60)).await.unwrap();
        store.set("k", "b".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("b".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = Arc::new(MemoryCache::new());
        let store = TimedStore::new(cache.clone(), Duration::from_millis(50));
        store.set("k", "v".into(), Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = MemoryCache::new();
        cache.set("a", "1".into(), Duration::from_secs(1)).await.unwrap();
        cache.set("b", "2".into(), Duration::from_secs(100)).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_ttl_never_expires() {
        let cache = MemoryCache::new();
        cache.set("k", "v".into(), Duration::MAX).await.unwrap();
        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(cache.purge_expired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_backend_times_out() {
        let store = timed(HangingCache);
        assert_eq!(
            store.get("k").await,
            Err(StoreError::Timeout(Duration::from_millis(50)))
        );
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let store = timed(BrokenCache);
        assert!(matches!(store.set("k", "v".into(), Duration::from_secs(1)).await, Err(StoreError::Backend(_))));
    }
}
