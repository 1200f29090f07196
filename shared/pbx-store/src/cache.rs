//! Shared cache client
//!
//! The idempotency store and the rate-limit counters are the only mutable
//! state the routing core shares between requests. Both go through this
//! trait so two racing deliveries of the same webhook cannot both win a
//! non-atomic read-then-write: `put_if_absent` and `incr` are atomic.
//!
//! Contract for external backends: a failed cache operation is fail-open —
//! callers log and continue rather than rejecting traffic.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Counter state after an `incr`, enough to build rate-limit headers.
#[derive(Debug, Clone, Copy)]
pub struct CounterWindow {
    /// Count including this increment.
    pub count: u64,
    /// Time until the window resets.
    pub reset_in: Duration,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store only if the key is absent (or expired). Returns true when this
    /// caller won the slot.
    async fn put_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool>;

    /// Atomically increment a fixed-window counter, creating the window on
    /// first use and resetting it on expiry.
    async fn incr(&self, key: &str, window: Duration) -> Result<CounterWindow>;
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

struct Counter {
    count: u64,
    window_start: Instant,
}

/// In-process cache backed by DashMap. Entry-level locking makes
/// `put_if_absent` and `incr` atomic without a global lock.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    counters: DashMap<String, Counter>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Lazy eviction of expired entries
        self.entries
            .remove_if(key, |_, e| e.expires_at <= Instant::now());
        Ok(None)
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut won = false;
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| {
            won = true;
            Entry {
                value: value.clone(),
                expires_at: now + ttl,
            }
        });
        if !won && entry.expires_at <= now {
            entry.value = value;
            entry.expires_at = now + ttl;
            won = true;
        }
        Ok(won)
    }

    async fn incr(&self, key: &str, window: Duration) -> Result<CounterWindow> {
        let now = Instant::now();
        let mut counter = self.counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            window_start: now,
        });

        if now.duration_since(counter.window_start) >= window {
            counter.count = 0;
            counter.window_start = now;
        }

        counter.count += 1;
        let elapsed = now.duration_since(counter.window_start);
        Ok(CounterWindow {
            count: counter.count,
            reset_in: window.saturating_sub(elapsed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stored_values_round_trip() {
        let cache = MemoryCache::new();
        cache
            .put_if_absent("k", b"value".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"value".to_vec()));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent_and_reopen_the_slot() {
        let cache = MemoryCache::new();
        cache
            .put_if_absent("k", b"v".to_vec(), Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        let won = cache
            .put_if_absent("k", b"w".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(won);
    }

    #[tokio::test]
    async fn put_if_absent_admits_exactly_one_writer() {
        let cache = MemoryCache::new();
        let first = cache
            .put_if_absent("k", b"a".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        let second = cache
            .put_if_absent("k", b"b".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(cache.get("k").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn incr_counts_within_window_and_resets_after() {
        let cache = MemoryCache::new();
        let w = cache.incr("c", Duration::from_millis(30)).await.unwrap();
        assert_eq!(w.count, 1);
        let w = cache.incr("c", Duration::from_millis(30)).await.unwrap();
        assert_eq!(w.count, 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let w = cache.incr("c", Duration::from_millis(30)).await.unwrap();
        assert_eq!(w.count, 1);
    }

    #[tokio::test]
    async fn counters_are_isolated_by_key() {
        let cache = MemoryCache::new();
        cache.incr("org-a", Duration::from_secs(60)).await.unwrap();
        cache.incr("org-a", Duration::from_secs(60)).await.unwrap();
        let w = cache.incr("org-b", Duration::from_secs(60)).await.unwrap();
        assert_eq!(w.count, 1);
    }
}
