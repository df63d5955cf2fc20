//! In-process counter store with LRU eviction and lazy TTL expiry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, ThrottleError};
use crate::ratelimit::CounterStore;

/// Default maximum number of keys held by a `LocalStore`.
pub const DEFAULT_CAPACITY: usize = 1000;

/// A value held by the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// An integer counter
    Integer(i64),
    /// Arbitrary text; cannot be incremented
    Text(String),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

struct Entry {
    value: Value,
    /// `None` means the entry never expires
    expires_at: Option<Instant>,
    /// Position in the recency order
    tick: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Entry map plus recency order. Only ever touched with the store lock held.
#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Recency tick -> key; the first entry is the least recently used
    recency: BTreeMap<u64, String>,
    next_tick: u64,
}

impl Inner {
    fn bump_tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Move `key` to the most recently used position.
    fn touch(&mut self, key: &str) {
        let tick = self.bump_tick();
        if let Some(entry) = self.entries.get_mut(key) {
            let old = std::mem::replace(&mut entry.tick, tick);
            if let Some(owned) = self.recency.remove(&old) {
                self.recency.insert(tick, owned);
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }

    /// Read with recency update and lazy expiry.
    fn read(&mut self, key: &str, now: Instant) -> Option<&Value> {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.touch(key);

        let expired = self.entries.get(key).is_some_and(|entry| entry.is_expired(now));
        if expired {
            trace!(key = %key, "Dropping expired entry");
            self.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Live entry for a write that must not change recency.
    fn live_entry(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            self.remove(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    /// Insert or overwrite, evicting the least recently used key if a new
    /// key would exceed `capacity`.
    fn write(&mut self, key: &str, value: Value, expires_at: Option<Instant>, capacity: usize) {
        if self.remove(key).is_none() && self.entries.len() >= capacity {
            if let Some((_, evicted)) = self.recency.pop_first() {
                self.entries.remove(&evicted);
                debug!(key = %evicted, capacity = capacity, "Evicted least recently used key");
            }
        }

        let tick = self.bump_tick();
        self.recency.insert(tick, key.to_string());
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                tick,
            },
        );
    }
}

/// A bounded, TTL-aware counter map for a single process.
///
/// Every operation, reads included, runs under one store-wide lock, so
/// operations are linearizable with respect to each other. Expired entries
/// are dropped lazily when next accessed; there is no background sweep.
pub struct LocalStore {
    inner: Mutex<Inner>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl LocalStore {
    /// Create a store holding at most `capacity` keys.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_clock(capacity, Arc::new(SystemClock::new()))
    }

    /// Create a store that reads time from `clock`.
    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Result<Self> {
        if capacity == 0 {
            return Err(ThrottleError::Config(
                "local store capacity must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            inner: Mutex::new(Inner::default()),
            capacity,
            clock,
        })
    }

    /// Maximum number of keys held at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored keys, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is present and live. Does not affect recency.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Raw read: the stored value if present and live.
    ///
    /// Marks the key as most recently used, even when it turns out to be expired.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        self.inner.lock().read(key, now).cloned()
    }

    /// Raw overwrite. With `ttl` of `None` the entry never expires, and
    /// neither does one whose deadline is past what `Instant` can represent.
    pub fn insert(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let expires_at = ttl.and_then(|ttl| self.clock.now().checked_add(ttl));
        self.inner.lock().write(key, value, expires_at, self.capacity);
    }

    /// Remove `key`, returning its value if it was live.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        self.inner
            .lock()
            .remove(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value)
    }

    /// Drop every key.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: DEFAULT_CAPACITY,
            clock: Arc::new(SystemClock::new()),
        }
    }
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CounterStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        match self.get_value(key) {
            None => Ok(None),
            Some(Value::Integer(count)) => Ok(Some(count)),
            Some(Value::Text(_)) => Err(ThrottleError::NotAnInteger(key.to_string())),
        }
    }

    async fn set_initial(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        self.insert(key, Value::Integer(value), Some(ttl));
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let entry = inner
            .live_entry(key, now)
            .ok_or_else(|| ThrottleError::KeyNotFound(key.to_string()))?;

        match &mut entry.value {
            Value::Integer(count) => {
                *count = count.saturating_add(1);
                Ok(*count)
            }
            Value::Text(_) => Err(ThrottleError::NotAnInteger(key.to_string())),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let entry = inner
            .live_entry(key, now)
            .ok_or_else(|| ThrottleError::KeyNotFound(key.to_string()))?;
        entry.expires_at = now.checked_add(ttl);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn mock_store(capacity: usize) -> (LocalStore, MockClock) {
        let clock = MockClock::default();
        let store = LocalStore::with_clock(capacity, Arc::new(clock.clone())).unwrap();
        (store, clock)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(LocalStore::new(0), Err(ThrottleError::Config(_))));
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(LocalStore::default().capacity(), DEFAULT_CAPACITY);
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let (store, _) = mock_store(4);
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lru_eviction_respects_reads() {
        let (store, _) = mock_store(2);
        store.insert("a", Value::Integer(1), None);
        store.insert("b", Value::Integer(2), None);

        // Reading `a` makes `b` the least recently used key
        assert_eq!(store.get("a").await.unwrap(), Some(1));
        store.insert("c", Value::Integer(3), None);

        assert!(store.contains_key("a"));
        assert!(!store.contains_key("b"));
        assert!(store.contains_key("c"));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_lru_eviction_without_reads_drops_oldest() {
        let (store, _) = mock_store(2);
        store.insert("a", Value::Integer(1), None);
        store.insert("b", Value::Integer(2), None);
        store.insert("c", Value::Integer(3), None);

        assert_eq!(store.get_value("a"), None);
        assert_eq!(store.get_value("b"), Some(Value::Integer(2)));
        assert_eq!(store.get_value("c"), Some(Value::Integer(3)));
    }

    #[test]
    fn test_overwrite_existing_key_does_not_evict() {
        let (store, _) = mock_store(2);
        store.insert("a", Value::Integer(1), None);
        store.insert("b", Value::Integer(2), None);
        store.insert("a", Value::Integer(10), None);

        assert_eq!(store.len(), 2);
        assert_eq!(store.get_value("a"), Some(Value::Integer(10)));
        assert_eq!(store.get_value("b"), Some(Value::Integer(2)));

        // The reads above leave `a` as the least recently used key
        store.insert("c", Value::Integer(3), None);
        assert!(!store.contains_key("a"));
        assert!(store.contains_key("b"));
    }

    #[tokio::test]
    async fn test_ttl_expiry_with_mock_clock() {
        let (store, clock) = mock_store(4);
        store.set_initial("x", 1, Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.get("x").await.unwrap(), Some(1));

        clock.advance(Duration::from_millis(999));
        assert_eq!(store.get("x").await.unwrap(), Some(1));

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.get("x").await.unwrap(), None);
        assert_eq!(store.len(), 0, "expired entry should be removed on read");
    }

    #[tokio::test]
    async fn test_ttl_expiry_real_time() {
        let store = LocalStore::new(4).unwrap();
        store.set_initial("x", 1, Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.get("x").await.unwrap(), Some(1));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(store.get("x").await.unwrap(), None);
    }

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let (store, clock) = mock_store(4);
        store.insert("forever", Value::Integer(5), None);
        clock.advance(Duration::from_secs(86400 * 365));
        assert_eq!(store.get_value("forever"), Some(Value::Integer(5)));
    }

    #[tokio::test]
    async fn test_incr_preserves_expiry() {
        let (store, clock) = mock_store(4);
        store.set_initial("k", 1, Duration::from_secs(10)).await.unwrap();

        clock.advance(Duration::from_secs(6));
        assert_eq!(store.incr("k").await.unwrap(), 2);
        assert_eq!(store.incr("k").await.unwrap(), 3);

        clock.advance(Duration::from_secs(4));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr_missing_key() {
        let (store, _) = mock_store(4);
        let err = store.incr("nope").await.unwrap_err();
        assert!(err.is_key_not_found());
    }

    #[tokio::test]
    async fn test_incr_expired_key_reports_missing() {
        let (store, clock) = mock_store(4);
        store.set_initial("k", 1, Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(2));

        assert!(store.incr("k").await.unwrap_err().is_key_not_found());
        assert!(store.expire("k", Duration::from_secs(1)).await.unwrap_err().is_key_not_found());
    }

    #[tokio::test]
    async fn test_incr_text_value() {
        let (store, _) = mock_store(4);
        store.insert("name", "hoge".into(), None);

        assert!(matches!(store.incr("name").await, Err(ThrottleError::NotAnInteger(_))));
        assert!(matches!(store.get("name").await, Err(ThrottleError::NotAnInteger(_))));
    }

    #[tokio::test]
    async fn test_expire_resets_deadline_and_keeps_count() {
        let (store, clock) = mock_store(4);
        store.set_initial("k", 3, Duration::from_secs(2)).await.unwrap();

        clock.advance(Duration::from_secs(1));
        store.expire("k", Duration::from_secs(2)).await.unwrap();

        clock.advance(Duration::from_millis(1500));
        assert_eq!(store.get("k").await.unwrap(), Some(3));

        clock.advance(Duration::from_millis(500));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expire_missing_key() {
        let (store, _) = mock_store(4);
        let err = store.expire("nope", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ThrottleError::KeyNotFound(ref key) if key == "nope"));
    }

    #[test]
    fn test_remove_and_clear() {
        let (store, _) = mock_store(4);
        store.insert("a", Value::Integer(1), None);
        store.insert("b", Value::Integer(2), None);

        assert_eq!(store.remove("a"), Some(Value::Integer(1)));
        assert_eq!(store.remove("a"), None);
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());

        // Recency order is rebuilt cleanly after a clear
        store.insert("c", Value::Integer(3), None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_huge_ttl_never_expires() {
        let (store, clock) = mock_store(4);
        let forever = Duration::from_secs(u64::MAX);

        store.set_initial("k", 1, forever).await.unwrap();
        assert_eq!(store.incr("k").await.unwrap(), 2);
        store.expire("k", forever).await.unwrap();
        store.insert("raw", Value::Integer(7), Some(forever));

        clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));
        assert_eq!(store.get("k").await.unwrap(), Some(2));
        assert_eq!(store.get_value("raw"), Some(Value::Integer(7)));
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(LocalStore::new(16).unwrap());
        store.insert("shared", Value::Integer(0), None);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        tokio_test::block_on(store.incr("shared")).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get_value("shared"), Some(Value::Integer(800)));
    }
}
