//! Counter store trait for abstracting local and remote storage.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Storage for per-key event counters with expiry.
///
/// This trait abstracts over the in-process `LocalStore` and the
/// Redis-backed `RemoteStore` so the `Limiter` can work with either.
/// A key whose expiry has passed must be reported as absent.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current count for `key`, or `None` if the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<i64>>;

    /// Create or overwrite `key` with `value`, expiring `ttl` from now.
    async fn set_initial(&self, key: &str, value: i64, ttl: Duration) -> Result<()>;

    /// Add one to the stored count without touching its expiry.
    ///
    /// Returns the new count, or `KeyNotFound` if the key is absent.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Reset the expiry of `key` to `ttl` from now, keeping its count.
    ///
    /// Returns `KeyNotFound` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
}
