//! Fixed-window admission decisions.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use super::backend::CounterStore;
use super::rate::RateSpec;
use crate::error::Result;

/// Decides whether an event for a key may proceed under a fixed-window budget.
///
/// The limiter holds a shared handle to its store; the same store may back
/// several limiters. A key counts events in a window that starts with its
/// first event. Once the budget is spent, every further attempt pushes the
/// window's expiry a full window into the future, so a client that keeps
/// retrying stays blocked until it has been quiet for one whole window.
pub struct Limiter {
    spec: RateSpec,
    store: Arc<dyn CounterStore>,
}

impl Limiter {
    /// Create a limiter from a rate string such as `"5/m"`.
    pub fn new(rate: &str, store: Arc<dyn CounterStore>) -> Result<Self> {
        Ok(Self::from_spec(RateSpec::parse(rate)?, store))
    }

    /// Create a limiter from an already parsed rate.
    pub fn from_spec(spec: RateSpec, store: Arc<dyn CounterStore>) -> Self {
        Self { spec, store }
    }

    /// The budget this limiter enforces.
    pub fn spec(&self) -> &RateSpec {
        &self.spec
    }

    /// The store holding this limiter's counters.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Record an event for `key` and report whether it may proceed.
    ///
    /// Store failures other than a key expiring mid-decision are returned
    /// unchanged; nothing is retried.
    pub async fn allow(&self, key: &str) -> Result<bool> {
        let window = self.spec.window().duration();

        let current = match self.store.get(key).await? {
            Some(current) => current,
            None => {
                self.store.set_initial(key, 1, window).await?;
                trace!(key = %key, "Opened new window");
                return Ok(true);
            }
        };

        if self.spec.admits(current) {
            return match self.store.incr(key).await {
                Ok(count) => {
                    trace!(key = %key, count = count, limit = self.spec.limit(), "Event admitted");
                    Ok(true)
                }
                Err(err) if err.is_key_not_found() => self.restart_window(key).await,
                Err(err) => Err(err),
            };
        }

        match self.store.expire(key, window).await {
            Ok(()) => {
                debug!(
                    key = %key,
                    count = current,
                    limit = self.spec.limit(),
                    "Rate limit exceeded"
                );
                Ok(false)
            }
            Err(err) if err.is_key_not_found() => self.restart_window(key).await,
            Err(err) => Err(err),
        }
    }

    /// The key expired between the read and the follow-up write; treat this
    /// event as the first of a fresh window.
    async fn restart_window(&self, key: &str) -> Result<bool> {
        debug!(key = %key, "Key expired during decision, starting a new window");
        self.store
            .set_initial(key, 1, self.spec.window().duration())
            .await?;
        Ok(true)
    }
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}
