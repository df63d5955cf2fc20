//! Wrapping actions with a limiter.
//!
//! A `Throttle` ties a limiter to a function that names the caller (client
//! address, API key, ...) and a handler that builds the fallback value when
//! the caller is over budget. Framework adapters sit on top of this.

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::ratelimit::Limiter;

/// A limiter bound to an identity source and a rejection handler.
pub struct Throttle<K, R> {
    limiter: Arc<Limiter>,
    identity: K,
    on_reject: R,
}

impl<K, R> Throttle<K, R>
where
    K: Fn() -> String,
{
    /// Create a guard. `identity` is called once per action to derive the key;
    /// `on_reject` receives that key when the action is refused.
    pub fn new<E>(limiter: Arc<Limiter>, identity: K, on_reject: R) -> Self
    where
        R: Fn(&str) -> E,
    {
        Self {
            limiter,
            identity,
            on_reject,
        }
    }

    /// The wrapped limiter.
    pub fn limiter(&self) -> &Arc<Limiter> {
        &self.limiter
    }

    /// Record an event for the current identity and report whether it may proceed.
    pub async fn check(&self) -> Result<bool> {
        let key = (self.identity)();
        self.limiter.allow(&key).await
    }

    /// Run `action` if the current identity is within budget.
    ///
    /// Returns `Ok(Ok(output))` when the action ran, `Ok(Err(fallback))` when
    /// it was refused, and `Err` when the store could not be consulted.
    pub async fn call<F, Fut, T, E>(&self, action: F) -> Result<std::result::Result<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        R: Fn(&str) -> E,
    {
        let key = (self.identity)();
        if self.limiter.allow(&key).await? {
            Ok(Ok(action().await))
        } else {
            debug!(key = %key, "Action throttled");
            Ok(Err((self.on_reject)(&key)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThrottleError;
    use crate::ratelimit::CounterStore;
    use crate::store::LocalStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn limiter(rate: &str) -> Arc<Limiter> {
        Arc::new(Limiter::new(rate, Arc::new(LocalStore::default())).unwrap())
    }

    #[test]
    fn test_call_runs_action_until_budget_spent() {
        let throttle = Throttle::new(
            limiter("2/m"),
            || "10.0.0.1".to_string(),
            |key: &str| format!("503 throttled: {}", key),
        );
        let runs = AtomicUsize::new(0);
        let runs = &runs;

        for _ in 0..2 {
            let outcome = tokio_test::block_on(throttle.call(move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                "ok"
            }))
            .unwrap();
            assert_eq!(outcome, Ok("ok"));
        }

        let outcome = tokio_test::block_on(throttle.call(move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            "ok"
        }))
        .unwrap();
        assert_eq!(outcome, Err("503 throttled: 10.0.0.1".to_string()));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_identity_selects_key() {
        let shared = limiter("1/m");
        let current = Arc::new(parking_lot::Mutex::new("alice".to_string()));
        let source = Arc::clone(&current);

        let throttle = Throttle::new(shared, move || source.lock().clone(), |_: &str| ());

        assert!(throttle.check().await.unwrap());
        assert!(!throttle.check().await.unwrap());

        *current.lock() = "bob".to_string();
        assert!(throttle.check().await.unwrap());
    }

    struct UnreachableStore;

    #[async_trait]
    impl CounterStore for UnreachableStore {
        async fn get(&self, _key: &str) -> Result<Option<i64>> {
            Err(ThrottleError::Config("store offline".to_string()))
        }

        async fn set_initial(&self, _key: &str, _value: i64, _ttl: Duration) -> Result<()> {
            Ok(())
        }

        async fn incr(&self, _key: &str) -> Result<i64> {
            Ok(0)
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_failure_skips_action_and_handler() {
        let limiter = Arc::new(Limiter::new("1/s", Arc::new(UnreachableStore)).unwrap());
        let rejected = Arc::new(AtomicUsize::new(0));
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&rejected);
        let throttle = Throttle::new(limiter, || "k".to_string(), move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let counter = Arc::clone(&ran);
        let result = throttle
            .call(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert!(matches!(result, Err(ThrottleError::Config(_))));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(rejected.load(Ordering::SeqCst), 0);
    }
}
