//! Clock abstraction for expiry bookkeeping.
//!
//! `SystemClock` reads the monotonic clock. `MockClock` lets tests move time
//! forward explicitly; it is compiled for this crate's tests and, for
//! downstream crates, behind the `test-helpers` feature.

use std::fmt::Debug;
use std::time::Instant;

/// Source of the current monotonic time.
pub trait Clock: Send + Sync + Debug {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// System clock implementation using `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub use mock::MockClock;

#[cfg(any(test, feature = "test-helpers"))]
mod mock {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use super::Clock;

    /// Manually driven clock. Clones share the same current time.
    #[derive(Debug, Clone)]
    pub struct MockClock {
        current_time: Arc<Mutex<Instant>>,
    }

    impl MockClock {
        /// Create a clock frozen at `start`.
        pub fn new(start: Instant) -> Self {
            Self {
                current_time: Arc::new(Mutex::new(start)),
            }
        }

        /// Move the clock forward by `duration`.
        pub fn advance(&self, duration: Duration) {
            *self.current_time.lock() += duration;
        }

        /// Jump to a specific instant.
        pub fn set(&self, instant: Instant) {
            *self.current_time.lock() = instant;
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::new(Instant::now())
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            *self.current_time.lock()
        }
    }
}
