//! Throttle - Fixed-Window Request Rate Limiting
//!
//! This crate decides whether an action identified by a key (client address,
//! API key, ...) may proceed under an "N events per window" budget such as
//! `"5/m"`. Counters live either in a bounded in-process LRU map or in a
//! shared Redis instance so several processes can enforce one budget.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use throttle::{Limiter, LocalStore};
//!
//! # async fn run() -> throttle::Result<()> {
//! let limiter = Limiter::new("5/m", Arc::new(LocalStore::new(1000)?))?;
//! if !limiter.allow("10.0.0.1").await? {
//!     // over budget: reply 503, log, ...
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod ratelimit;
pub mod store;
pub mod telemetry;

pub use config::{Backend, StorageConfig, ThrottleConfig};
pub use error::{Result, ThrottleError};
pub use guard::Throttle;
pub use ratelimit::{CounterStore, Limiter, RateSpec, TimeWindow};
pub use store::{LocalStore, RemoteParams, RemoteStore};
