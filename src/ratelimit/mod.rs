//! Rate limiting logic and counter storage contract.

mod backend;
mod limiter;
mod rate;

pub use backend::CounterStore;
pub use limiter::Limiter;
pub use rate::{RateSpec, TimeWindow};
