//! Sliding-window rate limiting.

mod backend;
mod counter;
mod limiter;

pub use backend::RateLimiter;
pub use counter::{ceil_secs, CounterStatus, WindowCounter, UNKNOWN_SPAN};
pub use limiter::KeyedLimiter;
