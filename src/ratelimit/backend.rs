//! Rate limiter trait for abstracting service-wide and per-key limiting.

use std::time::{Duration, Instant};

use super::counter::ceil_secs;

/// Trait for rate limiter implementations.
///
/// Implemented by a lone [`WindowCounter`](super::WindowCounter), which
/// limits all callers together and ignores the key, and by
/// [`KeyedLimiter`](super::KeyedLimiter), which keeps one counter per key.
pub trait RateLimiter: Send + Sync {
    /// Record a hit for `key` and report whether it is allowed.
    fn allow(&self, key: &str) -> bool;

    /// The hit that will be overwritten next, if any.
    fn oldest(&self, key: &str) -> Option<Instant>;

    /// The most recently admitted hit, if any.
    fn newest(&self, key: &str) -> Option<Instant>;

    /// Time between the oldest and newest hit; `capacity / span` is the
    /// observed rate.
    fn span(&self, key: &str) -> Duration;

    /// Change the number of hits admitted per window.
    fn resize(&self, key: &str, new_capacity: usize);

    /// How long until `key` would be allowed again.
    fn retry_after(&self, key: &str) -> Duration;

    /// [`retry_after`](RateLimiter::retry_after) rounded up to whole seconds.
    fn retry_after_secs(&self, key: &str) -> u64 {
        ceil_secs(self.retry_after(key))
    }

    /// Release background resources.
    fn close(&self);
}
