//! Per-key rate limiter with idle eviction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::backend::RateLimiter;
use super::counter::{CounterStatus, WindowCounter, UNKNOWN_SPAN};
use crate::config::LimiterConfig;

/// Counters by key, shared between the limiter and its sweep task.
///
/// Lock order is always registry, then counter.
struct Registry {
    counters: RwLock<HashMap<String, WindowCounter>>,
    /// Capacity given to new counters
    capacity: usize,
    /// Window given to new counters
    window: Duration,
}

impl Registry {
    fn allow(&self, key: &str) -> bool {
        // The read guard stays held while recording so the sweep cannot
        // evict the counter between lookup and admission.
        {
            let counters = self.counters.read();
            if let Some(counter) = counters.get(key) {
                return Self::record(key, counter);
            }
        }

        // Another caller may have created the counter since the read; the
        // entry API makes creation under the write lock exactly-once.
        let mut counters = self.counters.write();
        let counter = counters.entry(key.to_string()).or_insert_with(|| {
            debug!(
                key = %key,
                capacity = self.capacity,
                window = ?self.window,
                "Creating new window counter"
            );
            WindowCounter::new(self.capacity, self.window)
        });
        Self::record(key, counter)
    }

    fn record(key: &str, counter: &WindowCounter) -> bool {
        let admitted = counter.try_record_now();
        if !admitted {
            trace!(key = %key, "Rate limit exceeded");
        }
        admitted
    }

    fn with_counter<R>(&self, key: &str, f: impl FnOnce(&WindowCounter) -> R) -> Option<R> {
        self.counters.read().get(key).map(f)
    }

    fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut counters = self.counters.write();
        let before = counters.len();
        counters.retain(|_, counter| counter.is_active_at(now));
        let evicted = before - counters.len();

        if evicted > 0 {
            debug!(evicted, remaining = counters.len(), "Evicted idle counters");
        }
        evicted
    }
}

/// Periodically evict idle counters until `shutdown` is cancelled.
async fn run_sweeper(registry: Arc<Registry>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Idle sweep shutting down");
                break;
            }
            _ = interval.tick() => {
                registry.evict_idle();
            }
        }
    }
}

/// Rate limits an unbounded set of keys with one [`WindowCounter`] each.
///
/// Counters are created on a key's first [`allow`](KeyedLimiter::allow) and
/// removed by a background sweep once their newest hit has left the window,
/// which bounds memory under churn of short-lived keys. A key that returns
/// after eviction starts over with an empty counter.
///
/// The sweep runs on the Tokio runtime the limiter was created on and stops
/// on [`close`](KeyedLimiter::close) or when the limiter is dropped.
pub struct KeyedLimiter {
    registry: Arc<Registry>,
    sweep_interval: Duration,
    shutdown_token: CancellationToken,
    closed: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl KeyedLimiter {
    /// Create a limiter from configuration and start its idle sweep.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &LimiterConfig) -> Self {
        Self::with_params(config.capacity, config.window(), config.sweep_interval())
    }

    /// Create a limiter admitting `capacity` hits per `window` for each key,
    /// sweeping idle keys every `sweep_interval`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_params(capacity: usize, window: Duration, sweep_interval: Duration) -> Self {
        let sweep_interval = sweep_interval.max(Duration::from_millis(1));
        let registry = Arc::new(Registry {
            counters: RwLock::new(HashMap::new()),
            capacity,
            window,
        });

        let shutdown_token = CancellationToken::new();
        let sweeper = tokio::spawn(run_sweeper(
            Arc::clone(&registry),
            sweep_interval,
            shutdown_token.clone(),
        ));

        debug!(
            capacity,
            window = ?window,
            sweep_interval = ?sweep_interval,
            "Keyed limiter initialized"
        );

        Self {
            registry,
            sweep_interval,
            shutdown_token,
            closed: AtomicBool::new(false),
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Record a hit for `key` and report whether it is allowed.
    pub fn allow(&self, key: &str) -> bool {
        self.registry.allow(key)
    }

    /// The hit `key` will overwrite next. `None` for unknown keys.
    pub fn oldest(&self, key: &str) -> Option<Instant> {
        self.registry.with_counter(key, |c| c.oldest()).flatten()
    }

    /// The most recent admitted hit for `key`. `None` for unknown keys.
    pub fn newest(&self, key: &str) -> Option<Instant> {
        self.registry.with_counter(key, |c| c.newest()).flatten()
    }

    /// Span of `key`'s counter, or [`UNKNOWN_SPAN`] for unknown keys.
    pub fn span(&self, key: &str) -> Duration {
        self.registry
            .with_counter(key, |c| c.span())
            .unwrap_or(UNKNOWN_SPAN)
    }

    /// How long until `key` is allowed again. Unknown keys never wait.
    pub fn retry_after(&self, key: &str) -> Duration {
        self.registry
            .with_counter(key, |c| c.retry_after())
            .unwrap_or(Duration::ZERO)
    }

    /// Resize `key`'s counter. Unknown keys are ignored.
    pub fn resize(&self, key: &str, new_capacity: usize) {
        if self
            .registry
            .with_counter(key, |c| c.resize(new_capacity))
            .is_none()
        {
            trace!(key = %key, "Ignoring resize of unknown key");
        }
    }

    /// Snapshot of `key`'s counter, if it is tracked.
    pub fn status(&self, key: &str) -> Option<CounterStatus> {
        self.registry.with_counter(key, |c| c.status())
    }

    /// Remove every counter with no hit inside the window.
    ///
    /// Returns the number of keys evicted. Called periodically by the
    /// background sweep.
    pub fn evict_idle(&self) -> usize {
        self.registry.evict_idle()
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.registry.counters.read().len()
    }

    /// Whether `key` currently has a counter.
    pub fn contains_key(&self, key: &str) -> bool {
        self.registry.counters.read().contains_key(key)
    }

    /// Capacity given to newly created counters.
    pub fn capacity(&self) -> usize {
        self.registry.capacity
    }

    /// Window given to newly created counters.
    pub fn window(&self) -> Duration {
        self.registry.window
    }

    /// Period of the idle sweep.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Stop the idle sweep. Safe to call more than once.
    ///
    /// Counters stay usable; they are just no longer evicted.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown_token.cancel();
        info!(tracked_keys = self.tracked_keys(), "Keyed limiter closed");
    }

    /// Whether [`close`](KeyedLimiter::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the idle sweep and wait for it to finish.
    pub async fn shutdown(&self) {
        self.close();

        let sweeper = self.sweeper.lock().take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                warn!(error = %e, "Idle sweep task failed");
            }
        }
    }
}

impl Drop for KeyedLimiter {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

impl std::fmt::Debug for KeyedLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLimiter")
            .field("capacity", &self.registry.capacity)
            .field("window", &self.registry.window)
            .field("sweep_interval", &self.sweep_interval)
            .field("tracked_keys", &self.tracked_keys())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RateLimiter for KeyedLimiter {
    fn allow(&self, key: &str) -> bool {
        KeyedLimiter::allow(self, key)
    }

    fn oldest(&self, key: &str) -> Option<Instant> {
        KeyedLimiter::oldest(self, key)
    }

    fn newest(&self, key: &str) -> Option<Instant> {
        KeyedLimiter::newest(self, key)
    }

    fn span(&self, key: &str) -> Duration {
        KeyedLimiter::span(self, key)
    }

    fn resize(&self, key: &str, new_capacity: usize) {
        KeyedLimiter::resize(self, key, new_capacity)
    }

    fn retry_after(&self, key: &str) -> Duration {
        KeyedLimiter::retry_after(self, key)
    }

    fn close(&self) {
        KeyedLimiter::close(self)
    }
}
