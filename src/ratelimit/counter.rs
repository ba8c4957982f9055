//! Sliding-window hit counter backed by a ring of timestamps.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::backend::RateLimiter;

/// Span reported while a ring holds fewer than two recorded hits.
///
/// Also returned for keys a limiter has never seen, so a rate derived from
/// the span is near zero rather than a division by zero.
pub const UNKNOWN_SPAN: Duration = Duration::from_secs(24 * 60 * 60);

/// Round a duration up to whole seconds, for user-facing retry hints.
pub fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

/// Whether a hit recorded at `at` no longer counts at `now`.
fn expired(at: Instant, window: Duration, now: Instant) -> bool {
    now.saturating_duration_since(at) >= window
}

/// Slot storage for a [`WindowCounter`].
///
/// Walking the slots from `offset` yields the recorded hits oldest first,
/// with unset slots (`None`) sorting before any timestamp. `offset` is also
/// the slot the next admitted hit overwrites.
#[derive(Debug, Clone)]
struct Ring {
    slots: Vec<Option<Instant>>,
    offset: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            offset: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn newest_index(&self) -> usize {
        let n = self.slots.len();
        (self.offset + n - 1) % n
    }

    fn newest(&self) -> Option<Instant> {
        self.slots[self.newest_index()]
    }

    fn oldest(&self) -> Option<Instant> {
        self.slots[self.offset]
    }

    fn has_free_slot_at(&self, window: Duration, now: Instant) -> bool {
        match self.oldest() {
            None => true,
            Some(at) => expired(at, window, now),
        }
    }

    fn is_active_at(&self, window: Duration, now: Instant) -> bool {
        match self.newest() {
            None => false,
            Some(at) => !expired(at, window, now),
        }
    }

    fn len_at(&self, window: Duration, now: Instant) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Some(at) if !expired(*at, window, now)))
            .count()
    }

    /// Number of slots holding a hit, in or out of the window.
    fn recorded(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// The earliest recorded hit, skipping unset slots left by a grow or
    /// a ring that has not filled yet.
    fn earliest(&self) -> Option<Instant> {
        let n = self.slots.len();
        (0..n).find_map(|i| self.slots[(self.offset + i) % n])
    }

    fn span(&self) -> Duration {
        if self.recorded() < 2 {
            return UNKNOWN_SPAN;
        }
        match (self.newest(), self.earliest()) {
            (Some(newest), Some(earliest)) => newest.saturating_duration_since(earliest),
            _ => UNKNOWN_SPAN,
        }
    }

    fn retry_after_at(&self, window: Duration, now: Instant) -> Duration {
        match self.oldest() {
            Some(oldest) if !expired(oldest, window, now) => oldest
                .checked_add(window)
                .map_or(window, |free_at| free_at.saturating_duration_since(now)),
            _ => Duration::ZERO,
        }
    }

    /// Overwrite the oldest slot and advance the offset.
    fn record(&mut self, at: Instant) {
        self.slots[self.offset] = Some(at);
        self.offset = (self.offset + 1) % self.slots.len();
    }

    /// Slots in chronological order, starting at the offset.
    fn linearized(&self) -> Vec<Option<Instant>> {
        let n = self.slots.len();
        (0..n).map(|i| self.slots[(self.offset + i) % n]).collect()
    }

    /// Re-linearize into `new_capacity` slots.
    ///
    /// Growing keeps every slot in order at the front and leaves the new
    /// slots unset at the tail, where the offset now points. Shrinking keeps
    /// the newest `new_capacity` slots and rebases the offset to zero.
    fn resize(&mut self, new_capacity: usize) {
        let current = self.capacity();
        let mut ordered = self.linearized();

        if new_capacity > current {
            ordered.resize(new_capacity, None);
            self.slots = ordered;
            self.offset = current;
        } else {
            self.slots = ordered.split_off(current - new_capacity);
            self.offset = 0;
        }
    }
}

/// A point-in-time view of a counter, for telemetry and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterStatus {
    /// Number of slots in the ring
    pub capacity: usize,
    /// Hits still inside the window
    pub in_window: usize,
    /// Whether the newest hit is still inside the window
    pub active: bool,
    /// Seconds until a slot frees up, rounded up
    pub retry_after_secs: u64,
    /// Distance between the newest and earliest hit, once two are recorded
    pub span_ms: Option<u64>,
}

/// Fixed-capacity record of the last N admitted hits.
///
/// A hit is admitted when the oldest recorded hit has aged out of the
/// window, so at most `capacity` hits are admitted in any window-length
/// interval. Inserts and admission checks are O(1); only [`resize`] touches
/// every slot.
///
/// The ring is guarded by its own reader/writer lock: queries share it,
/// [`try_record`] and [`resize`] take it exclusively.
///
/// [`resize`]: WindowCounter::resize
/// [`try_record`]: WindowCounter::try_record
#[derive(Debug)]
pub struct WindowCounter {
    /// How long a recorded hit counts against the limit
    window: Duration,
    /// Slots and offset
    ring: RwLock<Ring>,
}

impl WindowCounter {
    /// Create an empty counter admitting `capacity` hits per `window`.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize, window: Duration) -> Self {
        let capacity = if capacity == 0 {
            warn!("Refusing to create a counter with zero capacity, using 1");
            1
        } else {
            capacity
        };

        Self {
            window,
            ring: RwLock::new(Ring::new(capacity)),
        }
    }

    /// Number of slots in the ring.
    pub fn capacity(&self) -> usize {
        self.ring.read().capacity()
    }

    /// The trailing window this counter enforces.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of recorded hits still inside the window.
    pub fn len(&self) -> usize {
        self.len_at(Instant::now())
    }

    /// Number of recorded hits inside the window ending at `now`.
    pub fn len_at(&self, now: Instant) -> usize {
        self.ring.read().len_at(self.window, now)
    }

    /// True when no recorded hit is inside the window.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the most recent hit is still inside the window.
    pub fn is_active(&self) -> bool {
        self.is_active_at(Instant::now())
    }

    /// Whether the most recent hit is inside the window ending at `now`.
    pub fn is_active_at(&self, now: Instant) -> bool {
        self.ring.read().is_active_at(self.window, now)
    }

    /// Whether a hit would be admitted right now.
    pub fn has_free_slot(&self) -> bool {
        self.has_free_slot_at(Instant::now())
    }

    /// Whether a hit at `now` would be admitted.
    pub fn has_free_slot_at(&self, now: Instant) -> bool {
        self.ring.read().has_free_slot_at(self.window, now)
    }

    /// Record a hit at `at` if the oldest slot has aged out by then.
    ///
    /// Returns `true` if the hit was admitted, `false` if it was rejected,
    /// in which case nothing changes.
    pub fn try_record(&self, at: Instant) -> bool {
        let mut ring = self.ring.write();
        if !ring.has_free_slot_at(self.window, at) {
            trace!(capacity = ring.capacity(), "Counter full, rejecting hit");
            return false;
        }
        ring.record(at);
        true
    }

    /// Record a hit stamped with the current time.
    ///
    /// The clock is read after the write lock is taken, so concurrent
    /// admissions are stamped in the order they are recorded.
    pub fn try_record_now(&self) -> bool {
        let mut ring = self.ring.write();
        let now = Instant::now();
        if !ring.has_free_slot_at(self.window, now) {
            trace!(capacity = ring.capacity(), "Counter full, rejecting hit");
            return false;
        }
        ring.record(now);
        true
    }

    /// The most recently recorded hit, if any.
    pub fn newest(&self) -> Option<Instant> {
        self.ring.read().newest()
    }

    /// The hit in the next slot to be overwritten.
    ///
    /// `None` means the slot was never written and is always free.
    pub fn oldest(&self) -> Option<Instant> {
        self.ring.read().oldest()
    }

    /// Time between the earliest and newest recorded hit.
    ///
    /// Unset slots are skipped, so the span stays meaningful after a grow.
    /// Returns [`UNKNOWN_SPAN`] while fewer than two hits are recorded.
    pub fn span(&self) -> Duration {
        self.ring.read().span()
    }

    /// Observed hits per second over the recorded hits, or 0.0 when unknown.
    ///
    /// Equals `capacity / span` once the ring is full.
    pub fn observed_rate(&self) -> f64 {
        let ring = self.ring.read();
        let span = ring.span();
        if span == UNKNOWN_SPAN || span.is_zero() {
            return 0.0;
        }
        ring.recorded() as f64 / span.as_secs_f64()
    }

    /// How long until a hit would be admitted. Zero when a slot is free.
    pub fn retry_after(&self) -> Duration {
        self.retry_after_at(Instant::now())
    }

    /// How long after `now` until a hit would be admitted.
    pub fn retry_after_at(&self, now: Instant) -> Duration {
        self.ring.read().retry_after_at(self.window, now)
    }

    /// Change the number of slots, keeping the newest hits in order.
    ///
    /// A capacity of zero is ignored. Runs under the same exclusive lock as
    /// [`try_record`](WindowCounter::try_record), so it never interleaves
    /// with an insert.
    pub fn resize(&self, new_capacity: usize) {
        if new_capacity == 0 {
            warn!(new_capacity, "Refusing to resize counter");
            return;
        }

        let mut ring = self.ring.write();
        let current = ring.capacity();
        if current == new_capacity {
            return;
        }
        ring.resize(new_capacity);

        debug!(from = current, to = new_capacity, "Resized counter");
    }

    /// Snapshot the counter as seen now.
    pub fn status(&self) -> CounterStatus {
        self.status_at(Instant::now())
    }

    /// Snapshot the counter as seen at `now`.
    pub fn status_at(&self, now: Instant) -> CounterStatus {
        let ring = self.ring.read();
        let span = ring.span();

        CounterStatus {
            capacity: ring.capacity(),
            in_window: ring.len_at(self.window, now),
            active: ring.is_active_at(self.window, now),
            retry_after_secs: ceil_secs(ring.retry_after_at(self.window, now)),
            span_ms: (span != UNKNOWN_SPAN)
                .then(|| u64::try_from(span.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

/// A lone counter limits every caller together; the key is ignored.
impl RateLimiter for WindowCounter {
    fn allow(&self, _key: &str) -> bool {
        self.try_record_now()
    }

    fn oldest(&self, _key: &str) -> Option<Instant> {
        WindowCounter::oldest(self)
    }

    fn newest(&self, _key: &str) -> Option<Instant> {
        WindowCounter::newest(self)
    }

    fn span(&self, _key: &str) -> Duration {
        WindowCounter::span(self)
    }

    fn resize(&self, _key: &str, new_capacity: usize) {
        WindowCounter::resize(self, new_capacity)
    }

    fn retry_after(&self, _key: &str) -> Duration {
        WindowCounter::retry_after(self)
    }

    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn slots(counter: &WindowCounter) -> Vec<Option<Instant>> {
        counter.ring.read().slots.clone()
    }

    fn offset(counter: &WindowCounter) -> usize {
        counter.ring.read().offset
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_secs(2)), 2);
        assert_eq!(ceil_secs(Duration::from_millis(2001)), 3);
    }

    #[test]
    fn test_zero_capacity_raised_to_one() {
        let counter = WindowCounter::new(0, Duration::from_secs(1));
        assert_eq!(counter.capacity(), 1);
        assert!(counter.try_record_now());
        assert!(!counter.try_record_now());
    }

    #[test]
    fn test_len() {
        let window = Duration::from_secs(1);
        let counter = WindowCounter::new(2, window);
        let start = Instant::now();

        assert_eq!(counter.len_at(start), 0);
        assert!(counter.is_empty());

        counter.try_record(start);
        assert_eq!(counter.len_at(start), 1);
        counter.try_record(start);
        assert_eq!(counter.len_at(start), 2);
        // Full: the third hit is rejected and the count does not change
        assert!(!counter.try_record(start));
        assert_eq!(counter.len_at(start), 2);

        assert_eq!(counter.len_at(start + window), 0);
    }

    #[test]
    fn test_is_active() {
        let window = Duration::from_secs(1);
        let counter = WindowCounter::new(2, window);
        let start = Instant::now();

        assert!(!counter.is_active_at(start));
        counter.try_record(start);
        assert!(counter.is_active_at(start));
        counter.try_record(start);
        assert!(counter.is_active_at(start));

        assert!(!counter.is_active_at(start + window));
    }

    #[test]
    fn test_has_free_slot() {
        let counter = WindowCounter::new(2, Duration::from_secs(1));
        let start = Instant::now();

        assert!(counter.has_free_slot_at(start), "empty counter should be free");
        counter.try_record(start);
        assert!(counter.has_free_slot_at(start), "one slot left");
        counter.try_record(start);
        assert!(!counter.has_free_slot_at(start), "full counter should not be free");
    }

    #[test]
    fn test_admission_bound_and_recovery() {
        let window = Duration::from_secs(1);
        let counter = WindowCounter::new(4, window);
        let start = Instant::now();

        for i in 0..4 {
            let at = start + Duration::from_millis(i * 100);
            assert!(counter.try_record(at), "hit {} should be admitted", i);
        }
        let last = start + Duration::from_millis(300);
        assert_eq!(counter.len_at(last), 4);
        assert!(!counter.try_record(last));

        // Once the last hit has aged out the counter is idle and free again
        let later = last + window;
        assert!(counter.has_free_slot_at(later));
        assert!(!counter.is_active_at(later));
        for _ in 0..4 {
            assert!(counter.try_record(later));
        }
        assert!(!counter.try_record(later));
    }

    #[test]
    fn test_oldest_frees_first() {
        let window = Duration::from_secs(1);
        let counter = WindowCounter::new(2, window);
        let start = Instant::now();

        counter.try_record(start);
        counter.try_record(start + Duration::from_millis(500));

        // Only the first hit has aged out
        let at = start + window;
        assert!(counter.has_free_slot_at(at));
        assert!(counter.try_record(at));
        assert!(!counter.try_record(at));
        assert_eq!(counter.oldest(), Some(start + Duration::from_millis(500)));
    }

    #[test]
    fn test_newest_tracks_last_record() {
        let window = Duration::from_millis(100);
        let counter = WindowCounter::new(2, window);
        let start = Instant::now();

        assert_eq!(counter.newest(), None);
        for i in 0..4 {
            let at = start + window * i;
            assert!(counter.try_record(at));
            assert_eq!(counter.newest(), Some(at));
        }
    }

    #[test]
    fn test_oldest_unset_until_filled() {
        let counter = WindowCounter::new(2, Duration::from_secs(1));
        let start = Instant::now();

        counter.try_record(start);
        assert_eq!(counter.oldest(), None);
        counter.try_record(start + Duration::from_millis(1));
        assert_eq!(counter.oldest(), Some(start));
    }

    #[test]
    fn test_span() {
        let window = Duration::from_secs(1);
        let counter = WindowCounter::new(4, window);
        let start = Instant::now();

        for i in 0..4 {
            counter.try_record(start + window * i);
        }

        assert_eq!(counter.span(), Duration::from_secs(3));
        let rate = counter.observed_rate();
        assert!((rate - 4.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_span_unknown_until_filled() {
        let counter = WindowCounter::new(4, Duration::from_secs(1));
        assert_eq!(counter.span(), UNKNOWN_SPAN);

        let start = Instant::now();
        counter.try_record(start);
        assert_eq!(counter.span(), UNKNOWN_SPAN);
        assert_eq!(counter.observed_rate(), 0.0);

        // Two hits in a partly filled ring already give a real span
        counter.try_record(start + Duration::from_millis(500));
        assert_eq!(counter.span(), Duration::from_millis(500));
        assert!((counter.observed_rate() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_span_survives_grow() {
        let window = Duration::from_secs(1);
        let counter = WindowCounter::new(4, window);
        let start = Instant::now();
        for i in 0..4 {
            counter.try_record(start + window * i);
        }
        assert_eq!(counter.span(), Duration::from_secs(3));

        counter.resize(6);

        // The offset now sits on an unset slot, but the recorded hits remain
        assert_eq!(counter.oldest(), None);
        assert_eq!(counter.span(), Duration::from_secs(3));
        assert!((counter.observed_rate() - 4.0 / 3.0).abs() < 1e-9);
        assert_eq!(counter.status_at(start + window * 3).span_ms, Some(3000));

        // Filling the new slots extends the span from the same earliest hit
        counter.try_record(start + window * 4);
        assert_eq!(counter.span(), Duration::from_secs(4));
    }

    #[test]
    fn test_retry_after() {
        let window = Duration::from_secs(1);
        let counter = WindowCounter::new(2, window);
        let start = Instant::now();

        assert_eq!(counter.retry_after_at(start), Duration::ZERO);

        counter.try_record(start);
        assert_eq!(counter.retry_after_at(start), Duration::ZERO);
        counter.try_record(start + Duration::from_millis(200));

        let now = start + Duration::from_millis(300);
        assert!(!counter.has_free_slot_at(now));
        assert_eq!(counter.retry_after_at(now), Duration::from_millis(700));
        assert_eq!(ceil_secs(counter.retry_after_at(now)), 1);

        // Never negative once the oldest slot has aged out
        assert_eq!(counter.retry_after_at(start + window * 2), Duration::ZERO);
    }

    #[test]
    fn test_retry_after_zero_iff_free() {
        let window = Duration::from_millis(100);
        let counter = WindowCounter::new(2, window);
        let start = Instant::now();

        for i in 0..20u32 {
            let at = start + Duration::from_millis(40) * i;
            counter.try_record(at);
            let later = at + Duration::from_millis(10);
            assert_eq!(
                counter.retry_after_at(later).is_zero(),
                counter.has_free_slot_at(later),
                "step {}",
                i
            );
        }
    }

    #[test]
    fn test_retry_after_with_real_clock() {
        let window = Duration::from_millis(100);
        let counter = WindowCounter::new(2, window);
        assert_eq!(counter.retry_after(), Duration::ZERO);

        for _ in 0..10 {
            counter.try_record_now();
            thread::sleep(Duration::from_millis(10));
            if !counter.has_free_slot() {
                assert!(counter.retry_after() <= window);
            }
        }

        thread::sleep(window);
        assert!(counter.has_free_slot());
        assert_eq!(counter.retry_after(), Duration::ZERO);
    }

    #[test]
    fn test_resize_grow() {
        let window = Duration::from_secs(1);
        let counter = WindowCounter::new(4, window);
        let start = Instant::now();
        for _ in 0..4 {
            counter.try_record(start);
        }

        counter.resize(8);

        let slots = slots(&counter);
        assert_eq!(slots.len(), 8);
        for slot in &slots[..4] {
            assert_eq!(*slot, Some(start));
        }
        for slot in &slots[4..] {
            assert_eq!(*slot, None);
        }
        assert_eq!(offset(&counter), 4);
        assert!(counter.has_free_slot_at(start));
    }

    #[test]
    fn test_resize_grow_wrapped_keeps_order() {
        let window = Duration::from_secs(1);
        let counter = WindowCounter::new(4, window);
        let start = Instant::now();
        for i in 0..6 {
            assert!(counter.try_record(start + window * i));
        }
        assert_eq!(offset(&counter), 2);

        counter.resize(6);

        let expected: Vec<_> = (2..6).map(|i| Some(start + window * i)).collect();
        let slots = slots(&counter);
        assert_eq!(&slots[..4], expected.as_slice());
        assert!(slots[4..].iter().all(Option::is_none));

        // New hits land in the unset tail, then wrap onto the oldest
        let next = start + window * 6;
        assert!(counter.try_record(next));
        assert!(counter.try_record(next));
        assert_eq!(counter.newest(), Some(next));
        assert_eq!(counter.oldest(), Some(start + window * 2));
    }

    #[test]
    fn test_resize_shrink_full_varying_offset() {
        let capacity = 8;
        let window = Duration::from_secs(1);
        let start = Instant::now();

        for off in 0..capacity {
            for new_size in 1..capacity {
                let counter = WindowCounter::new(capacity, window);
                counter.ring.write().offset = off;
                for i in 0..capacity as u32 {
                    assert!(counter.try_record(start + window * i));
                }

                counter.resize(new_size);

                let slots = slots(&counter);
                assert_eq!(slots.len(), new_size);
                for (i, slot) in slots.iter().enumerate() {
                    let expected = start + window * (capacity - new_size + i) as u32;
                    assert_eq!(
                        *slot,
                        Some(expected),
                        "offset {} new size {} slot {}",
                        off,
                        new_size,
                        i
                    );
                }
                assert_eq!(offset(&counter), 0);
            }
        }
    }

    #[test]
    fn test_resize_shrink_after_overwrites() {
        let window = Duration::from_secs(5);
        let start = Instant::now();

        for new_size in 1..5 {
            for writes in 6..=10u32 {
                let counter = WindowCounter::new(5, window);
                for i in 0..writes {
                    // One hit per window so every insert is admitted
                    counter.try_record(start + window * i);
                }

                counter.resize(new_size);

                let slots = slots(&counter);
                for (i, slot) in slots.iter().enumerate() {
                    let expected = start + window * (writes - new_size as u32 + i as u32);
                    assert_eq!(*slot, Some(expected));
                }
                assert_eq!(offset(&counter), 0);
            }
        }
    }

    #[test]
    fn test_resize_shrink_non_full() {
        let window = Duration::from_secs(60);
        let start = Instant::now();

        for new_size in 2..5 {
            for writes in (new_size + 1)..=5 {
                let counter = WindowCounter::new(5, window);
                for i in 0..writes as u32 {
                    counter.try_record(start + Duration::from_secs(i as u64));
                }

                counter.resize(new_size);

                let now = start + Duration::from_secs(5);
                assert_eq!(counter.len_at(now), new_size);

                let slots = slots(&counter);
                for (i, slot) in slots.iter().enumerate() {
                    let expected = start + Duration::from_secs((writes - new_size + i) as u64);
                    assert_eq!(*slot, Some(expected));
                }
                assert_eq!(offset(&counter), 0);
            }
        }
    }

    #[test]
    fn test_resize_ignores_zero_and_same_size() {
        let counter = WindowCounter::new(3, Duration::from_secs(1));
        let start = Instant::now();
        counter.try_record(start);
        let before = slots(&counter);

        counter.resize(0);
        assert_eq!(slots(&counter), before);
        assert_eq!(offset(&counter), 1);

        counter.resize(3);
        assert_eq!(slots(&counter), before);
        assert_eq!(offset(&counter), 1);
    }

    #[test]
    fn test_status() {
        let window = Duration::from_secs(1);
        let counter = WindowCounter::new(2, window);
        let start = Instant::now();
        counter.try_record(start);
        counter.try_record(start + Duration::from_millis(250));

        let status = counter.status_at(start + Duration::from_millis(500));
        assert_eq!(
            status,
            CounterStatus {
                capacity: 2,
                in_window: 2,
                active: true,
                retry_after_secs: 1,
                span_ms: Some(250),
            }
        );
    }

    #[test]
    fn test_massive_concurrent_use() {
        let counter = Arc::new(WindowCounter::new(1 << 12, Duration::from_secs(1)));
        assert!(counter.try_record_now());

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1 << 10 {
                        assert!(counter.try_record_now());
                        assert!(counter.is_active());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.len(), 1 + 3 * (1 << 10));
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_capacity() {
        let counter = Arc::new(WindowCounter::new(100, Duration::from_secs(60)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || (0..50).filter(|_| counter.try_record_now()).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
        assert!(!counter.has_free_slot());

        // Concurrent stamping keeps the ring in chronological order
        let ring = counter.ring.read().linearized();
        assert!(ring.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn test_rate_limiter_trait_ignores_key() {
        let counter = WindowCounter::new(2, Duration::from_secs(60));
        let limiter: &dyn RateLimiter = &counter;

        assert!(limiter.allow("a"));
        assert!(limiter.allow("b"));
        assert!(!limiter.allow("c"));
        assert!(limiter.retry_after_secs("anything") > 0);

        limiter.resize("", 3);
        assert_eq!(counter.capacity(), 3);
        assert!(limiter.allow("d"));
        limiter.close();
    }
}
