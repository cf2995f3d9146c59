// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tick::Clock;

use crate::EventType;

/// A closed set of events a [`RollingWindow`] counts.
pub(crate) trait WindowEvent: Copy {
    /// Number of distinct events.
    const LEN: usize;

    /// Position of the event's counter, below [`LEN`][Self::LEN].
    fn position(self) -> usize;
}

impl WindowEvent for EventType {
    const LEN: usize = Self::COUNT;

    fn position(self) -> usize {
        self.index()
    }
}

/// Time-bucketed event counters without locks.
///
/// The window is split into `buckets` slots, each covering `window / buckets` of time. A slot is
/// stamped with the bucket epoch it currently counts for; a writer that finds a stale stamp
/// claims the slot by swapping the stamp and zeroes the counters. Readers only sum slots whose
/// stamp falls within the window. Increments racing with a slot reset may be lost, which keeps
/// the counts approximate at bucket boundaries.
#[derive(Debug)]
pub(crate) struct RollingWindow<E = EventType> {
    clock: Clock,
    origin: Instant,
    bucket_width_ms: u64,
    buckets: Box<[Bucket]>,
    events: PhantomData<fn(E)>,
}

#[derive(Debug)]
struct Bucket {
    // Epoch + 1 of the interval this bucket counts for; zero means unused.
    stamp: AtomicU64,
    counts: Box<[AtomicU64]>,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    latency_max_ms: AtomicU64,
}

impl Bucket {
    fn new(events: usize) -> Self {
        Self {
            stamp: AtomicU64::new(0),
            counts: (0..events).map(|_| AtomicU64::new(0)).collect(),
            latency_total_ms: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
            latency_max_ms: AtomicU64::new(0),
        }
    }

    fn clear(&self) {
        for count in &*self.counts {
            count.store(0, Ordering::Relaxed);
        }
        self.latency_total_ms.store(0, Ordering::Relaxed);
        self.latency_samples.store(0, Ordering::Relaxed);
        self.latency_max_ms.store(0, Ordering::Relaxed);
    }
}

/// The aggregate read by the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthCounts {
    /// Requests that reached an execution outcome: successes, failures, timeouts and rejections.
    pub total_requests: u64,
    /// Failures, timeouts and rejections.
    pub error_count: u64,
    /// `error_count` as a whole percentage of `total_requests`.
    pub error_percentage: u8,
}

impl HealthCounts {
    pub(crate) fn new(total_requests: u64, error_count: u64) -> Self {
        let error_percentage = if total_requests == 0 {
            0
        } else {
            u8::try_from(error_count.saturating_mul(100) / total_requests).unwrap_or(100)
        };

        Self {
            total_requests,
            error_count,
            error_percentage,
        }
    }
}

impl<E: WindowEvent> RollingWindow<E> {
    pub(crate) fn new(clock: Clock, window: Duration, buckets: usize) -> Self {
        let buckets = buckets.max(1);
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let bucket_width_ms = (window_ms / buckets as u64).max(1);

        Self {
            origin: clock.instant(),
            clock,
            bucket_width_ms,
            buckets: (0..buckets).map(|_| Bucket::new(E::LEN)).collect(),
            events: PhantomData,
        }
    }

    pub(crate) fn increment(&self, event: E) {
        let bucket = self.current_bucket();
        bucket.counts[event.position()].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let bucket = self.current_bucket();
        bucket.latency_total_ms.fetch_add(millis, Ordering::Relaxed);
        bucket.latency_samples.fetch_add(1, Ordering::Relaxed);
        bucket.latency_max_ms.fetch_max(millis, Ordering::Relaxed);
    }

    pub(crate) fn count(&self, event: E) -> u64 {
        self.live_buckets().map(|b| b.counts[event.position()].load(Ordering::Relaxed)).sum()
    }

    pub(crate) fn mean_latency(&self) -> Option<Duration> {
        let (total, samples) = self.live_buckets().fold((0_u64, 0_u64), |(total, samples), b| {
            (
                total + b.latency_total_ms.load(Ordering::Relaxed),
                samples + b.latency_samples.load(Ordering::Relaxed),
            )
        });

        (samples > 0).then(|| Duration::from_millis(total / samples))
    }

    pub(crate) fn max_latency(&self) -> Option<Duration> {
        self.live_buckets()
            .filter(|b| b.latency_samples.load(Ordering::Relaxed) > 0)
            .map(|b| b.latency_max_ms.load(Ordering::Relaxed))
            .max()
            .map(Duration::from_millis)
    }

    pub(crate) fn reset(&self) {
        for bucket in &self.buckets {
            bucket.stamp.store(0, Ordering::Release);
            bucket.clear();
        }
    }

    fn epoch(&self) -> u64 {
        let elapsed = self.clock.instant().saturating_duration_since(self.origin);
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX) / self.bucket_width_ms
    }

    fn current_bucket(&self) -> &Bucket {
        let epoch = self.epoch();
        let bucket = &self.buckets[self.slot(epoch)];
        let stamp = epoch + 1;

        let current = bucket.stamp.load(Ordering::Acquire);
        if current < stamp && bucket.stamp.compare_exchange(current, stamp, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            bucket.clear();
        }

        bucket
    }

    fn live_buckets(&self) -> impl Iterator<Item = &Bucket> {
        let epoch = self.epoch();
        let oldest = epoch.saturating_sub(self.buckets.len() as u64 - 1);

        self.buckets.iter().filter(move |bucket| {
            let stamp = bucket.stamp.load(Ordering::Acquire);
            stamp != 0 && (oldest..=epoch).contains(&(stamp - 1))
        })
    }

    fn slot(&self, epoch: u64) -> usize {
        // The modulus is below `buckets.len()`, so it always fits in usize.
        usize::try_from(epoch % self.buckets.len() as u64).unwrap_or_default()
    }
}

impl RollingWindow<EventType> {
    pub(crate) fn health_counts(&self) -> HealthCounts {
        let mut total = 0;
        let mut errors = 0;

        for bucket in self.live_buckets() {
            for event in EventType::ALL {
                let count = bucket.counts[event.index()].load(Ordering::Relaxed);
                if event.counts_toward_health() {
                    total += count;
                }
                if event.is_health_error() {
                    errors += count;
                }
            }
        }

        HealthCounts::new(total, errors)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use tick::ClockControl;

    use super::*;

    fn window(control: &ClockControl) -> RollingWindow {
        RollingWindow::new(control.to_clock(), Duration::from_secs(10), 10)
    }

    #[test]
    fn counts_events_within_window() {
        let control = ClockControl::new();
        let window = window(&control);

        window.increment(EventType::Success);
        control.advance(Duration::from_secs(3));
        window.increment(EventType::Failure);
        window.increment(EventType::Failure);

        assert_eq!(window.count(EventType::Success), 1);
        assert_eq!(window.count(EventType::Failure), 2);
        assert_eq!(window.count(EventType::Timeout), 0);
    }

    #[test]
    fn old_buckets_expire() {
        let control = ClockControl::new();
        let window = window(&control);

        window.increment(EventType::Success);
        control.advance(Duration::from_secs(5));
        window.increment(EventType::Failure);

        control.advance(Duration::from_secs(6));
        assert_eq!(window.count(EventType::Success), 0, "the first bucket fell out of the window");
        assert_eq!(window.count(EventType::Failure), 1);

        control.advance(Duration::from_secs(10));
        assert_eq!(window.health_counts(), HealthCounts::default());
    }

    #[test]
    fn reused_slot_starts_from_zero() {
        let control = ClockControl::new();
        let window = window(&control);

        window.increment(EventType::Success);
        window.increment(EventType::Success);

        // Same slot, one full rotation later.
        control.advance(Duration::from_secs(10));
        window.increment(EventType::Success);

        assert_eq!(window.count(EventType::Success), 1);
    }

    #[test]
    fn health_counts_ignore_non_execution_events() {
        let control = ClockControl::new();
        let window = window(&control);

        for _ in 0..6 {
            window.increment(EventType::Success);
        }
        for event in [
            EventType::Failure,
            EventType::Timeout,
            EventType::ThreadPoolRejected,
            EventType::SemaphoreRejected,
        ] {
            window.increment(event);
        }
        window.increment(EventType::ShortCircuited);
        window.increment(EventType::BadRequest);
        window.increment(EventType::FallbackSuccess);

        let health = window.health_counts();
        assert_eq!(health.total_requests, 10);
        assert_eq!(health.error_count, 4);
        assert_eq!(health.error_percentage, 40);
    }

    #[test]
    fn error_percentage_rounds_down() {
        assert_eq!(HealthCounts::new(3, 1).error_percentage, 33);
        assert_eq!(HealthCounts::new(3, 3).error_percentage, 100);
        assert_eq!(HealthCounts::new(0, 0).error_percentage, 0);
    }

    #[test]
    fn latency_aggregates() {
        let control = ClockControl::new();
        let window = window(&control);
        assert_eq!(window.mean_latency(), None);

        window.record_latency(Duration::from_millis(10));
        window.record_latency(Duration::from_millis(30));

        assert_eq!(window.mean_latency(), Some(Duration::from_millis(20)));
        assert_eq!(window.max_latency(), Some(Duration::from_millis(30)));
    }

    #[test]
    fn reset_clears_everything() {
        let control = ClockControl::new();
        let window = window(&control);

        window.increment(EventType::Failure);
        window.record_latency(Duration::from_millis(10));
        window.reset();

        assert_eq!(window.count(EventType::Failure), 0);
        assert_eq!(window.max_latency(), None);

        window.increment(EventType::Success);
        assert_eq!(window.count(EventType::Success), 1);
    }
}
