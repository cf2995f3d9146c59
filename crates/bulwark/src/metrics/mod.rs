// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Rolling execution statistics of commands.
//!
//! Every command key owns one [`CommandMetrics`] instance inside its
//! [`Context`][crate::Context]. The engine feeds it the events of each execution and the circuit
//! breaker reads [`HealthCounts`] from it to decide whether to open.

mod window;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tick::Clock;
pub use window::HealthCounts;
pub(crate) use window::{RollingWindow, WindowEvent};

use crate::{CommandKey, EventType, ExecutionResult, IsolationStrategy};

/// Execution statistics of one command key.
#[derive(Debug)]
pub struct CommandMetrics {
    command_key: CommandKey,
    window: RollingWindow,
    cumulative: [AtomicU64; EventType::COUNT],
    started: [AtomicU64; 2],
    concurrent: AtomicUsize,
}

impl CommandMetrics {
    pub(crate) fn new(command_key: CommandKey, clock: Clock, window: Duration, buckets: usize) -> Self {
        Self {
            command_key,
            window: RollingWindow::new(clock, window, buckets),
            cumulative: std::array::from_fn(|_| AtomicU64::new(0)),
            started: std::array::from_fn(|_| AtomicU64::new(0)),
            concurrent: AtomicUsize::new(0),
        }
    }

    /// The command these statistics belong to.
    #[must_use]
    pub fn command_key(&self) -> &CommandKey {
        &self.command_key
    }

    /// Records that an execution started. The returned guard keeps the execution counted as
    /// concurrent until it is dropped.
    pub fn mark_command_start(self: &Arc<Self>, isolation: IsolationStrategy) -> ConcurrencyGuard {
        self.started[isolation_slot(isolation)].fetch_add(1, Ordering::Relaxed);
        self.concurrent.fetch_add(1, Ordering::AcqRel);

        ConcurrencyGuard {
            metrics: Arc::clone(self),
        }
    }

    /// Records a single event, with the execution latency when the event carries one.
    pub fn record_event(&self, event: EventType, latency: Option<Duration>) {
        self.window.increment(event);
        self.cumulative[event.index()].fetch_add(1, Ordering::Relaxed);

        if let Some(latency) = latency {
            self.window.record_latency(latency);
        }
    }

    /// Records all events of a finished execution.
    ///
    /// A result served from the request cache only counts as `RESPONSE_FROM_CACHE`, since the
    /// events it carries were already recorded by the execution that produced them.
    pub fn mark_command_done(&self, result: &ExecutionResult) {
        if result.is_response_from_cache() {
            self.record_event(EventType::ResponseFromCache, None);
            return;
        }

        for event in result.events() {
            self.record_event(*event, None);
        }

        if let Some(latency) = result.execution_latency() {
            self.window.record_latency(latency);
        }
    }

    /// Request volume and error rate over the rolling window.
    #[must_use]
    pub fn health_counts(&self) -> HealthCounts {
        self.window.health_counts()
    }

    /// Occurrences of `event` within the rolling window.
    #[must_use]
    pub fn rolling_count(&self, event: EventType) -> u64 {
        self.window.count(event)
    }

    /// Occurrences of `event` since the metrics were created.
    #[must_use]
    pub fn cumulative_count(&self, event: EventType) -> u64 {
        self.cumulative[event.index()].load(Ordering::Relaxed)
    }

    /// Executions started with the given isolation since the metrics were created.
    #[must_use]
    pub fn execution_started_count(&self, isolation: IsolationStrategy) -> u64 {
        self.started[isolation_slot(isolation)].load(Ordering::Relaxed)
    }

    /// Executions currently in flight.
    #[must_use]
    pub fn current_concurrent_execution_count(&self) -> usize {
        self.concurrent.load(Ordering::Acquire)
    }

    /// Mean latency of the user work over the rolling window.
    #[must_use]
    pub fn mean_execution_latency(&self) -> Option<Duration> {
        self.window.mean_latency()
    }

    /// Maximum latency of the user work over the rolling window.
    #[must_use]
    pub fn max_execution_latency(&self) -> Option<Duration> {
        self.window.max_latency()
    }

    /// Clears the rolling window. Cumulative counts are kept.
    pub(crate) fn reset_window(&self) {
        self.window.reset();
    }
}

fn isolation_slot(isolation: IsolationStrategy) -> usize {
    match isolation {
        IsolationStrategy::Thread => 0,
        IsolationStrategy::Semaphore => 1,
    }
}

/// Counts an execution as concurrent until dropped.
#[derive(Debug)]
pub struct ConcurrencyGuard {
    metrics: Arc<CommandMetrics>,
}

impl Drop for ConcurrencyGuard {
    fn drop(&mut self) {
        self.metrics.concurrent.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use tick::ClockControl;

    use super::*;

    fn metrics(control: &ClockControl) -> Arc<CommandMetrics> {
        Arc::new(CommandMetrics::new(
            CommandKey::new("GetUser"),
            control.to_clock(),
            Duration::from_secs(10),
            10,
        ))
    }

    #[test]
    fn static_assertions() {
        static_assertions::assert_impl_all!(CommandMetrics: Send, Sync);
        static_assertions::assert_impl_all!(ConcurrencyGuard: Send, Sync);
    }

    #[test]
    fn concurrency_guard_tracks_in_flight_executions() {
        let metrics = metrics(&ClockControl::new());

        let first = metrics.mark_command_start(IsolationStrategy::Thread);
        let second = metrics.mark_command_start(IsolationStrategy::Semaphore);
        assert_eq!(metrics.current_concurrent_execution_count(), 2);

        drop(first);
        assert_eq!(metrics.current_concurrent_execution_count(), 1);
        drop(second);
        assert_eq!(metrics.current_concurrent_execution_count(), 0);

        assert_eq!(metrics.execution_started_count(IsolationStrategy::Thread), 1);
        assert_eq!(metrics.execution_started_count(IsolationStrategy::Semaphore), 1);
    }

    #[test]
    fn command_done_records_all_events() {
        let metrics = metrics(&ClockControl::new());

        let mut result = ExecutionResult::default();
        result.add_event(EventType::Failure);
        result.add_event(EventType::FallbackEmit);
        result.add_event(EventType::FallbackSuccess);
        result.set_execution_latency(Duration::from_millis(8));
        metrics.mark_command_done(&result);

        assert_eq!(metrics.rolling_count(EventType::Failure), 1);
        assert_eq!(metrics.rolling_count(EventType::FallbackSuccess), 1);
        assert_eq!(metrics.health_counts().error_percentage, 100);
        assert_eq!(metrics.mean_execution_latency(), Some(Duration::from_millis(8)));
    }

    #[test]
    fn cached_result_only_counts_cache_hit() {
        let metrics = metrics(&ClockControl::new());

        let mut original = ExecutionResult::default();
        original.add_event(EventType::Emit);
        original.add_event(EventType::Success);
        let cached = original.cached_copy(SystemTime::UNIX_EPOCH);

        metrics.mark_command_done(&original);
        metrics.mark_command_done(&cached);

        assert_eq!(metrics.rolling_count(EventType::Success), 1);
        assert_eq!(metrics.rolling_count(EventType::ResponseFromCache), 1);
    }

    #[test]
    fn reset_window_keeps_cumulative_counts() {
        let metrics = metrics(&ClockControl::new());

        metrics.record_event(EventType::Timeout, None);
        metrics.reset_window();

        assert_eq!(metrics.rolling_count(EventType::Timeout), 0);
        assert_eq!(metrics.cumulative_count(EventType::Timeout), 1);
        assert_eq!(metrics.health_counts().total_requests, 0);
    }
}
