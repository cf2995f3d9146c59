// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration of commands and worker pools.

use std::time::Duration;

/// How a command bounds its concurrent executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(any(feature = "serde", test), serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum IsolationStrategy {
    /// Runs the work on a bounded worker pool selected by the pool key.
    ///
    /// The caller waits on a channel, so it can stop waiting on timeout even if the work does
    /// not yield.
    #[default]
    Thread,

    /// Runs the work inline on the caller's task, bounded by a non-blocking semaphore.
    Semaphore,
}

impl IsolationStrategy {
    /// Returns a stable `snake_case` name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thread => "thread",
            Self::Semaphore => "semaphore",
        }
    }
}

/// Settings that control how a command executes.
///
/// Every field has a default suitable for a remote call. Circuit breaker settings and semaphore
/// limits are shared per command key and reapplied each time a service is built for the key.
/// The metrics window is fixed when the key is first used.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bulwark::{CommandProperties, IsolationStrategy};
///
/// let mut properties = CommandProperties::default();
/// properties.isolation_strategy = IsolationStrategy::Semaphore;
/// properties.timeout = Duration::from_millis(250);
///
/// assert_eq!(properties.execution_max_concurrent_requests, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(any(feature = "serde", test), serde(default))]
#[non_exhaustive]
pub struct CommandProperties {
    /// How concurrent executions are bounded.
    ///
    /// **Default**: [`IsolationStrategy::Thread`]
    pub isolation_strategy: IsolationStrategy,

    /// Whether executions are subject to [`timeout`][Self::timeout].
    ///
    /// **Default**: `true`
    pub timeout_enabled: bool,

    /// How long the caller waits for the work before falling back.
    ///
    /// **Default**: 1 second
    pub timeout: Duration,

    /// Whether thread-isolated work is aborted when it times out. When disabled, the work
    /// runs to completion and its result is discarded.
    ///
    /// **Default**: `true`
    pub interrupt_on_timeout: bool,

    /// Whether the circuit breaker is consulted at all.
    ///
    /// **Default**: `true`
    pub circuit_breaker_enabled: bool,

    /// Minimum number of requests in the rolling window before the breaker may open.
    ///
    /// **Default**: 20
    pub circuit_breaker_request_volume_threshold: u64,

    /// Error percentage at or above which the breaker opens.
    ///
    /// **Default**: 50
    pub circuit_breaker_error_threshold_percentage: u8,

    /// How long the breaker stays open before letting a trial request through.
    ///
    /// **Default**: 5 seconds
    pub circuit_breaker_sleep_window: Duration,

    /// Keeps the breaker open and rejects every request.
    ///
    /// **Default**: `false`
    pub circuit_breaker_force_open: bool,

    /// Keeps the breaker closed regardless of errors. Ignored when
    /// [`circuit_breaker_force_open`][Self::circuit_breaker_force_open] is set.
    ///
    /// **Default**: `false`
    pub circuit_breaker_force_closed: bool,

    /// Semaphore limit for [`IsolationStrategy::Semaphore`] executions.
    ///
    /// **Default**: 10
    pub execution_max_concurrent_requests: usize,

    /// Semaphore limit for concurrent fallback executions.
    ///
    /// **Default**: 10
    pub fallback_max_concurrent_requests: usize,

    /// Whether failures are handed to the fallback.
    ///
    /// **Default**: `true`
    pub fallback_enabled: bool,

    /// Whether results are shared through the request cache.
    ///
    /// **Default**: `true`
    pub request_cache_enabled: bool,

    /// Whether executions are recorded in the request log.
    ///
    /// **Default**: `true`
    pub request_log_enabled: bool,

    /// Length of the rolling statistics window read by the circuit breaker.
    ///
    /// **Default**: 10 seconds
    pub metrics_rolling_window: Duration,

    /// Number of buckets the rolling window is divided into.
    ///
    /// **Default**: 10
    pub metrics_rolling_window_buckets: usize,
}

impl Default for CommandProperties {
    fn default() -> Self {
        Self {
            isolation_strategy: IsolationStrategy::Thread,
            timeout_enabled: true,
            timeout: Duration::from_secs(1),
            interrupt_on_timeout: true,
            circuit_breaker_enabled: true,
            circuit_breaker_request_volume_threshold: 20,
            circuit_breaker_error_threshold_percentage: 50,
            circuit_breaker_sleep_window: Duration::from_secs(5),
            circuit_breaker_force_open: false,
            circuit_breaker_force_closed: false,
            execution_max_concurrent_requests: 10,
            fallback_max_concurrent_requests: 10,
            fallback_enabled: true,
            request_cache_enabled: true,
            request_log_enabled: true,
            metrics_rolling_window: Duration::from_secs(10),
            metrics_rolling_window_buckets: 10,
        }
    }
}

/// Settings of a worker pool used by thread-isolated commands.
///
/// The first command that resolves a pool key creates the pool with its properties. The
/// rejection threshold is reapplied every time a service is built for the pool key.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(any(feature = "serde", test), serde(default))]
#[non_exhaustive]
pub struct PoolProperties {
    /// Number of jobs that run concurrently.
    ///
    /// **Default**: 10
    pub core_size: usize,

    /// Hard bound of the queue of jobs waiting for a free worker. Zero disables queuing.
    ///
    /// **Default**: 0
    pub max_queue_size: usize,

    /// Soft bound of the queue that can be lowered or raised at runtime, capped by
    /// [`max_queue_size`][Self::max_queue_size].
    ///
    /// **Default**: 5
    pub queue_size_rejection_threshold: usize,

    /// Length of the rolling window behind the `rolling_*` counters of
    /// [`PoolStats`][crate::PoolStats]. Fixed when the pool is first created.
    ///
    /// **Default**: 10 seconds
    pub metrics_rolling_window: Duration,

    /// Number of buckets the pool's rolling window is divided into.
    ///
    /// **Default**: 10
    pub metrics_rolling_window_buckets: usize,
}

impl PoolProperties {
    pub(crate) fn effective_queue_limit(&self) -> usize {
        self.max_queue_size.min(self.queue_size_rejection_threshold)
    }
}

impl Default for PoolProperties {
    fn default() -> Self {
        Self {
            core_size: 10,
            max_queue_size: 0,
            queue_size_rejection_threshold: 5,
            metrics_rolling_window: Duration::from_secs(10),
            metrics_rolling_window_buckets: 10,
        }
    }
}
