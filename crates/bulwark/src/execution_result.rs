// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Display;
use std::time::{Duration, SystemTime};

use crate::Cause;

/// A lifecycle event recorded by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum EventType {
    /// The user work produced a value.
    Emit,
    /// The user work completed successfully.
    Success,
    /// The user work returned an error.
    Failure,
    /// The user work did not complete within the timeout.
    Timeout,
    /// The user work rejected the request as invalid.
    BadRequest,
    /// The circuit breaker denied the request.
    ShortCircuited,
    /// The worker pool rejected the work.
    ThreadPoolRejected,
    /// The execution semaphore rejected the work.
    SemaphoreRejected,
    /// The fallback produced a value.
    FallbackEmit,
    /// The fallback completed successfully.
    FallbackSuccess,
    /// The fallback returned an error.
    FallbackFailure,
    /// The fallback semaphore rejected the fallback.
    FallbackRejection,
    /// No fallback was configured.
    FallbackMissing,
    /// The caller received an error.
    ExceptionThrown,
    /// The result was served from the request cache.
    ResponseFromCache,
    /// The command was executed on behalf of a batch of requests.
    Collapsed,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [Self; 16] = [
        Self::Emit,
        Self::Success,
        Self::Failure,
        Self::Timeout,
        Self::BadRequest,
        Self::ShortCircuited,
        Self::ThreadPoolRejected,
        Self::SemaphoreRejected,
        Self::FallbackEmit,
        Self::FallbackSuccess,
        Self::FallbackFailure,
        Self::FallbackRejection,
        Self::FallbackMissing,
        Self::ExceptionThrown,
        Self::ResponseFromCache,
        Self::Collapsed,
    ];

    pub(crate) const COUNT: usize = Self::ALL.len();

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// The upper-case name used in request logs, for example `SHORT_CIRCUITED`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Emit => "EMIT",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Timeout => "TIMEOUT",
            Self::BadRequest => "BAD_REQUEST",
            Self::ShortCircuited => "SHORT_CIRCUITED",
            Self::ThreadPoolRejected => "THREAD_POOL_REJECTED",
            Self::SemaphoreRejected => "SEMAPHORE_REJECTED",
            Self::FallbackEmit => "FALLBACK_EMIT",
            Self::FallbackSuccess => "FALLBACK_SUCCESS",
            Self::FallbackFailure => "FALLBACK_FAILURE",
            Self::FallbackRejection => "FALLBACK_REJECTION",
            Self::FallbackMissing => "FALLBACK_MISSING",
            Self::ExceptionThrown => "EXCEPTION_THROWN",
            Self::ResponseFromCache => "RESPONSE_FROM_CACHE",
            Self::Collapsed => "COLLAPSED",
        }
    }

    pub(crate) fn telemetry_name(self) -> &'static str {
        match self {
            Self::Emit => "emit",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::BadRequest => "bad_request",
            Self::ShortCircuited => "short_circuited",
            Self::ThreadPoolRejected => "thread_pool_rejected",
            Self::SemaphoreRejected => "semaphore_rejected",
            Self::FallbackEmit => "fallback_emit",
            Self::FallbackSuccess => "fallback_success",
            Self::FallbackFailure => "fallback_failure",
            Self::FallbackRejection => "fallback_rejection",
            Self::FallbackMissing => "fallback_missing",
            Self::ExceptionThrown => "exception_thrown",
            Self::ResponseFromCache => "response_from_cache",
            Self::Collapsed => "collapsed",
        }
    }

    /// Whether the event decides the primary outcome of an execution attempt.
    #[must_use]
    pub fn is_primary_outcome(self) -> bool {
        matches!(
            self,
            Self::Success
                | Self::Failure
                | Self::Timeout
                | Self::BadRequest
                | Self::ShortCircuited
                | Self::ThreadPoolRejected
                | Self::SemaphoreRejected
        )
    }

    /// Whether the event counts toward the request volume seen by the circuit breaker.
    #[must_use]
    pub fn counts_toward_health(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure | Self::Timeout | Self::ThreadPoolRejected | Self::SemaphoreRejected
        )
    }

    /// Whether the event counts as an error for the circuit breaker.
    #[must_use]
    pub fn is_health_error(self) -> bool {
        matches!(self, Self::Failure | Self::Timeout | Self::ThreadPoolRejected | Self::SemaphoreRejected)
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record of what happened during one command execution.
///
/// Events are appended in the order they occurred. A typical successful execution records
/// `[EMIT, SUCCESS]`, a timed out execution rescued by its fallback records
/// `[TIMEOUT, FALLBACK_EMIT, FALLBACK_SUCCESS]`.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    events: Vec<EventType>,
    start_time: Option<SystemTime>,
    execution_latency: Option<Duration>,
    total_latency: Option<Duration>,
    executed_in_thread: bool,
    failure: Option<Cause>,
}

impl ExecutionResult {
    /// The events in the order they were recorded.
    #[must_use]
    pub fn events(&self) -> &[EventType] {
        &self.events
    }

    /// Returns `true` if `event` was recorded.
    #[must_use]
    pub fn contains(&self, event: EventType) -> bool {
        self.events.contains(&event)
    }

    /// When the command started.
    #[must_use]
    pub fn start_time(&self) -> Option<SystemTime> {
        self.start_time
    }

    /// How long the user work ran. `None` when it never ran or was served from cache.
    #[must_use]
    pub fn execution_latency(&self) -> Option<Duration> {
        self.execution_latency
    }

    /// Time from start until the caller received the outcome, including fallback.
    #[must_use]
    pub fn total_latency(&self) -> Option<Duration> {
        self.total_latency
    }

    /// Whether the user work ran on a worker pool task.
    #[must_use]
    pub fn is_executed_in_thread(&self) -> bool {
        self.executed_in_thread
    }

    /// The error of the primary execution, if any.
    #[must_use]
    pub fn execution_failure(&self) -> Option<&Cause> {
        self.failure.as_ref()
    }

    /// The first primary outcome event.
    #[must_use]
    pub fn primary_outcome(&self) -> Option<EventType> {
        self.events.iter().copied().find(|event| event.is_primary_outcome())
    }

    /// Number of values produced by the user work.
    #[must_use]
    pub fn emission_count(&self) -> usize {
        self.count(EventType::Emit)
    }

    /// Number of values produced by the fallback.
    #[must_use]
    pub fn fallback_emission_count(&self) -> usize {
        self.count(EventType::FallbackEmit)
    }

    /// Whether the user work completed successfully.
    #[must_use]
    pub fn is_successful_execution(&self) -> bool {
        self.contains(EventType::Success)
    }

    /// Whether the user work failed.
    #[must_use]
    pub fn is_failed_execution(&self) -> bool {
        self.contains(EventType::Failure)
    }

    /// Whether the result came from the fallback.
    #[must_use]
    pub fn is_response_from_fallback(&self) -> bool {
        self.contains(EventType::FallbackSuccess)
    }

    /// Whether the execution timed out.
    #[must_use]
    pub fn is_response_timed_out(&self) -> bool {
        self.contains(EventType::Timeout)
    }

    /// Whether the circuit breaker denied the execution.
    #[must_use]
    pub fn is_response_short_circuited(&self) -> bool {
        self.contains(EventType::ShortCircuited)
    }

    /// Whether the worker pool or the execution semaphore rejected the execution.
    #[must_use]
    pub fn is_response_rejected(&self) -> bool {
        self.contains(EventType::ThreadPoolRejected) || self.contains(EventType::SemaphoreRejected)
    }

    /// Whether the result was served from the request cache.
    #[must_use]
    pub fn is_response_from_cache(&self) -> bool {
        self.contains(EventType::ResponseFromCache)
    }

    fn count(&self, event: EventType) -> usize {
        self.events.iter().filter(|e| **e == event).count()
    }

    pub(crate) fn add_event(&mut self, event: EventType) {
        debug_assert!(
            !event.is_primary_outcome() || self.primary_outcome().is_none() || self.is_response_from_cache(),
            "a second primary outcome was recorded: {event}"
        );
        self.events.push(event);
    }

    pub(crate) fn set_start_time(&mut self, start_time: SystemTime) {
        self.start_time = Some(start_time);
    }

    pub(crate) fn set_execution_latency(&mut self, latency: Duration) {
        self.execution_latency = Some(latency);
    }

    pub(crate) fn set_total_latency(&mut self, latency: Duration) {
        self.total_latency = Some(latency);
    }

    pub(crate) fn set_executed_in_thread(&mut self) {
        self.executed_in_thread = true;
    }

    pub(crate) fn set_execution_failure(&mut self, cause: Cause) {
        self.failure = Some(cause);
    }

    /// Builds the result of a command that was answered from the cache.
    ///
    /// The events of the original execution are kept and `RESPONSE_FROM_CACHE` is appended.
    /// Latencies are cleared because this command did not execute anything itself.
    pub(crate) fn cached_copy(&self, start_time: SystemTime) -> Self {
        let mut copy = self.clone();
        copy.start_time = Some(start_time);
        copy.execution_latency = None;
        copy.total_latency = None;
        copy.events.retain(|event| *event != EventType::ExceptionThrown);
        copy.events.push(EventType::ResponseFromCache);
        copy
    }
}
