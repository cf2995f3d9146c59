// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tick::Clock;

use crate::telemetry::{CircuitTransition, TelemetryHelper};
use crate::{CommandKey, CommandMetrics, CommandProperties};

/// The state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CircuitState {
    /// Requests flow normally while the error rate is evaluated.
    Closed = 0,
    /// Requests are short-circuited until the sleep window elapses.
    Open = 1,
    /// A single trial request is in flight. Everything else is short-circuited.
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }

    /// Returns the upper-case name of the state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether requests of one command key are allowed to execute.
///
/// The breaker starts [`Closed`][CircuitState::Closed]. While closed it reads the
/// [`HealthCounts`][crate::HealthCounts] of the command's rolling window on every request, and
/// opens once both the request volume and the error percentage reach their thresholds. After
/// the sleep window a single trial request is let through: its success closes the breaker and
/// clears the rolling window, its failure opens the breaker again.
///
/// All state lives in atomics, so the breaker never blocks. Breakers are shared by every command
/// with the same key and are obtained through
/// [`Context::circuit_breaker`][crate::Context::circuit_breaker].
#[derive(Debug)]
pub struct CircuitBreaker {
    command_key: CommandKey,
    metrics: Arc<CommandMetrics>,
    clock: Clock,
    origin: Instant,
    options: BreakerOptions,
    state: AtomicU8,
    opened_at_ms: AtomicU64,
    trial_started_ms: AtomicU64,
    telemetry: TelemetryHelper,
}

#[derive(Debug)]
struct BreakerOptions {
    enabled: AtomicBool,
    force_open: AtomicBool,
    force_closed: AtomicBool,
    request_volume_threshold: AtomicU64,
    error_threshold_percentage: AtomicU8,
    sleep_window_ms: AtomicU64,
}

impl CircuitBreaker {
    pub(crate) fn new(
        command_key: CommandKey,
        metrics: Arc<CommandMetrics>,
        clock: Clock,
        properties: &CommandProperties,
        telemetry: TelemetryHelper,
    ) -> Self {
        let breaker = Self {
            command_key,
            metrics,
            origin: clock.instant(),
            clock,
            options: BreakerOptions {
                enabled: AtomicBool::new(true),
                force_open: AtomicBool::new(false),
                force_closed: AtomicBool::new(false),
                request_volume_threshold: AtomicU64::new(0),
                error_threshold_percentage: AtomicU8::new(0),
                sleep_window_ms: AtomicU64::new(0),
            },
            state: AtomicU8::new(CircuitState::Closed as u8),
            opened_at_ms: AtomicU64::new(0),
            trial_started_ms: AtomicU64::new(0),
            telemetry,
        };

        breaker.configure(properties);
        breaker
    }

    /// Applies the breaker-related properties. Called whenever a command resolves the breaker,
    /// so the most recently built command decides the thresholds.
    pub(crate) fn configure(&self, properties: &CommandProperties) {
        let options = &self.options;
        options.enabled.store(properties.circuit_breaker_enabled, Ordering::Relaxed);
        options.force_open.store(properties.circuit_breaker_force_open, Ordering::Relaxed);
        options.force_closed.store(properties.circuit_breaker_force_closed, Ordering::Relaxed);
        options
            .request_volume_threshold
            .store(properties.circuit_breaker_request_volume_threshold, Ordering::Relaxed);
        options
            .error_threshold_percentage
            .store(properties.circuit_breaker_error_threshold_percentage, Ordering::Relaxed);
        options
            .sleep_window_ms
            .store(duration_to_ms(properties.circuit_breaker_sleep_window), Ordering::Relaxed);
    }

    /// The command this breaker guards.
    #[must_use]
    pub fn command_key(&self) -> &CommandKey {
        &self.command_key
    }

    /// Returns `true` if a request may execute now.
    ///
    /// This call may change the state: it opens a closed breaker whose window is unhealthy, and
    /// admits the trial request of an open breaker whose sleep window elapsed.
    pub fn allow_request(&self) -> bool {
        if !self.options.enabled.load(Ordering::Relaxed) {
            return true;
        }

        if self.options.force_open.load(Ordering::Relaxed) {
            return false;
        }

        if self.options.force_closed.load(Ordering::Relaxed) {
            return true;
        }

        match self.state() {
            CircuitState::Closed => self.evaluate_health(),
            CircuitState::Open => self.try_start_trial(),
            CircuitState::HalfOpen => self.try_replace_lost_trial(),
        }
    }

    /// Reports a successful execution. Closes a half-open breaker and clears the rolling window.
    pub fn mark_success(&self) {
        if !self.options.enabled.load(Ordering::Relaxed) {
            return;
        }

        if self.transition(CircuitState::HalfOpen, CircuitState::Closed) {
            self.metrics.reset_window();
            self.telemetry
                .report_circuit(&self.command_key, CircuitTransition::Closed, 0);
        }
    }

    /// Reports an execution that did not succeed. Re-opens a half-open breaker with a fresh
    /// sleep window.
    pub fn mark_non_success(&self) {
        if !self.options.enabled.load(Ordering::Relaxed) || self.state() != CircuitState::HalfOpen {
            return;
        }

        self.opened_at_ms.store(self.now_ms(), Ordering::Release);

        if self.transition(CircuitState::HalfOpen, CircuitState::Open) {
            self.telemetry.report_circuit(
                &self.command_key,
                CircuitTransition::Reopened,
                self.metrics.health_counts().error_percentage,
            );
        }
    }

    /// Returns `true` if requests are currently being short-circuited.
    ///
    /// A half-open breaker counts as open, since all requests except the trial are rejected.
    #[must_use]
    pub fn is_open(&self) -> bool {
        if !self.options.enabled.load(Ordering::Relaxed) {
            return false;
        }

        if self.options.force_open.load(Ordering::Relaxed) {
            return true;
        }

        if self.options.force_closed.load(Ordering::Relaxed) {
            return false;
        }

        self.state() != CircuitState::Closed
    }

    /// The current state, ignoring the forced overrides.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn evaluate_health(&self) -> bool {
        let health = self.metrics.health_counts();

        if health.total_requests < self.options.request_volume_threshold.load(Ordering::Relaxed)
            || health.error_percentage < self.options.error_threshold_percentage.load(Ordering::Relaxed)
        {
            return true;
        }

        // The open time must be visible before the state flips.
        self.opened_at_ms.store(self.now_ms(), Ordering::Release);

        if self.transition(CircuitState::Closed, CircuitState::Open) {
            self.telemetry
                .report_circuit(&self.command_key, CircuitTransition::Opened, health.error_percentage);
        }

        false
    }

    fn try_start_trial(&self) -> bool {
        let now = self.now_ms();
        let opened_at = self.opened_at_ms.load(Ordering::Acquire);

        if now.saturating_sub(opened_at) < self.options.sleep_window_ms.load(Ordering::Relaxed) {
            return false;
        }

        self.trial_started_ms.store(now, Ordering::Release);

        if self.transition(CircuitState::Open, CircuitState::HalfOpen) {
            self.telemetry
                .report_circuit(&self.command_key, CircuitTransition::HalfOpened, 0);
            return true;
        }

        false
    }

    // A trial that never reported back within a sleep window is presumed lost.
    fn try_replace_lost_trial(&self) -> bool {
        let now = self.now_ms();
        let started = self.trial_started_ms.load(Ordering::Acquire);

        if now.saturating_sub(started) < self.options.sleep_window_ms.load(Ordering::Relaxed) {
            return false;
        }

        self.trial_started_ms
            .compare_exchange(started, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn transition(&self, from: CircuitState, to: CircuitState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn now_ms(&self) -> u64 {
        duration_to_ms(self.clock.instant().saturating_duration_since(self.origin))
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
