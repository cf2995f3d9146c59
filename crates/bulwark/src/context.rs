// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::sync::Arc;

use anyspawn::Spawner;
use tick::Clock;

use crate::hooks::Hooks;
use crate::registry::Registry;
use crate::telemetry::TelemetryHelper;
use crate::{CircuitBreaker, CommandKey, CommandMetrics, ExecutionHook, PermitGate, PoolKey, WorkerPool};

pub(crate) const DEFAULT_CONTEXT_NAME: &str = "default";

/// Shared runtime dependencies and per-key state of a set of commands.
///
/// A context bundles the [`Clock`] used for timeouts and statistics, the [`Spawner`] that runs
/// pool workers and queued commands, telemetry settings, and the installed
/// [`ExecutionHook`]s. It also owns the registry of per-key resources: commands built from the
/// same context with the same [`CommandKey`] share one circuit breaker, one set of metrics and one
/// pair of semaphores, and commands with the same [`PoolKey`] share one worker pool.
///
/// Clones share the registry. Configure telemetry and hooks before building commands; commands
/// capture the context when their layer is created.
///
/// # Examples
///
/// ```
/// # #[tokio::main]
/// # async fn main() {
/// use anyspawn::Spawner;
/// use bulwark::{CommandKey, Context};
/// use tick::Clock;
///
/// let context = Context::new(Clock::new_tokio(), Spawner::new_tokio()).name("user_service");
///
/// // Nothing has been executed yet, so no breaker was created.
/// assert!(context.circuit_breaker(&CommandKey::new("GetUser")).is_none());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    clock: Clock,
    spawner: Spawner,
    name: Cow<'static, str>,
    #[cfg(any(feature = "metrics", test))]
    meter: Option<opentelemetry::metrics::Meter>,
    logs_enabled: bool,
    hooks: Hooks,
    registry: Arc<Registry>,
}

impl Context {
    /// Creates a context from a clock and a spawner. The name defaults to `default`.
    pub fn new(clock: impl AsRef<Clock>, spawner: Spawner) -> Self {
        Self {
            clock: clock.as_ref().clone(),
            spawner,
            name: Cow::Borrowed(DEFAULT_CONTEXT_NAME),
            #[cfg(any(feature = "metrics", test))]
            meter: None,
            logs_enabled: false,
            hooks: Hooks::default(),
            registry: Arc::new(Registry::default()),
        }
    }

    /// Creates a context backed by the Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    #[cfg(any(feature = "tokio", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
    pub fn new_tokio() -> Self {
        Self::new(Clock::new_tokio(), Spawner::new_tokio())
    }

    /// Sets the name reported with every telemetry event. Prefer `snake_case`.
    #[must_use]
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Enables metrics reporting with the given OpenTelemetry meter provider.
    #[must_use]
    #[cfg(any(feature = "metrics", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    pub fn enable_metrics(self, provider: &dyn opentelemetry::metrics::MeterProvider) -> Self {
        Self {
            meter: Some(crate::telemetry::metrics::create_meter(provider)),
            ..self
        }
    }

    /// Enables structured logging of command events.
    #[must_use]
    #[cfg(any(feature = "logs", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "logs")))]
    pub fn enable_logs(self) -> Self {
        Self {
            logs_enabled: true,
            ..self
        }
    }

    /// Installs a hook after the hooks already installed.
    #[must_use]
    pub fn hook(mut self, hook: impl ExecutionHook) -> Self {
        self.hooks = self.hooks.with(Arc::new(hook));
        self
    }

    /// The clock used by commands of this context.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// The circuit breaker of `key`, if a command with that key was built.
    #[must_use]
    pub fn circuit_breaker(&self, key: &CommandKey) -> Option<Arc<CircuitBreaker>> {
        self.registry.breaker(key)
    }

    /// The metrics of `key`, if a command with that key was built.
    #[must_use]
    pub fn command_metrics(&self, key: &CommandKey) -> Option<Arc<CommandMetrics>> {
        self.registry.metrics(key)
    }

    /// The execution semaphore of `key`, if a semaphore-isolated command with that key was built.
    #[must_use]
    pub fn execution_gate(&self, key: &CommandKey) -> Option<PermitGate> {
        self.registry.execution_gate(key)
    }

    /// The fallback semaphore of `key`, if a command with that key was built.
    #[must_use]
    pub fn fallback_gate(&self, key: &CommandKey) -> Option<PermitGate> {
        self.registry.fallback_gate(key)
    }

    /// The worker pool of `key`, if a thread-isolated command using it was built.
    #[must_use]
    pub fn worker_pool(&self, key: &PoolKey) -> Option<WorkerPool> {
        self.registry.pool(key)
    }

    /// Forgets all per-key state. Commands built afterwards start with closed breakers, empty
    /// metrics and fresh semaphores and pools.
    pub fn reset(&self) {
        self.registry.reset();
    }

    pub(crate) fn spawner(&self) -> &Spawner {
        &self.spawner
    }

    pub(crate) fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn create_telemetry(&self) -> TelemetryHelper {
        #[cfg_attr(
            not(any(feature = "metrics", test)),
            expect(unused_mut, reason = "only the event reporter is assigned afterwards")
        )]
        let mut telemetry = TelemetryHelper::new(self.name.clone(), self.logs_enabled);

        #[cfg(any(feature = "metrics", test))]
        {
            telemetry.event_reporter = self
                .meter
                .as_ref()
                .map(crate::telemetry::metrics::create_resilience_event_counter);
        }

        telemetry
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};

    use super::*;

    fn context() -> Context {
        Context::new(Clock::new_frozen(), Spawner::new_tokio())
    }

    #[test]
    fn static_assertions() {
        static_assertions::assert_impl_all!(Context: Send, Sync, Clone, std::fmt::Debug);
    }

    #[test]
    fn defaults() {
        let context = context();
        let telemetry = context.create_telemetry();

        assert_eq!(telemetry.pipeline_name, DEFAULT_CONTEXT_NAME);
        assert!(!telemetry.logs_enabled);
        assert!(telemetry.event_reporter.is_none());
        assert!(context.hooks().is_empty());
    }

    #[test]
    fn name_and_logs() {
        let context = context().name(String::from("orders")).enable_logs();
        let telemetry = context.create_telemetry();

        assert_eq!(telemetry.pipeline_name, "orders");
        assert!(matches!(telemetry.pipeline_name, Cow::Owned(_)));
        assert!(telemetry.logs_enabled);
    }

    #[test]
    #[cfg(not(miri))]
    fn enable_metrics_creates_reporter() {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder().with_periodic_exporter(exporter).build();

        let context = context().enable_metrics(&provider);

        assert!(context.create_telemetry().event_reporter.is_some());
    }

    #[test]
    fn clones_share_registry() {
        let context = context();
        let clone = context.clone();
        let key = CommandKey::new("GetUser");

        let _ = context.registry().resolve_execution_gate(&key, 3);
        assert!(clone.execution_gate(&key).is_some());

        clone.reset();
        assert!(context.execution_gate(&key).is_none());
    }

    #[derive(Debug)]
    struct Noop;

    impl ExecutionHook for Noop {}

    #[test]
    fn hooks_are_appended() {
        let context = context().hook(Noop);
        assert!(!context.hooks().is_empty());
    }
}
