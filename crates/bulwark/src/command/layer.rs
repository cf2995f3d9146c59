// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use layered::{Layer, Service};

use super::callbacks::{CacheKeyFn, FallbackAction};
use super::service::{CommandService, CommandShared};
use super::FallbackArgs;
use crate::{
    CommandInfo, CommandKey, CommandProperties, Context, GroupKey, IsolationStrategy, PermitGate, PoolKey, PoolProperties, RunError,
};

/// Builder for command services.
///
/// Created by [`Command::layer`][crate::Command::layer]. Every setting has a default, so the
/// layer can be applied to a service right away:
///
/// - the group key defaults to the command key and the pool key to the group key;
/// - properties default to [`CommandProperties::default`];
/// - there is no fallback and no cache key, so failures propagate and the request cache is
///   bypassed.
///
/// Applying the layer resolves the per-key circuit breaker, metrics, semaphores and worker pool
/// from the [`Context`] registry.
#[derive(Debug)]
pub struct CommandLayer<In, Out> {
    command_key: CommandKey,
    group_key: Option<GroupKey>,
    pool_key: Option<PoolKey>,
    properties: CommandProperties,
    pool_properties: PoolProperties,
    fallback: Option<FallbackAction<Out>>,
    cache_key: Option<CacheKeyFn<In>>,
    execution_gate: Option<PermitGate>,
    fallback_gate: Option<PermitGate>,
    context: Context,
}

impl<In, Out> CommandLayer<In, Out> {
    pub(crate) fn new(command_key: CommandKey, context: &Context) -> Self {
        Self {
            command_key,
            group_key: None,
            pool_key: None,
            properties: CommandProperties::default(),
            pool_properties: PoolProperties::default(),
            fallback: None,
            cache_key: None,
            execution_gate: None,
            fallback_gate: None,
            context: context.clone(),
        }
    }

    /// Sets the group key.
    ///
    /// **Default**: the command key
    #[must_use]
    pub fn group_key(mut self, group_key: impl Into<GroupKey>) -> Self {
        self.group_key = Some(group_key.into());
        self
    }

    /// Sets the key of the worker pool used by thread-isolated executions.
    ///
    /// **Default**: the group key
    #[must_use]
    pub fn pool_key(mut self, pool_key: impl Into<PoolKey>) -> Self {
        self.pool_key = Some(pool_key.into());
        self
    }

    /// Replaces all command properties.
    #[must_use]
    pub fn properties(mut self, properties: CommandProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Sets the properties used when this layer creates the worker pool of its pool key.
    #[must_use]
    pub fn pool_properties(mut self, properties: PoolProperties) -> Self {
        self.pool_properties = properties;
        self
    }

    /// Sets the isolation strategy.
    ///
    /// **Default**: [`IsolationStrategy::Thread`]
    #[must_use]
    pub fn isolation(mut self, isolation: IsolationStrategy) -> Self {
        self.properties.isolation_strategy = isolation;
        self
    }

    /// Enables the timeout and sets its duration.
    ///
    /// **Default**: 1 second
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.properties.timeout_enabled = true;
        self.properties.timeout = timeout;
        self
    }

    /// Lets executions run without a time limit.
    #[must_use]
    pub fn disable_timeout(mut self) -> Self {
        self.properties.timeout_enabled = false;
        self
    }

    /// Sets the function that derives the request cache key from the input.
    ///
    /// Returning `None` bypasses the cache for that input. The cache is only consulted when the
    /// service is bound to a [`RequestContext`][crate::RequestContext].
    #[must_use]
    pub fn cache_key(mut self, cache_key: impl Fn(&In) -> Option<String> + Send + Sync + 'static) -> Self {
        self.cache_key = Some(CacheKeyFn::new(cache_key));
        self
    }

    /// Uses `gate` to bound executions instead of the execution semaphore of the command key.
    ///
    /// The gate applies to both isolation strategies.
    #[must_use]
    pub fn execution_gate(mut self, gate: PermitGate) -> Self {
        self.execution_gate = Some(gate);
        self
    }

    /// Uses `gate` to bound fallbacks instead of the fallback semaphore of the command key.
    #[must_use]
    pub fn fallback_gate(mut self, gate: PermitGate) -> Self {
        self.fallback_gate = Some(gate);
        self
    }

    fn info(&self) -> CommandInfo {
        let group_key = self
            .group_key
            .clone()
            .unwrap_or_else(|| GroupKey::from(&self.command_key));
        let pool_key = self.pool_key.clone().unwrap_or_else(|| PoolKey::from(&group_key));

        CommandInfo::new(self.command_key.clone(), group_key, pool_key, self.properties.isolation_strategy)
    }
}

impl<In, Out: Send + 'static> CommandLayer<In, Out> {
    /// Sets a synchronous fallback.
    ///
    /// The fallback runs when the execution fails, times out, is rejected or is short-circuited.
    /// Returning an error makes the command fail with both errors attached.
    #[must_use]
    pub fn fallback(mut self, fallback: impl Fn(FallbackArgs) -> Result<Out, RunError> + Send + Sync + 'static) -> Self {
        self.fallback = Some(FallbackAction::new_sync(fallback));
        self
    }

    /// Sets an asynchronous fallback.
    #[must_use]
    pub fn fallback_async<F, Fut>(mut self, fallback: F) -> Self
    where
        F: Fn(FallbackArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, RunError>> + Send + 'static,
    {
        self.fallback = Some(FallbackAction::new_async(fallback));
        self
    }

    /// Sets a fixed fallback value that is cloned on every use.
    #[must_use]
    pub fn fallback_value(self, value: Out) -> Self
    where
        Out: Clone + Sync,
    {
        self.fallback(move |_| Ok(value.clone()))
    }
}

impl<In, Out, S> Layer<S> for CommandLayer<In, Out>
where
    S: Service<In, Out = Result<Out, RunError>>,
{
    type Service = CommandService<In, Out, S>;

    fn layer(&self, inner: S) -> Self::Service {
        let info = self.info();
        let key = &info.command_key;
        let properties = &self.properties;
        let registry = self.context.registry();
        let clock = self.context.clock();
        let telemetry = self.context.create_telemetry();

        let execution_gate = match (&self.execution_gate, properties.isolation_strategy) {
            (Some(gate), _) => gate.clone(),
            (None, IsolationStrategy::Semaphore) => registry.resolve_execution_gate(key, properties.execution_max_concurrent_requests),
            (None, IsolationStrategy::Thread) => PermitGate::unbounded(),
        };

        let fallback_gate = self
            .fallback_gate
            .clone()
            .unwrap_or_else(|| registry.resolve_fallback_gate(key, properties.fallback_max_concurrent_requests));

        let pool = matches!(properties.isolation_strategy, IsolationStrategy::Thread)
            .then(|| registry.resolve_pool(&info.pool_key, clock, self.context.spawner(), &self.pool_properties));

        let shared = CommandShared {
            metrics: registry.resolve_metrics(key, clock, properties),
            breaker: registry.resolve_breaker(key, clock, properties, &telemetry),
            execution_gate,
            fallback_gate,
            pool,
            properties: properties.clone(),
            inner,
            fallback: self.fallback.clone(),
            cache_key: self.cache_key.clone(),
            clock: clock.clone(),
            spawner: self.context.spawner().clone(),
            hooks: self.context.hooks().clone(),
            telemetry,
            info,
        };

        CommandService {
            shared: Arc::new(shared),
            request: None,
        }
    }
}
