// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use anyspawn::Spawner;
use dashmap::DashMap;
use tick::Clock;

use crate::telemetry::TelemetryHelper;
use crate::{CircuitBreaker, CommandKey, CommandMetrics, CommandProperties, PermitGate, PoolKey, PoolProperties, WorkerPool};

/// Per-key resources shared by all commands of a [`Context`][crate::Context].
///
/// Entries are created on first use and live until [`Registry::reset`]. Resolving an existing
/// entry reapplies the dynamic settings of the resolving command.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    metrics: DashMap<CommandKey, Arc<CommandMetrics>>,
    breakers: DashMap<CommandKey, Arc<CircuitBreaker>>,
    execution_gates: DashMap<CommandKey, PermitGate>,
    fallback_gates: DashMap<CommandKey, PermitGate>,
    pools: DashMap<PoolKey, WorkerPool>,
}

impl Registry {
    pub(crate) fn resolve_metrics(&self, key: &CommandKey, clock: &Clock, properties: &CommandProperties) -> Arc<CommandMetrics> {
        if let Some(metrics) = self.metrics.get(key) {
            return Arc::clone(metrics.value());
        }

        let entry = self.metrics.entry(key.clone()).or_insert_with(|| {
            Arc::new(CommandMetrics::new(
                key.clone(),
                clock.clone(),
                properties.metrics_rolling_window,
                properties.metrics_rolling_window_buckets,
            ))
        });

        Arc::clone(entry.value())
    }

    pub(crate) fn resolve_breaker(
        &self,
        key: &CommandKey,
        clock: &Clock,
        properties: &CommandProperties,
        telemetry: &TelemetryHelper,
    ) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(key) {
            breaker.configure(properties);
            return Arc::clone(breaker.value());
        }

        let metrics = self.resolve_metrics(key, clock, properties);
        let entry = self.breakers.entry(key.clone()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                key.clone(),
                metrics,
                clock.clone(),
                properties,
                telemetry.clone(),
            ))
        });

        Arc::clone(entry.value())
    }

    pub(crate) fn resolve_execution_gate(&self, key: &CommandKey, capacity: usize) -> PermitGate {
        resolve_gate(&self.execution_gates, key, capacity)
    }

    pub(crate) fn resolve_fallback_gate(&self, key: &CommandKey, capacity: usize) -> PermitGate {
        resolve_gate(&self.fallback_gates, key, capacity)
    }

    pub(crate) fn resolve_pool(&self, key: &PoolKey, clock: &Clock, spawner: &Spawner, properties: &PoolProperties) -> WorkerPool {
        if let Some(pool) = self.pools.get(key) {
            pool.configure(properties);
            return pool.value().clone();
        }

        self.pools
            .entry(key.clone())
            .or_insert_with(|| WorkerPool::new(key.clone(), clock.clone(), spawner.clone(), properties))
            .value()
            .clone()
    }

    pub(crate) fn metrics(&self, key: &CommandKey) -> Option<Arc<CommandMetrics>> {
        self.metrics.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn breaker(&self, key: &CommandKey) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn execution_gate(&self, key: &CommandKey) -> Option<PermitGate> {
        self.execution_gates.get(key).map(|entry| entry.value().clone())
    }

    pub(crate) fn fallback_gate(&self, key: &CommandKey) -> Option<PermitGate> {
        self.fallback_gates.get(key).map(|entry| entry.value().clone())
    }

    pub(crate) fn pool(&self, key: &PoolKey) -> Option<WorkerPool> {
        self.pools.get(key).map(|entry| entry.value().clone())
    }

    /// Forgets every resource. Commands already built keep the resources they resolved.
    pub(crate) fn reset(&self) {
        self.metrics.clear();
        self.breakers.clear();
        self.execution_gates.clear();
        self.fallback_gates.clear();
        self.pools.clear();
    }
}

fn resolve_gate(gates: &DashMap<CommandKey, PermitGate>, key: &CommandKey, capacity: usize) -> PermitGate {
    if let Some(gate) = gates.get(key) {
        gate.set_capacity(capacity);
        return gate.value().clone();
    }

    gates
        .entry(key.clone())
        .or_insert_with(|| PermitGate::bounded(capacity))
        .value()
        .clone()
}
