// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! # Command Telemetry
//!
//! Well-known attribute keys attached to the metrics and log events emitted by commands.
//!
//! Metrics are reported through a single `resilience.event` counter when the `metrics` feature
//! is enabled and [`Context::enable_metrics`][crate::Context::enable_metrics] was called. Log
//! events are emitted through `tracing` when the `logs` feature is enabled and
//! [`Context::enable_logs`][crate::Context::enable_logs] was called.
//!
//! # Conventions
//!
//! Names follow the [OpenTelemetry naming guidelines](https://opentelemetry.io/docs/specs/semconv/general/naming/#general-naming-considerations).

mod helper;
#[cfg(any(feature = "metrics", test))]
pub(crate) mod metrics;

pub(crate) use helper::{CircuitTransition, TelemetryHelper};

/// Key used to annotate the name of the [`Context`][crate::Context] that produced an event.
pub const PIPELINE_NAME: &str = "resilience.pipeline.name";

/// Key used to annotate the resilience strategy. Commands always report `command`.
pub const STRATEGY_NAME: &str = "resilience.strategy.name";

/// Key used to annotate the event being reported, for example `timeout` or `short_circuited`.
pub const EVENT_NAME: &str = "resilience.event.name";

/// Key used to annotate the command key.
pub const COMMAND_KEY: &str = "bulwark.command.key";

/// Key used to annotate the command group.
pub const COMMAND_GROUP: &str = "bulwark.command.group";

/// Key used to annotate the worker pool.
pub const COMMAND_POOL: &str = "bulwark.command.pool";

pub(crate) const STRATEGY: &str = "command";

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_keys_are_stable() {
        assert_eq!(PIPELINE_NAME, "resilience.pipeline.name");
        assert_eq!(STRATEGY_NAME, "resilience.strategy.name");
        assert_eq!(EVENT_NAME, "resilience.event.name");
        assert_eq!(COMMAND_KEY, "bulwark.command.key");
        assert_eq!(COMMAND_GROUP, "bulwark.command.group");
        assert_eq!(COMMAND_POOL, "bulwark.command.pool");
    }
}
