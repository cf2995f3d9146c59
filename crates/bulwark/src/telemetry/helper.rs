// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;

use crate::{CommandInfo, CommandKey, EventType};

/// Emits metrics and log events on behalf of commands and circuit breakers.
#[derive(Debug, Clone)]
pub(crate) struct TelemetryHelper {
    #[cfg(any(feature = "metrics", feature = "logs", test))]
    pub(crate) pipeline_name: Cow<'static, str>,
    #[cfg(any(feature = "metrics", test))]
    pub(crate) event_reporter: Option<opentelemetry::metrics::Counter<u64>>,
    pub(crate) logs_enabled: bool,
}

/// A circuit breaker state change worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CircuitTransition {
    Opened,
    HalfOpened,
    Reopened,
    Closed,
}

impl CircuitTransition {
    fn event_name(self) -> &'static str {
        match self {
            Self::Opened => "circuit_opened",
            Self::HalfOpened => "circuit_half_opened",
            Self::Reopened => "circuit_reopened",
            Self::Closed => "circuit_closed",
        }
    }
}

impl TelemetryHelper {
    #[cfg_attr(
        not(any(feature = "metrics", feature = "logs", test)),
        expect(unused_variables, reason = "unused when neither logs nor metrics are enabled")
    )]
    pub(crate) fn new(pipeline_name: Cow<'static, str>, logs_enabled: bool) -> Self {
        Self {
            #[cfg(any(feature = "metrics", feature = "logs", test))]
            pipeline_name,
            #[cfg(any(feature = "metrics", test))]
            event_reporter: None,
            logs_enabled,
        }
    }

    #[cfg_attr(
        not(any(feature = "metrics", feature = "logs", test)),
        expect(unused_variables, reason = "unused when neither logs nor metrics are enabled")
    )]
    pub(crate) fn report_event(&self, info: &CommandInfo, event: EventType) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(reporter) = &self.event_reporter {
            use crate::telemetry::{COMMAND_GROUP, COMMAND_KEY, COMMAND_POOL, EVENT_NAME, PIPELINE_NAME, STRATEGY, STRATEGY_NAME};

            reporter.add(
                1,
                &[
                    opentelemetry::KeyValue::new(PIPELINE_NAME, self.pipeline_name.clone()),
                    opentelemetry::KeyValue::new(STRATEGY_NAME, STRATEGY),
                    opentelemetry::KeyValue::new(EVENT_NAME, event.telemetry_name()),
                    opentelemetry::KeyValue::new(COMMAND_KEY, info.command_key.to_string()),
                    opentelemetry::KeyValue::new(COMMAND_GROUP, info.group_key.to_string()),
                    opentelemetry::KeyValue::new(COMMAND_POOL, info.pool_key.to_string()),
                ],
            );
        }

        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            match event {
                EventType::Failure
                | EventType::Timeout
                | EventType::ShortCircuited
                | EventType::ThreadPoolRejected
                | EventType::SemaphoreRejected
                | EventType::FallbackFailure
                | EventType::FallbackRejection
                | EventType::FallbackMissing => {
                    tracing::event!(
                        name: "bulwark.command.event",
                        tracing::Level::WARN,
                        pipeline.name = %self.pipeline_name,
                        command.key = %info.command_key,
                        command.group = %info.group_key,
                        command.pool = %info.pool_key,
                        event.name = event.telemetry_name(),
                    );
                }
                EventType::BadRequest | EventType::FallbackSuccess => {
                    tracing::event!(
                        name: "bulwark.command.event",
                        tracing::Level::DEBUG,
                        pipeline.name = %self.pipeline_name,
                        command.key = %info.command_key,
                        command.group = %info.group_key,
                        command.pool = %info.pool_key,
                        event.name = event.telemetry_name(),
                    );
                }
                _ => {}
            }
        }
    }

    #[cfg_attr(
        not(any(feature = "metrics", feature = "logs", test)),
        expect(unused_variables, reason = "unused when neither logs nor metrics are enabled")
    )]
    pub(crate) fn report_circuit(&self, command_key: &CommandKey, transition: CircuitTransition, error_percentage: u8) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(reporter) = &self.event_reporter {
            use crate::telemetry::{COMMAND_KEY, EVENT_NAME, PIPELINE_NAME, STRATEGY, STRATEGY_NAME};

            reporter.add(
                1,
                &[
                    opentelemetry::KeyValue::new(PIPELINE_NAME, self.pipeline_name.clone()),
                    opentelemetry::KeyValue::new(STRATEGY_NAME, STRATEGY),
                    opentelemetry::KeyValue::new(EVENT_NAME, transition.event_name()),
                    opentelemetry::KeyValue::new(COMMAND_KEY, command_key.to_string()),
                ],
            );
        }

        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            if transition == CircuitTransition::Opened {
                tracing::event!(
                    name: "bulwark.circuit_breaker.opened",
                    tracing::Level::WARN,
                    pipeline.name = %self.pipeline_name,
                    command.key = %command_key,
                    circuit_breaker.error_percentage = error_percentage,
                );
            } else {
                tracing::event!(
                    name: "bulwark.circuit_breaker.transition",
                    tracing::Level::INFO,
                    pipeline.name = %self.pipeline_name,
                    command.key = %command_key,
                    event.name = transition.event_name(),
                );
            }
        }
    }

    #[cfg_attr(
        not(any(feature = "logs", test)),
        expect(unused_variables, reason = "unused when logs are disabled")
    )]
    pub(crate) fn report_hook_panic(&self, info: &CommandInfo, hook: &'static str, message: &str) {
        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            tracing::event!(
                name: "bulwark.command.hook_panicked",
                tracing::Level::ERROR,
                pipeline.name = %self.pipeline_name,
                command.key = %info.command_key,
                hook.name = hook,
                panic.message = message,
            );
        }
    }

    #[cfg_attr(
        not(any(feature = "logs", test)),
        expect(unused_variables, reason = "unused when logs are disabled")
    )]
    pub(crate) fn report_unrecoverable(&self, info: &CommandInfo, cause: &dyn std::error::Error) {
        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            tracing::event!(
                name: "bulwark.command.unrecoverable",
                tracing::Level::ERROR,
                pipeline.name = %self.pipeline_name,
                command.key = %info.command_key,
                error = %cause,
            );
        }
    }
}
