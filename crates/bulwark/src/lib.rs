// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Latency and fault tolerance for calls to remote systems and other unreliable dependencies.
//!
//! Wrap the call in a [`Command`] and it runs behind a set of protections:
//!
//! - **Isolation**: the work runs on a bounded [`WorkerPool`] or behind a counting semaphore, so a
//!   slow dependency can only tie up a fixed share of capacity.
//! - **Timeouts**: the caller gets an answer once the timeout expires, even when the work is still
//!   running.
//! - **Circuit breaking**: the [`CircuitBreaker`] of a command key opens when the recent error
//!   rate crosses a threshold and stops calling the dependency until a trial request succeeds.
//! - **Fallbacks**: failures, timeouts, rejections and short circuits can be replaced by a
//!   degraded value.
//! - **Request scoping**: within one [`RequestContext`], commands with the same cache key run
//!   once and share the outcome, and every executed command is recorded in a [`RequestLog`].
//!
//! # Quick Start
//!
//! ```
//! # #[tokio::main]
//! # async fn main() {
//! use std::time::Duration;
//!
//! use anyspawn::Spawner;
//! use bulwark::{Command, Context, RunError};
//! use layered::{Execute, Service, Stack};
//! use tick::Clock;
//!
//! let context = Context::new(Clock::new_tokio(), Spawner::new_tokio());
//!
//! let service = (
//!     Command::layer("GetGreeting", &context)
//!         .timeout(Duration::from_millis(200))
//!         .fallback_value("hello, stranger".to_string()),
//!     Execute::new(|name: String| async move {
//!         if name.is_empty() {
//!             return Err(RunError::failure("missing name"));
//!         }
//!         Ok(format!("hello, {name}"))
//!     }),
//! )
//!     .into_service();
//!
//! assert_eq!(service.execute("Ada".to_string()).await.unwrap(), "hello, Ada");
//! assert_eq!(service.execute(String::new()).await.unwrap(), "hello, stranger");
//! # }
//! ```
//!
//! # Keys and Shared State
//!
//! Every command is identified by a [`CommandKey`] and belongs to a [`GroupKey`] and a
//! [`PoolKey`]. Commands built from the same [`Context`] with the same command key share one
//! circuit breaker, one set of [`CommandMetrics`] and one pair of semaphores. Commands with the
//! same pool key share one worker pool.
//!
//! # Errors
//!
//! User work reports failures as [`RunError`]. A [`RunError::BadRequest`] is returned to the
//! caller as is and never counts against the circuit breaker. Everything else ends up as a
//! [`CommandError::Failed`] carrying a [`CommandFailure`] when no fallback produced a value.
//!
//! # Features
//!
//! - `tokio`: enables `Context::new_tokio`.
//! - `metrics`: reports command events through an OpenTelemetry counter.
//! - `logs`: emits command events through `tracing`.
//! - `serde`: makes [`CommandProperties`] and [`PoolProperties`] (de)serializable.

mod keys;
pub use keys::{CommandInfo, CommandKey, GroupKey, PoolKey};

mod error;
pub use error::{
    BoxError, Cause, CommandError, CommandFailure, FailureType, FallbackMissing, FallbackRejected, Panicked, PoolRejected, RunError,
    SemaphoreRejected, ShortCircuited, TimedOut, TimedOutBeforeStart,
};

mod execution_result;
pub use execution_result::{EventType, ExecutionResult};

mod status;

mod gate;
pub use gate::{Permit, PermitGate};

mod properties;
pub use properties::{CommandProperties, IsolationStrategy, PoolProperties};

mod metrics;
pub use metrics::{CommandMetrics, ConcurrencyGuard, HealthCounts};

pub mod telemetry;

mod circuit;
pub use circuit::{CircuitBreaker, CircuitState};

mod pool;
pub use pool::{PoolStats, WorkerPool};

mod hooks;
pub use hooks::{ErrorDisposition, ExecutionHook};

mod request;
pub use request::{LoggedCommand, RequestContext, RequestLog};

mod registry;

mod context;
pub use context::Context;

mod command;
pub use command::{Command, CommandLayer, CommandService, FallbackArgs, QueuedCommand};

mod utils;

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
pub(crate) mod testing;
