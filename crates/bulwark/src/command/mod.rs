// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Command execution: the single-use [`Command`], the [`CommandService`] that creates commands
//! and the [`CommandLayer`] that builds the service.
//!
//! Every command goes through the same stages:
//!
//! 1. the request cache, when the service is bound to a [`RequestContext`][crate::RequestContext]
//!    and a cache key is configured;
//! 2. the circuit breaker of the command key;
//! 3. the execution semaphore or the worker pool, depending on the
//!    [`IsolationStrategy`][crate::IsolationStrategy];
//! 4. the user work, raced against the timeout;
//! 5. the fallback, when the work failed, timed out or was rejected;
//! 6. the terminal bookkeeping: metrics, request log and completion.
//!
//! # Examples
//!
//! ```
//! # #[tokio::main]
//! # async fn main() {
//! use std::time::Duration;
//!
//! use anyspawn::Spawner;
//! use bulwark::{Command, Context, FailureType, RunError};
//! use layered::{Execute, Stack};
//! use tick::Clock;
//!
//! let context = Context::new(Clock::new_tokio(), Spawner::new_tokio());
//!
//! let service = (
//!     Command::layer("GetQuote", &context)
//!         .group_key("Quotes")
//!         .timeout(Duration::from_millis(50))
//!         .fallback(|args| match args.failure_type() {
//!             FailureType::Timeout => Ok("cached quote".to_string()),
//!             _ => Err(RunError::failure("no quote available")),
//!         }),
//!     Execute::new(|_symbol: String| async move {
//!         tokio::time::sleep(Duration::from_secs(5)).await;
//!         Ok::<_, RunError>("live quote".to_string())
//!     }),
//! )
//!     .into_service();
//!
//! let command = service.command("MSFT".to_string());
//! assert_eq!(command.execute().await.unwrap(), "cached quote");
//! assert!(command.is_response_timed_out());
//! # }
//! ```

mod args;
mod callbacks;
mod engine;
mod invocation;
mod layer;
mod service;

pub use args::FallbackArgs;
pub use invocation::{Command, QueuedCommand};
pub use layer::CommandLayer;
pub use service::CommandService;
