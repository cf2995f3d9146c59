// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use anyspawn::Spawner;
use layered::Service;
use tick::Clock;

use super::callbacks::{CacheKeyFn, FallbackAction};
use super::{Command, CommandLayer};
use crate::hooks::Hooks;
use crate::telemetry::TelemetryHelper;
use crate::{
    CircuitBreaker, CommandError, CommandInfo, CommandKey, CommandMetrics, CommandProperties, Context, PermitGate, RequestContext,
    RunError, WorkerPool,
};

/// A service that runs every input as a fresh [`Command`].
///
/// Built by applying a [`CommandLayer`] to the service that does the actual work. The inner
/// service returns `Result<Out, RunError>`; this service returns `Result<Out, CommandError>`,
/// with timeouts, rejections and failures replaced by the fallback value when one is
/// configured.
///
/// Clones share the circuit breaker, metrics, semaphores and worker pool of the command key.
///
/// # Examples
///
/// ```
/// # #[tokio::main]
/// # async fn main() {
/// use anyspawn::Spawner;
/// use bulwark::{Command, Context, RunError};
/// use layered::{Execute, Service, Stack};
/// use tick::Clock;
///
/// let context = Context::new(Clock::new_tokio(), Spawner::new_tokio());
///
/// let service = (
///     Command::layer("GetUser", &context).fallback_value("guest".to_string()),
///     Execute::new(|id: u64| async move {
///         if id == 0 {
///             Err(RunError::failure("no such user"))
///         } else {
///             Ok(format!("user-{id}"))
///         }
///     }),
/// )
///     .into_service();
///
/// assert_eq!(service.execute(7).await.unwrap(), "user-7");
/// assert_eq!(service.execute(0).await.unwrap(), "guest");
/// # }
/// ```
#[derive(Debug)]
pub struct CommandService<In, Out, S> {
    pub(super) shared: Arc<CommandShared<In, Out, S>>,
    pub(super) request: Option<RequestContext>,
}

/// State shared by all commands created from one service.
#[derive(Debug)]
pub(crate) struct CommandShared<In, Out, S> {
    pub(crate) info: CommandInfo,
    pub(crate) properties: CommandProperties,
    pub(crate) inner: S,
    pub(crate) fallback: Option<FallbackAction<Out>>,
    pub(crate) cache_key: Option<CacheKeyFn<In>>,
    pub(crate) clock: Clock,
    pub(crate) spawner: Spawner,
    pub(crate) hooks: Hooks,
    pub(crate) telemetry: TelemetryHelper,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) metrics: Arc<CommandMetrics>,
    pub(crate) execution_gate: PermitGate,
    pub(crate) fallback_gate: PermitGate,
    pub(crate) pool: Option<WorkerPool>,
}

impl<In, Out, S> Clone for CommandService<In, Out, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            request: self.request.clone(),
        }
    }
}

impl<In, Out> Command<In, Out, ()> {
    /// Creates a [`CommandLayer`] for the command identified by `command_key`.
    ///
    /// The group key and the pool key default to the command key. Defaults for everything else
    /// come from [`CommandProperties::default`] and [`PoolProperties::default`][crate::PoolProperties::default].
    pub fn layer(command_key: impl Into<CommandKey>, context: &Context) -> CommandLayer<In, Out> {
        CommandLayer::new(command_key.into(), context)
    }
}

impl<In, Out, S> CommandService<In, Out, S> {
    /// Returns a clone of this service whose commands share the cache and the log of `request`.
    #[must_use]
    pub fn with_request_context(&self, request: &RequestContext) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            request: Some(request.clone()),
        }
    }

    /// Creates a single-use command for `input`. Nothing runs until the command is started.
    #[must_use]
    pub fn command(&self, input: In) -> Command<In, Out, S> {
        Command::new(Arc::clone(&self.shared), self.request.clone(), input)
    }

    /// The identity of the commands created by this service.
    #[must_use]
    pub fn info(&self) -> &CommandInfo {
        &self.shared.info
    }

    /// The properties the commands run with.
    #[must_use]
    pub fn properties(&self) -> &CommandProperties {
        &self.shared.properties
    }

    /// The circuit breaker shared by commands with this key.
    #[must_use]
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.shared.breaker
    }

    /// The metrics shared by commands with this key.
    #[must_use]
    pub fn metrics(&self) -> &Arc<CommandMetrics> {
        &self.shared.metrics
    }
}

impl<In, Out, S> Service<In> for CommandService<In, Out, S>
where
    In: Send + 'static,
    Out: Clone + Send + Sync + 'static,
    S: Service<In, Out = Result<Out, RunError>> + 'static,
{
    type Out = Result<Out, CommandError>;

    async fn execute(&self, input: In) -> Self::Out {
        self.command(input).execute().await
    }
}
