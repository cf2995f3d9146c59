// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use layered::Service;
use parking_lot::Mutex;

use super::engine::Run;
use super::service::CommandShared;
use crate::{CommandError, CommandKey, EventType, ExecutionResult, GroupKey, PoolKey, RequestContext, RunError};

/// A single invocation of a command.
///
/// Created by [`CommandService::command`][crate::CommandService::command]. A command can be
/// started exactly once, through [`execute`][Command::execute], [`queue`][Command::queue] or
/// [`execute_blocking`][Command::execute_blocking]. Every later start fails with
/// [`CommandError::AlreadyStarted`].
///
/// After it finished, the command describes what happened through its
/// [`ExecutionResult`] and the `is_*` accessors.
///
/// # Examples
///
/// ```
/// # #[tokio::main]
/// # async fn main() {
/// use anyspawn::Spawner;
/// use bulwark::{Command, CommandError, Context, EventType, RunError};
/// use layered::{Execute, Stack};
/// use tick::Clock;
///
/// let context = Context::new(Clock::new_tokio(), Spawner::new_tokio());
/// let service = (
///     Command::layer("Echo", &context),
///     Execute::new(|text: String| async move { Ok::<_, RunError>(text) }),
/// )
///     .into_service();
///
/// let command = service.command("hello".to_string());
/// assert_eq!(command.execute().await.unwrap(), "hello");
/// assert_eq!(command.execution_events(), vec![EventType::Emit, EventType::Success]);
///
/// // A command instance runs only once.
/// assert!(matches!(command.execute().await, Err(CommandError::AlreadyStarted { .. })));
/// # }
/// ```
pub struct Command<In, Out, S> {
    shared: Arc<CommandShared<In, Out, S>>,
    request: Option<RequestContext>,
    input: Mutex<Option<In>>,
    state: Arc<InvocationState>,
}

/// Mutable state of one invocation, shared with the worker that runs it.
#[derive(Debug, Default)]
pub(crate) struct InvocationState {
    started: AtomicBool,
    complete: AtomicBool,
    result: Mutex<ExecutionResult>,
}

impl InvocationState {
    fn try_start(&self) -> bool {
        self.started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut ExecutionResult) -> R) -> R {
        f(&mut self.result.lock())
    }

    pub(crate) fn mark_complete(&self) {
        self.complete.store(true, Ordering::Release);
    }

    fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> ExecutionResult {
        self.result.lock().clone()
    }
}

impl<In, Out, S> Debug for Command<In, Out, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("command_key", &self.shared.info.command_key)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<In, Out, S> Command<In, Out, S> {
    pub(crate) fn new(shared: Arc<CommandShared<In, Out, S>>, request: Option<RequestContext>, input: In) -> Self {
        Self {
            shared,
            request,
            input: Mutex::new(Some(input)),
            state: Arc::new(InvocationState::default()),
        }
    }

    /// Claims the single start of this command.
    fn start(&self) -> Result<(Run<In, Out, S>, In), CommandError> {
        let input = self.state.try_start().then(|| self.input.lock().take()).flatten();

        let Some(input) = input else {
            return Err(CommandError::AlreadyStarted {
                command_key: self.shared.info.command_key.clone(),
            });
        };

        let run = Run {
            shared: Arc::clone(&self.shared),
            request: self.request.clone(),
            state: Arc::clone(&self.state),
        };

        Ok((run, input))
    }

    /// A snapshot of the execution result. Empty until the command was started.
    #[must_use]
    pub fn execution_result(&self) -> ExecutionResult {
        self.state.snapshot()
    }

    /// The events recorded so far, in order.
    #[must_use]
    pub fn execution_events(&self) -> Vec<EventType> {
        self.state.update(|result| result.events().to_vec())
    }

    /// Whether the user work ran on a worker pool task.
    #[must_use]
    pub fn is_executed_in_thread(&self) -> bool {
        self.state.update(|result| result.is_executed_in_thread())
    }

    /// Whether the result was served from the request cache.
    #[must_use]
    pub fn is_response_from_cache(&self) -> bool {
        self.state.update(|result| result.is_response_from_cache())
    }

    /// Whether the circuit breaker denied the execution.
    #[must_use]
    pub fn is_response_short_circuited(&self) -> bool {
        self.state.update(|result| result.is_response_short_circuited())
    }

    /// Whether the worker pool or the execution semaphore rejected the execution.
    #[must_use]
    pub fn is_response_rejected(&self) -> bool {
        self.state.update(|result| result.is_response_rejected())
    }

    /// Whether the execution timed out.
    #[must_use]
    pub fn is_response_timed_out(&self) -> bool {
        self.state.update(|result| result.is_response_timed_out())
    }

    /// Whether the user work completed successfully.
    #[must_use]
    pub fn is_successful_execution(&self) -> bool {
        self.state.update(|result| result.is_successful_execution())
    }

    /// Whether the user work returned an error.
    #[must_use]
    pub fn is_failed_execution(&self) -> bool {
        self.state.update(|result| result.is_failed_execution())
    }

    /// Whether the value came from the fallback.
    #[must_use]
    pub fn is_response_from_fallback(&self) -> bool {
        self.state.update(|result| result.is_response_from_fallback())
    }

    /// Whether the command reached its terminal state.
    #[must_use]
    pub fn is_execution_complete(&self) -> bool {
        self.state.is_complete()
    }

    /// Whether the circuit breaker of the command key is open right now.
    #[must_use]
    pub fn is_circuit_breaker_open(&self) -> bool {
        self.shared.breaker.is_open()
    }

    /// How long the user work ran.
    #[must_use]
    pub fn execution_latency(&self) -> Option<Duration> {
        self.state.update(|result| result.execution_latency())
    }

    /// Time from start until the outcome was delivered.
    #[must_use]
    pub fn total_latency(&self) -> Option<Duration> {
        self.state.update(|result| result.total_latency())
    }

    /// Number of values produced by the user work.
    #[must_use]
    pub fn emission_count(&self) -> usize {
        self.state.update(|result| result.emission_count())
    }

    /// Number of values produced by the fallback.
    #[must_use]
    pub fn fallback_emission_count(&self) -> usize {
        self.state.update(|result| result.fallback_emission_count())
    }

    /// The command key.
    #[must_use]
    pub fn command_key(&self) -> &CommandKey {
        &self.shared.info.command_key
    }

    /// The group key.
    #[must_use]
    pub fn group_key(&self) -> &GroupKey {
        &self.shared.info.group_key
    }

    /// The pool key.
    #[must_use]
    pub fn pool_key(&self) -> &PoolKey {
        &self.shared.info.pool_key
    }
}

impl<In, Out, S> Command<In, Out, S>
where
    In: Send + 'static,
    Out: Clone + Send + Sync + 'static,
    S: Service<In, Out = Result<Out, RunError>> + 'static,
{
    /// Runs the command and returns its value or the fallback value.
    ///
    /// The command starts when the returned future is first polled. Dropping the future
    /// abandons the command; thread-isolated work that already started keeps running on its
    /// worker.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the command failed and no fallback value was produced, when
    /// the request was rejected as invalid, or when the command was already started.
    pub async fn execute(&self) -> Result<Out, CommandError> {
        let (run, input) = self.start()?;
        run.run(input).await
    }

    /// Starts the command right away on the spawner of the context.
    ///
    /// The returned future resolves to the same outcome as [`execute`][Command::execute].
    /// Dropping it does not cancel the command.
    pub fn queue(&self) -> QueuedCommand<Out> {
        let inner = match self.start() {
            Ok((run, input)) => self.shared.spawner.spawn(run.run(input)).boxed(),
            Err(error) => futures::future::ready(Err(error)).boxed(),
        };

        QueuedCommand { inner }
    }

    /// Runs the command and blocks the current thread until it finished.
    ///
    /// The context's clock and spawner must be usable from the calling thread. With a Tokio
    /// context, call this from within the runtime, for example from
    /// `tokio::task::spawn_blocking`, never from an async task.
    ///
    /// # Errors
    ///
    /// Same as [`execute`][Command::execute].
    pub fn execute_blocking(&self) -> Result<Out, CommandError> {
        futures::executor::block_on(self.execute())
    }
}

/// The eventual outcome of a command started with [`Command::queue`].
pub struct QueuedCommand<Out> {
    inner: BoxFuture<'static, Result<Out, CommandError>>,
}

impl<Out> Debug for QueuedCommand<Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedCommand").finish_non_exhaustive()
    }
}

impl<Out> Future for QueuedCommand<Out> {
    type Output = Result<Out, CommandError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}
