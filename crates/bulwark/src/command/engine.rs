// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{AbortHandle, Abortable, BoxFuture, Either, Shared, select};
use layered::Service;

use super::FallbackArgs;
use super::invocation::InvocationState;
use super::service::CommandShared;
use crate::hooks::ErrorDisposition;
use crate::request::Lookup;
use crate::status::TimedOutStatus;
use crate::{
    Cause, CommandError, CommandFailure, EventType, ExecutionResult, FailureType, FallbackMissing, FallbackRejected, Panicked,
    PoolRejected, RequestContext, RunError, SemaphoreRejected, ShortCircuited, TimedOut, TimedOutBeforeStart, WorkerPool,
};

/// What a cache duplicate receives: the outcome and the result record of the execution it joined.
pub(crate) type CachedOutcome<Out> = (Result<Out, CommandError>, ExecutionResult);

type PendingOutcome<Out> = Shared<BoxFuture<'static, Option<CachedOutcome<Out>>>>;

type WorkOutcome<Out> = (Result<Result<Out, RunError>, Panicked>, Duration);

/// How the primary execution attempt ended.
enum Attempt<Out> {
    Completed(Result<Out, RunError>),
    Panicked(Panicked),
    TimedOut(Cause),
    PoolRejected,
}

/// One started command, from the single-start check to the terminal bookkeeping.
pub(crate) struct Run<In, Out, S> {
    pub(crate) shared: Arc<CommandShared<In, Out, S>>,
    pub(crate) request: Option<RequestContext>,
    pub(crate) state: Arc<InvocationState>,
}

impl<In, Out, S> Run<In, Out, S>
where
    In: Send + 'static,
    Out: Clone + Send + Sync + 'static,
    S: Service<In, Out = Result<Out, RunError>> + 'static,
{
    pub(crate) async fn run(self, input: In) -> Result<Out, CommandError> {
        let started_at = self.shared.clock.instant();
        let start_time = self.shared.clock.system_time();
        self.state.update(|result| result.set_start_time(start_time));

        let cache_key = self.cache_key(&input);
        let Some((request, cache_key)) = cache_key else {
            let outcome = self.start(input).await;
            return self.finish(outcome, started_at).0;
        };

        let Some(cache) = request.cache() else {
            let outcome = self.start(input).await;
            return self.finish(outcome, started_at).0;
        };

        let command_key = &self.shared.info.command_key;

        loop {
            let (sender, receiver) = oneshot::channel::<CachedOutcome<Out>>();
            let lookup = cache.get_or_publish(command_key, &cache_key, move || pending_outcome(receiver));

            match lookup {
                Lookup::Hit(pending) => {
                    // The publisher was dropped before finishing; take its place.
                    let Some((outcome, original)) = pending.clone().await else {
                        cache.remove_if(command_key, &cache_key, |entry: &PendingOutcome<Out>| entry.ptr_eq(&pending));
                        continue;
                    };

                    self.state.update(|result| *result = original.cached_copy(start_time));
                    self.shared
                        .telemetry
                        .report_event(&self.shared.info, EventType::ResponseFromCache);
                    self.notify("on_cache_hit", |hook, info| hook.on_cache_hit(info));

                    return self.finish(outcome, started_at).0;
                }
                Lookup::Published => {
                    let outcome = self.start(input).await;
                    let (outcome, snapshot) = self.finish(outcome, started_at);

                    // Waiters may all be gone already.
                    let _ = sender.send((outcome.clone(), snapshot));
                    return outcome;
                }
                Lookup::Conflict => {
                    let outcome = self.start(input).await;
                    return self.finish(outcome, started_at).0;
                }
            }
        }
    }

    /// Runs the command for real. Cache hits never get here.
    async fn start(&self, input: In) -> Result<Out, CommandError> {
        self.notify("on_start", |hook, info| hook.on_start(info));
        self.execute(input).await
    }

    fn cache_key(&self, input: &In) -> Option<(RequestContext, String)> {
        if !self.shared.properties.request_cache_enabled {
            return None;
        }

        let request = self.request.as_ref()?;
        let cache_key = self.shared.cache_key.as_ref()?.call(input)?;

        Some((request.clone(), cache_key))
    }

    async fn execute(&self, input: In) -> Result<Out, CommandError> {
        if !self.shared.breaker.allow_request() {
            self.record(EventType::ShortCircuited);
            return self
                .handle_failure(FailureType::ShortCircuit, "short-circuited", Cause::new(ShortCircuited))
                .await;
        }

        let Some(permit) = self.shared.execution_gate.try_acquire() else {
            self.record(EventType::SemaphoreRejected);
            return self
                .handle_failure(
                    FailureType::RejectedSemaphoreExecution,
                    "could not acquire a semaphore for execution",
                    Cause::new(SemaphoreRejected),
                )
                .await;
        };

        let attempt = match &self.shared.pool {
            Some(pool) => self.execute_on_pool(pool, input).await,
            None => self.execute_inline(input).await,
        };

        drop(permit);

        match attempt {
            Attempt::Completed(Ok(value)) => {
                self.notify("on_execution_success", |hook, info| hook.on_execution_success(info));
                self.record(EventType::Emit);
                self.record(EventType::Success);
                self.shared.breaker.mark_success();
                self.notify("on_emit", |hook, info| hook.on_emit(info));
                self.notify("on_success", |hook, info| hook.on_success(info));

                Ok(value)
            }
            Attempt::Completed(Err(error)) => self.handle_execution_error(error).await,
            Attempt::Panicked(panicked) => {
                let cause = Cause::new(panicked);
                self.state.update(|result| result.set_execution_failure(cause.clone()));
                self.record(EventType::Failure);
                self.unrecoverable("failed", cause)
            }
            Attempt::TimedOut(cause) => {
                self.record(EventType::Timeout);
                self.handle_failure(FailureType::Timeout, "timed-out", cause).await
            }
            Attempt::PoolRejected => {
                self.record(EventType::ThreadPoolRejected);
                self.handle_failure(
                    FailureType::RejectedThreadExecution,
                    "could not be queued for execution",
                    Cause::new(PoolRejected),
                )
                .await
            }
        }
    }

    /// Runs the work on the caller's task, racing it against the timeout.
    async fn execute_inline(&self, input: In) -> Attempt<Out> {
        let shared = &*self.shared;
        let _guard = shared.metrics.mark_command_start(shared.info.isolation);

        self.notify("on_execution_start", |hook, info| hook.on_execution_start(info));

        let started_at = shared.clock.instant();
        let work = pin!(AssertUnwindSafe(shared.inner.execute(input)).catch_unwind());

        let outcome = match self.timeout() {
            None => work.await,
            Some(timeout) => {
                let delay = pin!(shared.clock.delay(timeout));
                match select(work, delay).await {
                    Either::Left((outcome, _)) => outcome,
                    Either::Right(((), _)) => {
                        self.set_execution_latency(started_at);
                        return Attempt::TimedOut(Cause::new(TimedOut));
                    }
                }
            }
        };

        self.set_execution_latency(started_at);

        match outcome {
            Ok(result) => Attempt::Completed(result),
            Err(payload) => Attempt::Panicked(Panicked::from_payload(payload.as_ref())),
        }
    }

    /// Submits the work to the worker pool and waits for it, or for the timeout.
    ///
    /// The worker and the timeout race on a [`TimedOutStatus`]; only the winner delivers an
    /// outcome. A job that is dequeued after its command timed out never runs.
    async fn execute_on_pool(&self, pool: &WorkerPool, input: In) -> Attempt<Out> {
        let status = Arc::new(TimedOutStatus::new());
        let job_started = Arc::new(AtomicBool::new(false));
        let (abort, registration) = AbortHandle::new_pair();
        let (sender, receiver) = oneshot::channel::<WorkOutcome<Out>>();

        let job = {
            let shared = Arc::clone(&self.shared);
            let state = Arc::clone(&self.state);
            let status = Arc::clone(&status);
            let job_started = Arc::clone(&job_started);

            async move {
                if status.is_timed_out() {
                    return;
                }

                job_started.store(true, Ordering::Release);
                let _guard = shared.metrics.mark_command_start(shared.info.isolation);

                shared
                    .hooks
                    .notify(&shared.info, &shared.telemetry, "on_thread_start", |hook| hook.on_thread_start(&shared.info));
                shared
                    .hooks
                    .notify(&shared.info, &shared.telemetry, "on_execution_start", |hook| {
                        hook.on_execution_start(&shared.info);
                    });
                state.update(ExecutionResult::set_executed_in_thread);

                let started_at = shared.clock.instant();
                let work = AssertUnwindSafe(shared.inner.execute(input)).catch_unwind();
                let outcome = Abortable::new(work, registration).await;
                let latency = shared.clock.instant().saturating_duration_since(started_at);

                shared
                    .hooks
                    .notify(&shared.info, &shared.telemetry, "on_thread_complete", |hook| {
                        hook.on_thread_complete(&shared.info);
                    });

                // Aborted work timed out, and the caller already delivered the timeout.
                let Ok(outcome) = outcome else {
                    return;
                };

                if status.try_complete() {
                    let outcome = outcome.map_err(|payload| Panicked::from_payload(payload.as_ref()));
                    let _ = sender.send((outcome, latency));
                }
            }
        };

        if pool.try_submit(job).is_err() {
            return Attempt::PoolRejected;
        }

        let received = match self.timeout() {
            None => receiver.await,
            Some(timeout) => {
                let delay = pin!(self.shared.clock.delay(timeout));
                match select(receiver, delay).await {
                    Either::Left((received, _)) => received,
                    Either::Right(((), receiver)) => {
                        if status.try_time_out() {
                            if self.shared.properties.interrupt_on_timeout {
                                abort.abort();
                            }

                            let cause = if job_started.load(Ordering::Acquire) {
                                Cause::new(TimedOut)
                            } else {
                                Cause::new(TimedOutBeforeStart)
                            };

                            return Attempt::TimedOut(cause);
                        }

                        // The worker completed first and its outcome is on the way.
                        receiver.await
                    }
                }
            }
        };

        match received {
            Ok((outcome, latency)) => {
                self.state.update(|result| result.set_execution_latency(latency));
                match outcome {
                    Ok(result) => Attempt::Completed(result),
                    Err(panicked) => Attempt::Panicked(panicked),
                }
            }
            Err(oneshot::Canceled) => Attempt::Completed(Err(RunError::failure("the worker dropped the command before completing it"))),
        }
    }

    async fn handle_execution_error(&self, error: RunError) -> Result<Out, CommandError> {
        let shared = &*self.shared;
        let disposition = shared
            .hooks
            .classify(&shared.info, &shared.telemetry, "on_execution_error", |hook| {
                hook.on_execution_error(&shared.info, &error)
            });

        self.state.update(|result| result.set_execution_failure(error.cause().clone()));

        match error {
            RunError::BadRequest(cause) => self.bad_request(cause),
            RunError::Failure(cause) if disposition == ErrorDisposition::BadRequest => self.bad_request(cause),
            RunError::Unrecoverable(cause) => {
                self.record(EventType::Failure);
                self.unrecoverable("failed", cause)
            }
            RunError::Failure(cause) => {
                self.record(EventType::Failure);
                self.handle_failure(FailureType::CommandException, "failed", cause).await
            }
        }
    }

    fn bad_request(&self, cause: Cause) -> Result<Out, CommandError> {
        self.record(EventType::BadRequest);
        self.fail(CommandError::BadRequest {
            command_key: self.shared.info.command_key.clone(),
            cause,
        })
    }

    fn unrecoverable(&self, stage: &str, cause: Cause) -> Result<Out, CommandError> {
        let key = &self.shared.info.command_key;

        self.shared.breaker.mark_non_success();
        self.shared.telemetry.report_unrecoverable(&self.shared.info, &cause);

        self.fail(CommandError::Unrecoverable(CommandFailure::new(
            FailureType::Unrecoverable,
            key.clone(),
            format!("{key} {stage} and encountered unrecoverable error."),
            Some(cause),
        )))
    }

    /// Produces the fallback value, or the error that describes why there is none.
    async fn handle_failure(&self, failure_type: FailureType, stage: &str, cause: Cause) -> Result<Out, CommandError> {
        let shared = &*self.shared;
        let key = &shared.info.command_key;

        if failure_type != FailureType::ShortCircuit {
            shared.breaker.mark_non_success();
        }

        if !shared.properties.fallback_enabled {
            return self.fail(CommandError::Failed(CommandFailure::new(
                failure_type,
                key.clone(),
                format!("{key} {stage} and fallback disabled."),
                Some(cause),
            )));
        }

        let Some(permit) = shared.fallback_gate.try_acquire() else {
            self.record(EventType::FallbackRejection);
            return self.fail(CommandError::Failed(
                CommandFailure::new(
                    FailureType::RejectedSemaphoreFallback,
                    key.clone(),
                    format!("{key} {stage} and fallback execution rejected."),
                    Some(cause),
                )
                .with_fallback_cause(Cause::new(FallbackRejected)),
            ));
        };

        let Some(fallback) = &shared.fallback else {
            drop(permit);
            self.record(EventType::FallbackMissing);
            return self.fail(CommandError::Failed(
                CommandFailure::new(
                    failure_type,
                    key.clone(),
                    format!("{key} {stage} and no fallback available."),
                    Some(cause),
                )
                .with_fallback_cause(Cause::new(FallbackMissing)),
            ));
        };

        self.notify("on_fallback_start", |hook, info| hook.on_fallback_start(info));

        let args = FallbackArgs::new(failure_type, cause.clone());
        let result = match AssertUnwindSafe(fallback.call(args)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(RunError::Failure(Cause::new(Panicked::from_payload(payload.as_ref())))),
        };

        drop(permit);

        match result {
            Ok(value) => {
                self.record(EventType::FallbackEmit);
                self.record(EventType::FallbackSuccess);
                self.notify("on_fallback_success", |hook, info| hook.on_fallback_success(info));
                self.notify("on_emit", |hook, info| hook.on_emit(info));
                self.notify("on_success", |hook, info| hook.on_success(info));

                Ok(value)
            }
            Err(error) => {
                self.record(EventType::FallbackFailure);
                shared
                    .hooks
                    .notify(&shared.info, &shared.telemetry, "on_fallback_error", |hook| {
                        hook.on_fallback_error(&shared.info, &error);
                    });

                self.fail(CommandError::Failed(
                    CommandFailure::new(failure_type, key.clone(), format!("{key} {stage} and fallback failed."), Some(cause))
                        .with_fallback_cause(error.cause().clone()),
                ))
            }
        }
    }

    /// Passes an error through the `on_error` hooks, which may turn it into a bad request.
    fn fail(&self, error: CommandError) -> Result<Out, CommandError> {
        let shared = &*self.shared;
        let disposition = shared
            .hooks
            .classify(&shared.info, &shared.telemetry, "on_error", |hook| hook.on_error(&shared.info, &error));

        if disposition == ErrorDisposition::BadRequest && !error.is_bad_request() {
            let cause = error
                .failure()
                .and_then(CommandFailure::cause)
                .cloned()
                .unwrap_or_else(|| Cause::new(error.clone()));

            return Err(CommandError::BadRequest {
                command_key: shared.info.command_key.clone(),
                cause,
            });
        }

        Err(error)
    }

    /// Terminal bookkeeping. Runs exactly once per started command.
    fn finish(&self, outcome: Result<Out, CommandError>, started_at: Instant) -> (Result<Out, CommandError>, ExecutionResult) {
        let shared = &*self.shared;
        let total_latency = shared.clock.instant().saturating_duration_since(started_at);

        let snapshot = self.state.update(|result| {
            result.set_total_latency(total_latency);
            if outcome.is_err() {
                result.add_event(EventType::ExceptionThrown);
            }
            result.clone()
        });

        if outcome.is_err() {
            shared.telemetry.report_event(&shared.info, EventType::ExceptionThrown);
        }

        shared.metrics.mark_command_done(&snapshot);

        if shared.properties.request_log_enabled {
            if let Some(log) = self.request.as_ref().and_then(RequestContext::log) {
                log.add(shared.info.command_key.clone(), snapshot.clone());
            }
        }

        self.state.mark_complete();

        (outcome, snapshot)
    }

    fn record(&self, event: EventType) {
        self.state.update(|result| result.add_event(event));
        self.shared.telemetry.report_event(&self.shared.info, event);
    }

    fn set_execution_latency(&self, started_at: Instant) {
        let latency = self.shared.clock.instant().saturating_duration_since(started_at);
        self.state.update(|result| result.set_execution_latency(latency));
    }

    fn timeout(&self) -> Option<Duration> {
        let properties = &self.shared.properties;
        properties.timeout_enabled.then_some(properties.timeout)
    }

    fn notify(&self, name: &'static str, call: impl Fn(&dyn crate::ExecutionHook, &crate::CommandInfo)) {
        let shared = &*self.shared;
        shared
            .hooks
            .notify(&shared.info, &shared.telemetry, name, |hook| call(hook, &shared.info));
    }
}

/// The future a cache duplicate awaits. It resolves once the publishing command finishes, or to
/// `None` when the publisher was dropped before it could deliver.
fn pending_outcome<Out>(receiver: oneshot::Receiver<CachedOutcome<Out>>) -> PendingOutcome<Out>
where
    Out: Clone + Send + Sync + 'static,
{
    receiver.map(Result::ok).boxed().shared()
}
