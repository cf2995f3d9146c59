// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::telemetry::TelemetryHelper;
use crate::{CommandError, CommandInfo, Panicked, RunError};

/// What to do with an error observed by a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum ErrorDisposition {
    /// Keep the error as it is.
    #[default]
    Propagate,
    /// Treat the error as a bad request: no fallback, no circuit breaker statistics.
    BadRequest,
}

/// Observes the lifecycle of every command executed within a [`Context`][crate::Context].
///
/// All methods have no-op defaults, so implementations override only what they need. Hooks run
/// in the order they were installed. A panicking hook is logged and skipped; it never affects
/// the command.
///
/// For a thread-isolated command the callbacks arrive in this order:
///
/// 1. `on_start`
/// 2. `on_thread_start`, `on_execution_start`
/// 3. `on_thread_complete`
/// 4. `on_execution_success` or `on_execution_error`
/// 5. `on_fallback_start` and `on_fallback_success` or `on_fallback_error`, if the fallback runs
/// 6. `on_emit` and `on_success`, or `on_error`
///
/// Semaphore-isolated commands skip the thread callbacks. A command answered from the request
/// cache only sees `on_cache_hit`.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use bulwark::{CommandInfo, ExecutionHook};
///
/// #[derive(Debug, Default)]
/// struct CountStarts(AtomicUsize);
///
/// impl ExecutionHook for CountStarts {
///     fn on_start(&self, _command: &CommandInfo) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
#[expect(unused_variables, reason = "default implementations ignore their arguments")]
pub trait ExecutionHook: Send + Sync + 'static {
    /// The command started and was not answered from the request cache. Runs before the circuit
    /// breaker is consulted.
    fn on_start(&self, command: &CommandInfo) {}

    /// A pool worker picked up the command.
    fn on_thread_start(&self, command: &CommandInfo) {}

    /// A pool worker finished the command, regardless of the outcome.
    fn on_thread_complete(&self, command: &CommandInfo) {}

    /// The user work is about to run.
    fn on_execution_start(&self, command: &CommandInfo) {}

    /// The user work returned a value.
    fn on_execution_success(&self, command: &CommandInfo) {}

    /// The user work returned an error. Returning [`ErrorDisposition::BadRequest`] turns the
    /// error into a bad request before it is counted.
    fn on_execution_error(&self, command: &CommandInfo, error: &RunError) -> ErrorDisposition {
        ErrorDisposition::Propagate
    }

    /// The command produced a value, from the user work or from the fallback.
    fn on_emit(&self, command: &CommandInfo) {}

    /// The command finished with a value.
    fn on_success(&self, command: &CommandInfo) {}

    /// The command finished with an error. Returning [`ErrorDisposition::BadRequest`] changes
    /// the error handed to the caller. Statistics are already recorded at this point.
    fn on_error(&self, command: &CommandInfo, error: &CommandError) -> ErrorDisposition {
        ErrorDisposition::Propagate
    }

    /// The command was answered from the request cache.
    fn on_cache_hit(&self, command: &CommandInfo) {}

    /// The fallback is about to run.
    fn on_fallback_start(&self, command: &CommandInfo) {}

    /// The fallback returned a value.
    fn on_fallback_success(&self, command: &CommandInfo) {}

    /// The fallback returned an error or panicked.
    fn on_fallback_error(&self, command: &CommandInfo, error: &RunError) {}
}

/// The ordered hooks of a context.
#[derive(Clone, Default)]
pub(crate) struct Hooks(Arc<Vec<Arc<dyn ExecutionHook>>>);

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks").field("len", &self.0.len()).finish()
    }
}

impl Hooks {
    pub(crate) fn with(&self, hook: Arc<dyn ExecutionHook>) -> Self {
        let mut hooks = Vec::with_capacity(self.0.len() + 1);
        hooks.extend(self.0.iter().cloned());
        hooks.push(hook);
        Self(Arc::new(hooks))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Calls every hook, isolating panics.
    pub(crate) fn notify(
        &self,
        command: &CommandInfo,
        telemetry: &TelemetryHelper,
        name: &'static str,
        call: impl Fn(&dyn ExecutionHook),
    ) {
        for hook in self.0.iter() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| call(hook.as_ref()))) {
                telemetry.report_hook_panic(command, name, Panicked::from_payload(payload.as_ref()).message());
            }
        }
    }

    /// Calls every hook and returns [`ErrorDisposition::BadRequest`] if any of them asks for it.
    /// A panicking hook counts as [`ErrorDisposition::Propagate`].
    pub(crate) fn classify(
        &self,
        command: &CommandInfo,
        telemetry: &TelemetryHelper,
        name: &'static str,
        call: impl Fn(&dyn ExecutionHook) -> ErrorDisposition,
    ) -> ErrorDisposition {
        let mut disposition = ErrorDisposition::Propagate;

        for hook in self.0.iter() {
            match catch_unwind(AssertUnwindSafe(|| call(hook.as_ref()))) {
                Ok(ErrorDisposition::BadRequest) => disposition = ErrorDisposition::BadRequest,
                Ok(ErrorDisposition::Propagate) => {}
                Err(payload) => {
                    telemetry.report_hook_panic(command, name, Panicked::from_payload(payload.as_ref()).message());
                }
            }
        }

        disposition
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{CommandKey, GroupKey, IsolationStrategy, PoolKey};

    fn info() -> CommandInfo {
        CommandInfo::new(
            CommandKey::new("GetUser"),
            GroupKey::new("Users"),
            PoolKey::new("Users"),
            IsolationStrategy::Semaphore,
        )
    }

    fn telemetry() -> TelemetryHelper {
        TelemetryHelper::new("test".into(), true)
    }

    #[derive(Debug, Default)]
    struct Counting(AtomicUsize);

    impl ExecutionHook for Counting {
        fn on_start(&self, _command: &CommandInfo) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[derive(Debug)]
    struct Panicking;

    impl ExecutionHook for Panicking {
        fn on_start(&self, _command: &CommandInfo) {
            panic!("hook failed");
        }

        fn on_execution_error(&self, _command: &CommandInfo, _error: &RunError) -> ErrorDisposition {
            panic!("hook failed");
        }
    }

    #[derive(Debug)]
    struct Reclassify;

    impl ExecutionHook for Reclassify {
        fn on_execution_error(&self, _command: &CommandInfo, error: &RunError) -> ErrorDisposition {
            if error.to_string().contains("invalid") {
                ErrorDisposition::BadRequest
            } else {
                ErrorDisposition::Propagate
            }
        }
    }

    #[test]
    fn static_assertions() {
        static_assertions::assert_obj_safe!(ExecutionHook);
        static_assertions::assert_impl_all!(Hooks: Send, Sync, Clone);
    }

    #[test]
    fn notify_runs_hooks_in_order_and_survives_panics() {
        let counting = Arc::new(Counting::default());
        let hooks = Hooks::default()
            .with(Arc::clone(&counting) as Arc<dyn ExecutionHook>)
            .with(Arc::new(Panicking))
            .with(Arc::clone(&counting) as Arc<dyn ExecutionHook>);

        hooks.notify(&info(), &telemetry(), "on_start", |hook| hook.on_start(&info()));

        assert_eq!(counting.0.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn classify_returns_bad_request_when_any_hook_asks() {
        let hooks = Hooks::default().with(Arc::new(Panicking)).with(Arc::new(Reclassify));
        let invalid = RunError::failure("invalid user id");
        let other = RunError::failure("connection reset");

        let disposition = hooks.classify(&info(), &telemetry(), "on_execution_error", |hook| {
            hook.on_execution_error(&info(), &invalid)
        });
        assert_eq!(disposition, ErrorDisposition::BadRequest);

        let disposition = hooks.classify(&info(), &telemetry(), "on_execution_error", |hook| {
            hook.on_execution_error(&info(), &other)
        });
        assert_eq!(disposition, ErrorDisposition::Propagate);
    }

    #[test]
    fn with_does_not_modify_original() {
        let base = Hooks::default();
        let extended = base.with(Arc::new(Reclassify));

        assert!(base.is_empty());
        assert!(!extended.is_empty());
    }
}
