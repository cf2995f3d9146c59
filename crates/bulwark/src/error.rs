// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::error::Error;
use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::CommandKey;

/// A boxed, thread-safe error.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// A cheaply cloneable, shared error.
///
/// Errors produced by a command can be observed by more than one caller when the request cache
/// hands the same outcome to duplicate commands, so the underlying error is reference counted.
#[derive(Clone)]
pub struct Cause(Arc<dyn Error + Send + Sync + 'static>);

impl Cause {
    /// Wraps an error value.
    pub fn new(error: impl Error + Send + Sync + 'static) -> Self {
        Self(Arc::new(error))
    }

    /// Wraps anything that converts into a [`BoxError`], including string messages.
    pub fn from_boxed(error: impl Into<BoxError>) -> Self {
        Self(Arc::from(error.into()))
    }

    /// Attempts to downcast the wrapped error to a concrete type.
    #[must_use]
    pub fn downcast_ref<T: Error + 'static>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Returns `true` if the wrapped error is of type `T`.
    #[must_use]
    pub fn is<T: Error + 'static>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl Debug for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Error for Cause {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

/// The error type returned by command work and fallbacks.
///
/// The variant decides how the engine treats the error:
///
/// - [`Failure`][RunError::Failure]: a regular failure. It counts against the circuit breaker and
///   triggers the fallback.
/// - [`BadRequest`][RunError::BadRequest]: the caller supplied invalid input. The error skips the
///   fallback, is not counted by the circuit breaker and propagates as
///   [`CommandError::BadRequest`].
/// - [`Unrecoverable`][RunError::Unrecoverable]: the process may be in a state where running more
///   code is unsafe. The fallback never runs and the error propagates as
///   [`CommandError::Unrecoverable`].
///
/// Any [`Error`] converts into a [`Failure`][RunError::Failure], so `?` works inside
/// command work.
#[derive(Debug)]
#[non_exhaustive]
pub enum RunError {
    /// A regular failure.
    Failure(Cause),
    /// The request itself was invalid.
    BadRequest(Cause),
    /// A fault that must not be handled by a fallback.
    Unrecoverable(Cause),
}

impl RunError {
    /// Creates a regular failure.
    pub fn failure(error: impl Into<BoxError>) -> Self {
        Self::Failure(Cause::from_boxed(error))
    }

    /// Creates a bad request error.
    pub fn bad_request(error: impl Into<BoxError>) -> Self {
        Self::BadRequest(Cause::from_boxed(error))
    }

    /// Creates an unrecoverable error.
    pub fn unrecoverable(error: impl Into<BoxError>) -> Self {
        Self::Unrecoverable(Cause::from_boxed(error))
    }

    /// Returns the underlying error.
    #[must_use]
    pub fn cause(&self) -> &Cause {
        match self {
            Self::Failure(cause) | Self::BadRequest(cause) | Self::Unrecoverable(cause) => cause,
        }
    }

    /// Returns `true` for [`RunError::BadRequest`].
    #[must_use]
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest(_))
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failure(cause) => write!(f, "{cause}"),
            Self::BadRequest(cause) => write!(f, "bad request: {cause}"),
            Self::Unrecoverable(cause) => write!(f, "unrecoverable: {cause}"),
        }
    }
}

impl<E: Error + Send + Sync + 'static> From<E> for RunError {
    fn from(error: E) -> Self {
        Self::Failure(Cause::new(error))
    }
}

/// Classifies why a command did not produce its primary result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FailureType {
    /// The user work returned an error.
    CommandException,
    /// The user work did not finish within the configured timeout.
    Timeout,
    /// The circuit breaker denied the request.
    ShortCircuit,
    /// The worker pool and its queue were full.
    RejectedThreadExecution,
    /// No execution semaphore permit was available.
    RejectedSemaphoreExecution,
    /// No fallback semaphore permit was available.
    RejectedSemaphoreFallback,
    /// The request was rejected as invalid.
    BadRequestException,
    /// The user work hit a fault that bypasses fallback.
    Unrecoverable,
}

impl FailureType {
    /// Returns a stable `snake_case` name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CommandException => "command_exception",
            Self::Timeout => "timeout",
            Self::ShortCircuit => "short_circuit",
            Self::RejectedThreadExecution => "rejected_thread_execution",
            Self::RejectedSemaphoreExecution => "rejected_semaphore_execution",
            Self::RejectedSemaphoreFallback => "rejected_semaphore_fallback",
            Self::BadRequestException => "bad_request_exception",
            Self::Unrecoverable => "unrecoverable",
        }
    }
}

impl Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of a command that failed and could not recover through its fallback.
#[derive(Debug, Clone)]
pub struct CommandFailure {
    failure_type: FailureType,
    command_key: CommandKey,
    message: String,
    cause: Option<Cause>,
    fallback_cause: Option<Cause>,
}

impl CommandFailure {
    pub(crate) fn new(failure_type: FailureType, command_key: CommandKey, message: String, cause: Option<Cause>) -> Self {
        Self {
            failure_type,
            command_key,
            message,
            cause,
            fallback_cause: None,
        }
    }

    pub(crate) fn with_fallback_cause(mut self, fallback_cause: Cause) -> Self {
        self.fallback_cause = Some(fallback_cause);
        self
    }

    /// Why the primary execution did not produce a result.
    #[must_use]
    pub fn failure_type(&self) -> FailureType {
        self.failure_type
    }

    /// The key of the command that failed.
    #[must_use]
    pub fn command_key(&self) -> &CommandKey {
        &self.command_key
    }

    /// A human readable description of the failed stages.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The error of the primary execution.
    #[must_use]
    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// The error of the fallback, if the fallback was attempted and failed or was missing.
    #[must_use]
    pub fn fallback_cause(&self) -> Option<&Cause> {
        self.fallback_cause.as_ref()
    }
}

impl Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for CommandFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_ref().map(|cause| cause as &(dyn Error + 'static))
    }
}

/// The error returned to callers of a command.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum CommandError {
    /// The command instance was started more than once.
    #[error("{command_key} command instance can only be executed once, create a new instance")]
    AlreadyStarted {
        /// The command that was started twice.
        command_key: CommandKey,
    },

    /// The request was invalid. Neither the fallback nor the circuit breaker was involved.
    #[error("{command_key} rejected a bad request: {cause}")]
    BadRequest {
        /// The command that rejected the request.
        command_key: CommandKey,
        /// The error describing the invalid request.
        #[source]
        cause: Cause,
    },

    /// The command failed and no fallback result was available.
    #[error(transparent)]
    Failed(CommandFailure),

    /// The command hit a fault that bypasses fallback.
    #[error(transparent)]
    Unrecoverable(CommandFailure),
}

impl CommandError {
    /// The key of the command that produced this error.
    #[must_use]
    pub fn command_key(&self) -> &CommandKey {
        match self {
            Self::AlreadyStarted { command_key } | Self::BadRequest { command_key, .. } => command_key,
            Self::Failed(failure) | Self::Unrecoverable(failure) => failure.command_key(),
        }
    }

    /// The failure classification, if the command got past the single-start check.
    #[must_use]
    pub fn failure_type(&self) -> Option<FailureType> {
        match self {
            Self::AlreadyStarted { .. } => None,
            Self::BadRequest { .. } => Some(FailureType::BadRequestException),
            Self::Failed(failure) | Self::Unrecoverable(failure) => Some(failure.failure_type()),
        }
    }

    /// Failure details for [`Failed`][CommandError::Failed] and
    /// [`Unrecoverable`][CommandError::Unrecoverable] errors.
    #[must_use]
    pub fn failure(&self) -> Option<&CommandFailure> {
        match self {
            Self::Failed(failure) | Self::Unrecoverable(failure) => Some(failure),
            Self::AlreadyStarted { .. } | Self::BadRequest { .. } => None,
        }
    }

    /// Returns `true` for [`CommandError::BadRequest`].
    #[must_use]
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest { .. })
    }

    /// Returns `true` for [`CommandError::Unrecoverable`].
    #[must_use]
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unrecoverable(_))
    }
}

/// The circuit breaker is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker is open")]
pub struct ShortCircuited;

/// No execution permit was available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("could not acquire an execution permit")]
pub struct SemaphoreRejected;

/// The worker pool and its queue were full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("worker pool is saturated")]
pub struct PoolRejected;

/// The command did not complete within its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("command timed out")]
pub struct TimedOut;

/// The command timed out while still waiting in the worker pool queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timed out before executing")]
pub struct TimedOutBeforeStart;

/// No fallback was configured for the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no fallback available")]
pub struct FallbackMissing;

/// No fallback permit was available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("fallback execution rejected")]
pub struct FallbackRejected;

/// User code panicked.
#[derive(Debug, Clone, thiserror::Error)]
#[error("panicked: {message}")]
pub struct Panicked {
    message: String,
}

impl Panicked {
    pub(crate) fn from_payload(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());

        Self { message }
    }

    /// The panic message, when the payload was a string.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("database unavailable")]
    struct DatabaseError;

    #[test]
    fn static_assertions() {
        static_assertions::assert_impl_all!(CommandError: Send, Sync, Clone, Error);
        static_assertions::assert_impl_all!(Cause: Send, Sync, Clone, Error);
        static_assertions::assert_impl_all!(RunError: Send, Sync);
    }

    #[test]
    fn question_mark_produces_failure() {
        fn work() -> Result<(), RunError> {
            Err::<(), _>(DatabaseError)?;
            Ok(())
        }

        let error = work().unwrap_err();
        assert!(matches!(error, RunError::Failure(_)));
        assert!(error.cause().is::<DatabaseError>());
        assert_eq!(error.to_string(), "database unavailable");
    }

    #[test]
    fn constructors_accept_messages() {
        assert!(RunError::bad_request("missing id").is_bad_request());
        assert_eq!(RunError::unrecoverable("corrupt").to_string(), "unrecoverable: corrupt");
        assert_eq!(RunError::failure("boom").cause().to_string(), "boom");
    }

    #[test]
    fn failure_exposes_cause_chain() {
        let failure = CommandFailure::new(
            FailureType::CommandException,
            CommandKey::new("GetUser"),
            "GetUser failed and no fallback available.".to_string(),
            Some(Cause::new(DatabaseError)),
        )
        .with_fallback_cause(Cause::new(FallbackMissing));

        let error = CommandError::Failed(failure);

        assert_eq!(error.to_string(), "GetUser failed and no fallback available.");
        assert_eq!(error.failure_type(), Some(FailureType::CommandException));
        assert_eq!(error.command_key().as_str(), "GetUser");
        assert_eq!(error.source().unwrap().to_string(), "database unavailable");
        assert!(error.failure().unwrap().fallback_cause().unwrap().is::<FallbackMissing>());
    }

    #[test]
    fn bad_request_display() {
        let error = CommandError::BadRequest {
            command_key: CommandKey::new("GetUser"),
            cause: Cause::from_boxed("id must be positive"),
        };

        assert!(error.is_bad_request());
        assert_eq!(error.failure_type(), Some(FailureType::BadRequestException));
        assert_eq!(error.to_string(), "GetUser rejected a bad request: id must be positive");
    }

    #[test]
    fn panicked_reads_string_payloads() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(Panicked::from_payload(boxed.as_ref()).message(), "boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(Panicked::from_payload(boxed.as_ref()).message(), "owned boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(42_u32);
        assert_eq!(Panicked::from_payload(boxed.as_ref()).message(), "unknown panic payload");
    }
}
