// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Request-scoped state: the result cache and the log of executed commands.

mod cache;
mod log;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) use cache::{Lookup, RequestCache};
pub use log::{LoggedCommand, RequestLog};

use crate::CommandKey;

/// The state shared by the commands that serve one logical request.
///
/// Commands built from a service bound to a request context with
/// [`CommandService::with_request_context`][crate::CommandService::with_request_context] share
/// its cache and write their results to its [`RequestLog`]. Two commands with the same key and
/// cache key execute once; the second one receives the first one's result.
///
/// Clones share the same state. Call [`shutdown`][Self::shutdown] when the request ends; commands
/// started afterwards neither read the cache nor write to the log. Dropping the last clone also
/// releases the cached results.
///
/// # Examples
///
/// ```
/// use bulwark::RequestContext;
///
/// let request = RequestContext::new();
/// assert!(request.is_active());
/// assert!(request.request_log().is_empty());
///
/// request.shutdown();
/// assert!(!request.is_active());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    inner: Arc<RequestState>,
}

#[derive(Debug, Default)]
struct RequestState {
    cache: RequestCache,
    log: RequestLog,
    closed: AtomicBool,
}

impl RequestContext {
    /// Creates an empty request context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The log of commands executed within this request.
    #[must_use]
    pub fn request_log(&self) -> &RequestLog {
        &self.inner.log
    }

    /// Removes a single cached result, so the next command with this key executes again.
    /// Returns `true` if an entry was removed.
    pub fn invalidate(&self, command_key: &CommandKey, cache_key: &str) -> bool {
        self.inner.cache.remove(command_key, cache_key)
    }

    /// Ends the request: cached results are released, and later commands bypass the cache and the
    /// log. Commands already waiting on a cached result are not affected.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.cache.clear();
    }

    /// Returns `false` once [`shutdown`][Self::shutdown] was called.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    pub(crate) fn cache(&self) -> Option<&RequestCache> {
        self.is_active().then_some(&self.inner.cache)
    }

    pub(crate) fn log(&self) -> Option<&RequestLog> {
        self.is_active().then_some(&self.inner.log)
    }
}
