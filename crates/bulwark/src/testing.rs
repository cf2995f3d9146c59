// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{CommandError, CommandInfo, Context, ErrorDisposition, ExecutionHook, RunError};

/// A Tokio-backed context. Must be called from within a runtime.
pub(crate) fn context() -> Context {
    Context::new_tokio()
}

/// Records the name of every hook callback, in order.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingHook {
    calls: Arc<Mutex<Vec<&'static str>>>,
    bad_requests: bool,
}

impl RecordingHook {
    /// A hook that also turns every execution error into a bad request.
    pub(crate) fn bad_requests() -> Self {
        Self {
            bad_requests: true,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn push(&self, name: &'static str) {
        self.calls.lock().push(name);
    }
}

impl ExecutionHook for RecordingHook {
    fn on_start(&self, _command: &CommandInfo) {
        self.push("on_start");
    }

    fn on_thread_start(&self, _command: &CommandInfo) {
        self.push("on_thread_start");
    }

    fn on_thread_complete(&self, _command: &CommandInfo) {
        self.push("on_thread_complete");
    }

    fn on_execution_start(&self, _command: &CommandInfo) {
        self.push("on_execution_start");
    }

    fn on_execution_success(&self, _command: &CommandInfo) {
        self.push("on_execution_success");
    }

    fn on_execution_error(&self, _command: &CommandInfo, _error: &RunError) -> ErrorDisposition {
        self.push("on_execution_error");

        if self.bad_requests {
            ErrorDisposition::BadRequest
        } else {
            ErrorDisposition::Propagate
        }
    }

    fn on_emit(&self, _command: &CommandInfo) {
        self.push("on_emit");
    }

    fn on_success(&self, _command: &CommandInfo) {
        self.push("on_success");
    }

    fn on_error(&self, _command: &CommandInfo, _error: &CommandError) -> ErrorDisposition {
        self.push("on_error");
        ErrorDisposition::Propagate
    }

    fn on_cache_hit(&self, _command: &CommandInfo) {
        self.push("on_cache_hit");
    }

    fn on_fallback_start(&self, _command: &CommandInfo) {
        self.push("on_fallback_start");
    }

    fn on_fallback_success(&self, _command: &CommandInfo) {
        self.push("on_fallback_success");
    }

    fn on_fallback_error(&self, _command: &CommandInfo, _error: &RunError) {
        self.push("on_fallback_error");
    }
}
