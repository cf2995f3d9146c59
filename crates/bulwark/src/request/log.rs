// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Write;
use std::time::Duration;

use parking_lot::Mutex;

use crate::{CommandKey, EventType, ExecutionResult};

/// Entries beyond this count are dropped.
pub(crate) const MAX_STORAGE: usize = 1000;

/// A command that finished within a [`RequestContext`][crate::RequestContext].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct LoggedCommand {
    /// The key of the command.
    pub command_key: CommandKey,
    /// The final execution result of the command.
    pub result: ExecutionResult,
}

/// The commands executed within one request, in completion order.
#[derive(Debug, Default)]
pub struct RequestLog {
    entries: Mutex<Vec<LoggedCommand>>,
}

impl RequestLog {
    /// Appends a command. Returns `false` when the log is full and the entry was dropped.
    pub(crate) fn add(&self, command_key: CommandKey, result: ExecutionResult) -> bool {
        let mut entries = self.entries.lock();

        if entries.len() >= MAX_STORAGE {
            return false;
        }

        entries.push(LoggedCommand { command_key, result });
        true
    }

    /// A snapshot of the commands logged so far.
    #[must_use]
    pub fn executed_commands(&self) -> Vec<LoggedCommand> {
        self.entries.lock().clone()
    }

    /// Number of commands logged so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no command was logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Summarizes the log on one line.
    ///
    /// Commands with the same key and events are merged, in order of first appearance. Each
    /// group shows the summed execution latency and, when merged, the number of commands:
    ///
    /// ```text
    /// GetUser[SUCCESS][12ms], GetOrder[FAILURE, FALLBACK_SUCCESS][3ms]x2
    /// ```
    ///
    /// Emission events are left out, and a command without events shows `[Executed]`.
    #[must_use]
    pub fn executed_commands_string(&self) -> String {
        let mut groups: Vec<(String, Duration, usize)> = Vec::new();

        for entry in self.entries.lock().iter() {
            let display = display_events(&entry.command_key, &entry.result);
            let latency = entry.result.execution_latency().unwrap_or_default();

            match groups.iter_mut().find(|(existing, ..)| *existing == display) {
                Some((_, total, count)) => {
                    *total += latency;
                    *count += 1;
                }
                None => groups.push((display, latency, 1)),
            }
        }

        let mut out = String::new();
        for (index, (display, latency, count)) in groups.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }

            let _ = write!(out, "{display}[{}ms]", latency.as_millis());
            if *count > 1 {
                let _ = write!(out, "x{count}");
            }
        }

        out
    }
}

fn display_events(command_key: &CommandKey, result: &ExecutionResult) -> String {
    let events: Vec<&str> = result
        .events()
        .iter()
        .filter(|event| !matches!(event, EventType::Emit | EventType::FallbackEmit))
        .map(|event| event.as_str())
        .collect();

    if events.is_empty() {
        format!("{command_key}[Executed]")
    } else {
        format!("{command_key}[{}]", events.join(", "))
    }
}
