// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicU8, Ordering};

/// Decides who delivers the outcome of a timed execution.
///
/// The worker and the timeout race to move the status out of `NotExecuted`. Exactly one of them
/// wins; the loser must not deliver anything. The only transitions are
/// `NotExecuted -> Completed` and `NotExecuted -> TimedOut`.
#[derive(Debug)]
pub(crate) struct TimedOutStatus(AtomicU8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Status {
    NotExecuted = 0,
    Completed = 1,
    TimedOut = 2,
}

impl TimedOutStatus {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(Status::NotExecuted as u8))
    }

    pub(crate) fn get(&self) -> Status {
        match self.0.load(Ordering::Acquire) {
            0 => Status::NotExecuted,
            1 => Status::Completed,
            _ => Status::TimedOut,
        }
    }

    /// Claims the outcome for the worker. Returns `true` if the worker may deliver its result.
    pub(crate) fn try_complete(&self) -> bool {
        self.transition(Status::Completed)
    }

    /// Claims the outcome for the timeout. Returns `true` if the timeout may deliver its error.
    pub(crate) fn try_time_out(&self) -> bool {
        self.transition(Status::TimedOut)
    }

    pub(crate) fn is_timed_out(&self) -> bool {
        self.get() == Status::TimedOut
    }

    fn transition(&self, to: Status) -> bool {
        self.0
            .compare_exchange(Status::NotExecuted as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn completion_wins_over_late_timeout() {
        let status = TimedOutStatus::new();

        assert!(status.try_complete());
        assert!(!status.try_time_out());
        assert_eq!(status.get(), Status::Completed);
    }

    #[test]
    fn timeout_wins_over_late_completion() {
        let status = TimedOutStatus::new();

        assert!(status.try_time_out());
        assert!(!status.try_complete());
        assert!(status.is_timed_out());
    }

    #[test]
    fn terminal_states_are_sticky() {
        let status = TimedOutStatus::new();
        assert!(status.try_complete());
        assert!(!status.try_complete());
    }

    #[test]
    fn exactly_one_winner_under_contention() {
        for _ in 0..100 {
            let status = Arc::new(TimedOutStatus::new());
            let workers: Vec<_> = (0..4)
                .map(|i| {
                    let status = Arc::clone(&status);
                    std::thread::spawn(move || if i % 2 == 0 { status.try_complete() } else { status.try_time_out() })
                })
                .collect();

            let winners = workers.into_iter().map(|w| w.join().unwrap()).filter(|won| *won).count();
            assert_eq!(winners, 1);
        }
    }
}
