// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use anyspawn::Spawner;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tick::Clock;

use crate::metrics::{RollingWindow, WindowEvent};
use crate::{PoolKey, PoolProperties, PoolRejected};

/// A bounded pool of worker tasks with a bounded FIFO queue.
///
/// At most `core_size` jobs run at the same time. Further jobs wait in the queue until a worker
/// frees up, and jobs that find the queue full are rejected synchronously. Workers are tasks
/// spawned on the [`Spawner`] of the owning [`Context`][crate::Context]; a worker keeps
/// draining the queue and exits once it is empty.
///
/// Thread-isolated commands submit their work here, which lets the caller stop waiting when a
/// timeout fires even if the work itself never yields.
///
/// # Examples
///
/// ```
/// # #[tokio::main]
/// # async fn main() {
/// use bulwark::{PoolKey, PoolProperties, WorkerPool};
///
/// let mut properties = PoolProperties::default();
/// properties.core_size = 1;
///
/// let pool = WorkerPool::new(
///     PoolKey::new("users"),
///     tick::Clock::new_tokio(),
///     anyspawn::Spawner::new_tokio(),
///     &properties,
/// );
/// let (tx, rx) = futures::channel::oneshot::channel();
///
/// pool.try_submit(async move {
///     let _ = tx.send(42);
/// })
/// .unwrap();
///
/// assert_eq!(rx.await.unwrap(), 42);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct WorkerPool {
    pool_key: PoolKey,
    spawner: Spawner,
    inner: Arc<PoolInner>,
}

struct PoolInner {
    state: Mutex<PoolState>,
    core_size: AtomicUsize,
    queue_limit: AtomicUsize,
    executed: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
    window: RollingWindow<PoolEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolEvent {
    Executed,
    Rejected,
}

impl WindowEvent for PoolEvent {
    const LEN: usize = 2;

    fn position(self) -> usize {
        match self {
            Self::Executed => 0,
            Self::Rejected => 1,
        }
    }
}

struct PoolState {
    active: usize,
    queue: VecDeque<BoxFuture<'static, ()>>,
}

impl std::fmt::Debug for PoolInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PoolInner")
            .field("active", &state.active)
            .field("queued", &state.queue.len())
            .field("core_size", &self.core_size)
            .field("queue_limit", &self.queue_limit)
            .finish_non_exhaustive()
    }
}

/// Counters of a [`WorkerPool`].
///
/// The `rolling_*` counters only cover the pool's rolling window, see
/// [`PoolProperties::metrics_rolling_window`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub struct PoolStats {
    /// Jobs a worker started running.
    pub executed: u64,
    /// Jobs that ran to completion.
    pub completed: u64,
    /// Jobs rejected because all workers were busy and the queue was full.
    pub rejected: u64,
    /// Jobs started within the rolling window.
    pub rolling_executed: u64,
    /// Jobs rejected within the rolling window.
    pub rolling_rejected: u64,
}

impl WorkerPool {
    /// Creates an empty pool. Workers are spawned on demand.
    ///
    /// The rolling window settings are fixed here; [`configure`][Self::configure] only changes
    /// the worker count and the queue bound.
    #[must_use]
    pub fn new(pool_key: PoolKey, clock: Clock, spawner: Spawner, properties: &PoolProperties) -> Self {
        Self {
            pool_key,
            spawner,
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    active: 0,
                    queue: VecDeque::new(),
                }),
                core_size: AtomicUsize::new(properties.core_size),
                queue_limit: AtomicUsize::new(properties.effective_queue_limit()),
                executed: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                window: RollingWindow::new(
                    clock,
                    properties.metrics_rolling_window,
                    properties.metrics_rolling_window_buckets,
                ),
            }),
        }
    }

    /// The key this pool is registered under.
    #[must_use]
    pub fn pool_key(&self) -> &PoolKey {
        &self.pool_key
    }

    /// Reapplies the worker count and the queue bound. Running and queued jobs are kept.
    pub fn configure(&self, properties: &PoolProperties) {
        self.inner.core_size.store(properties.core_size, Ordering::Relaxed);
        self.inner
            .queue_limit
            .store(properties.effective_queue_limit(), Ordering::Relaxed);
    }

    /// Starts `job` on a free worker, or queues it when every worker is busy.
    ///
    /// # Errors
    ///
    /// Returns [`PoolRejected`] when all workers are busy and the queue is full. The job is
    /// dropped without being polled.
    pub fn try_submit(&self, job: impl Future<Output = ()> + Send + 'static) -> Result<(), PoolRejected> {
        let job = job.boxed();
        let mut state = self.inner.state.lock();

        if state.active < self.inner.core_size.load(Ordering::Relaxed) {
            state.active += 1;
            drop(state);
            self.spawn_worker(job);
            return Ok(());
        }

        if state.queue.len() < self.inner.queue_limit.load(Ordering::Relaxed) {
            state.queue.push_back(job);
            return Ok(());
        }

        drop(state);
        self.inner.rejected.fetch_add(1, Ordering::Relaxed);
        self.inner.window.increment(PoolEvent::Rejected);
        Err(PoolRejected)
    }

    /// Jobs currently running.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active
    }

    /// Jobs waiting for a free worker.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Counters since the pool was created and over its rolling window.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            executed: self.inner.executed.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
            rolling_executed: self.inner.window.count(PoolEvent::Executed),
            rolling_rejected: self.inner.window.count(PoolEvent::Rejected),
        }
    }

    fn spawn_worker(&self, first: BoxFuture<'static, ()>) {
        let inner = Arc::clone(&self.inner);

        // Fire and forget, the worker reports through the pool counters.
        drop(self.spawner.spawn(async move {
            let mut next = Some(first);

            while let Some(job) = next {
                inner.executed.fetch_add(1, Ordering::Relaxed);
                inner.window.increment(PoolEvent::Executed);

                // A panicking job must not take the worker slot down with it.
                if AssertUnwindSafe(job).catch_unwind().await.is_ok() {
                    inner.completed.fetch_add(1, Ordering::Relaxed);
                }

                next = inner.next_job();
            }
        }));
    }
}

impl PoolInner {
    fn next_job(&self) -> Option<BoxFuture<'static, ()>> {
        let mut state = self.state.lock();

        // Workers above a lowered core size retire instead of picking up more work.
        if state.active <= self.core_size.load(Ordering::Relaxed) {
            if let Some(job) = state.queue.pop_front() {
                return Some(job);
            }
        }

        state.active -= 1;
        None
    }
}
