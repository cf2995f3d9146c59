// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(missing_docs, reason = "integration tests")]

//! Worker pool and semaphore isolation, rejections and fallback limits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bulwark::{
    Command, CommandProperties, Context, EventType, FailureType, IsolationStrategy, PermitGate, PoolKey, PoolProperties, RunError,
    TimedOutBeforeStart,
};
use layered::{Execute, Service, Stack};

fn single_worker(max_queue_size: usize) -> PoolProperties {
    let mut properties = PoolProperties::default();
    properties.core_size = 1;
    properties.max_queue_size = max_queue_size;
    properties.queue_size_rejection_threshold = max_queue_size;
    properties
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn full_pool_rejects_to_fallback() {
    let context = Context::new_tokio();
    let service = (
        Command::layer("Busy", &context)
            .pool_properties(single_worker(0))
            .disable_timeout()
            .fallback(|args| {
                assert_eq!(args.failure_type(), FailureType::RejectedThreadExecution);
                Ok(0)
            }),
        Execute::new(|delay_ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok::<_, RunError>(delay_ms)
        }),
    )
        .into_service();

    let blocker = service.command(300);
    let blocked = blocker.queue();

    let pool = context.worker_pool(&PoolKey::new("Busy")).unwrap();
    wait_until(|| pool.active_count() == 1).await;

    let rejected = service.command(1);
    assert_eq!(rejected.execute().await.unwrap(), 0);
    assert!(rejected.is_response_rejected());
    assert!(!rejected.is_executed_in_thread());
    assert_eq!(
        rejected.execution_events(),
        vec![EventType::ThreadPoolRejected, EventType::FallbackEmit, EventType::FallbackSuccess]
    );

    assert_eq!(blocked.await.unwrap(), 300);
    assert_eq!(pool.stats().rejected, 1);
    assert_eq!(pool.stats().rolling_rejected, 1);
    assert_eq!(pool.stats().rolling_executed, 1);
}

#[tokio::test]
async fn timed_out_queued_work_never_runs() {
    let context = Context::new_tokio();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);

    let blocker = (
        Command::layer("Blocker", &context)
            .pool_key("Shared")
            .pool_properties(single_worker(1))
            .disable_timeout(),
        Execute::new(|_: ()| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, RunError>(())
        }),
    )
        .into_service();

    let queued = (
        Command::layer("Queued", &context)
            .pool_key("Shared")
            .pool_properties(single_worker(1))
            .timeout(Duration::from_millis(30))
            .fallback(|args| Ok(args.cause().is::<TimedOutBeforeStart>())),
        Execute::new(move |_: ()| {
            counter.fetch_add(1, Ordering::Relaxed);
            async { Ok::<_, RunError>(false) }
        }),
    )
        .into_service();

    let running = blocker.command(()).queue();
    let pool = context.worker_pool(&PoolKey::new("Shared")).unwrap();
    wait_until(|| pool.active_count() == 1).await;

    let command = queued.command(());
    assert!(command.execute().await.unwrap(), "the fallback sees a timeout before start");
    assert!(command.is_response_timed_out());

    running.await.unwrap();
    wait_until(|| pool.active_count() == 0).await;

    assert_eq!(runs.load(Ordering::Relaxed), 0);
    assert_eq!(pool.queue_size(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn work_finishing_at_the_timeout_is_delivered_once() {
    let context = Context::new_tokio();

    let mut pool = PoolProperties::default();
    pool.core_size = 64;

    let service = (
        Command::layer("Borderline", &context)
            .pool_properties(pool)
            .timeout(Duration::from_millis(10))
            .fallback_value(u32::MAX),
        Execute::new(|value: u32| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, RunError>(value)
        }),
    )
        .into_service();

    for round in 0..8 {
        let commands: Vec<_> = (0..50).map(|value| service.command(round * 100 + value)).collect();
        let outcomes = futures::future::join_all(commands.iter().map(|command| command.execute())).await;

        for ((value, command), outcome) in (round * 100..).zip(&commands).zip(outcomes) {
            let result = command.execution_result();
            let succeeded = result.contains(EventType::Success);
            let timed_out = result.contains(EventType::Timeout);

            assert!(succeeded != timed_out, "exactly one of success and timeout: {result:?}");
            assert_eq!(outcome.unwrap(), if succeeded { value } else { u32::MAX });
            assert_eq!(command.emission_count() + command.fallback_emission_count(), 1);
        }
    }

    assert_eq!(service.metrics().current_concurrent_execution_count(), 0);
}

#[tokio::test]
async fn interrupted_work_is_aborted() {
    let context = Context::new_tokio();
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);

    let service = (
        Command::layer("Interrupted", &context)
            .timeout(Duration::from_millis(20))
            .fallback_value(()),
        Execute::new(move |_: ()| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flag.store(true, Ordering::Relaxed);
                Ok::<_, RunError>(())
            }
        }),
    )
        .into_service();

    service.execute(()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!finished.load(Ordering::Relaxed));
}

#[tokio::test]
async fn uninterrupted_work_runs_to_completion() {
    let context = Context::new_tokio();
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);

    let mut properties = CommandProperties::default();
    properties.timeout = Duration::from_millis(20);
    properties.interrupt_on_timeout = false;

    let service = (
        Command::layer("Uninterrupted", &context)
            .properties(properties)
            .fallback_value("fallback"),
        Execute::new(move |_: ()| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                flag.store(true, Ordering::Relaxed);
                Ok::<_, RunError>("late")
            }
        }),
    )
        .into_service();

    let command = service.command(());
    assert_eq!(command.execute().await.unwrap(), "fallback");
    assert!(command.is_response_timed_out());

    wait_until(|| finished.load(Ordering::Relaxed)).await;
    assert!(!command.is_successful_execution());
}

#[tokio::test]
async fn semaphore_bounds_concurrent_executions() {
    let context = Context::new_tokio();

    let mut properties = CommandProperties::default();
    properties.isolation_strategy = IsolationStrategy::Semaphore;
    properties.execution_max_concurrent_requests = 1;
    properties.timeout_enabled = false;

    let service = (
        Command::layer("Bounded", &context)
            .properties(properties)
            .fallback_value(u64::MAX),
        Execute::new(|delay_ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok::<_, RunError>(delay_ms)
        }),
    )
        .into_service();

    let first = service.command(200);
    let running = first.queue();
    wait_until(|| service.metrics().current_concurrent_execution_count() == 1).await;

    let second = service.command(1);
    assert_eq!(second.execute().await.unwrap(), u64::MAX);
    assert!(second.is_response_rejected());
    assert!(second.execution_result().contains(EventType::SemaphoreRejected));

    assert_eq!(running.await.unwrap(), 200);
    assert!(!first.is_executed_in_thread());

    // The permit is back once the first command finished.
    assert_eq!(service.execute(1).await.unwrap(), 1);
}

#[tokio::test]
async fn explicit_gate_shared_between_commands() {
    let context = Context::new_tokio();
    let gate = PermitGate::bounded(1);
    let _held = gate.try_acquire().unwrap();

    let service = (
        Command::layer("Gated", &context).execution_gate(gate.clone()),
        Execute::new(|value: u32| async move { Ok::<_, RunError>(value) }),
    )
        .into_service();

    let error = service.execute(1).await.unwrap_err();
    assert_eq!(error.failure_type(), Some(FailureType::RejectedSemaphoreExecution));
    assert_eq!(
        error.failure().unwrap().message(),
        "Gated could not acquire a semaphore for execution and no fallback available."
    );
}

#[tokio::test]
async fn fallback_rejected_when_fallback_gate_full() {
    let context = Context::new_tokio();
    let service = (
        Command::layer("NoCapacity", &context)
            .fallback_gate(PermitGate::bounded(0))
            .fallback_value(1),
        Execute::new(|_: ()| async { Err::<i32, _>(RunError::failure("boom")) }),
    )
        .into_service();

    let command = service.command(());
    let error = command.execute().await.unwrap_err();
    let failure = error.failure().unwrap();

    assert_eq!(failure.failure_type(), FailureType::RejectedSemaphoreFallback);
    assert_eq!(failure.message(), "NoCapacity failed and fallback execution rejected.");
    assert!(command.execution_result().contains(EventType::FallbackRejection));
}

#[tokio::test]
async fn disabled_fallback_is_never_called() {
    let context = Context::new_tokio();
    let mut properties = CommandProperties::default();
    properties.fallback_enabled = false;

    let service = (
        Command::layer("NoFallback", &context)
            .properties(properties)
            .fallback(|_| panic!("fallback must not run")),
        Execute::new(|_: ()| async { Err::<i32, _>(RunError::failure("boom")) }),
    )
        .into_service();

    let error = service.execute(()).await.unwrap_err();
    assert_eq!(error.failure().unwrap().message(), "NoFallback failed and fallback disabled.");
}
