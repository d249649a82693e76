// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use claims::{assert_err, assert_ok};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};
use tempo_executor::{Executor, Rejected, Work};
use tempo_future::CompletionError;
use tempo_pipelined_executor::PipelinedExecutor;
use tempo_sync::interrupt;

/// Shared rayon pool exposed through the toolkit's executor handle.
struct PoolExecutor {
    pool: rayon::ThreadPool,
}

impl PoolExecutor {
    fn new(threads: usize) -> Arc<Self> {
        Arc::new(Self {
            pool: rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap(),
        })
    }
}

impl Executor for PoolExecutor {
    fn execute(&self, work: Work) -> Result<(), Rejected> {
        self.pool.spawn(work);
        Ok(())
    }
}

struct RejectingExecutor;

impl Executor for RejectingExecutor {
    fn execute(&self, _work: Work) -> Result<(), Rejected> {
        Err(Rejected)
    }
}

fn spin_until(pred: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !pred() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::yield_now();
    }
    true
}

#[test]
fn same_key_tasks_are_serialized() {
    // 1000 read-modify-write increments against a counter that loses
    // updates under concurrency; the total is exact only if the pipeline
    // serializes them.
    let service = PipelinedExecutor::new(PoolExecutor::new(4));
    let counter = Arc::new(Mutex::new(0u64));
    let overlapping = Arc::new(AtomicUsize::new(0));

    let mut last = None;
    for _ in 0..1000 {
        let counter = Arc::clone(&counter);
        let overlapping = Arc::clone(&overlapping);
        last = Some(service.submit("A", move || {
            assert_eq!(overlapping.fetch_add(1, Ordering::SeqCst), 0);
            let read = *counter.lock().unwrap();
            *counter.lock().unwrap() = read + 1;
            overlapping.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }));
    }
    assert_ok!(last.unwrap().await_done());
    assert_eq!(*counter.lock().unwrap(), 1000);
}

#[test]
fn same_key_tasks_run_in_submission_order() {
    let service = PipelinedExecutor::new(PoolExecutor::new(4));
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut futures = Vec::new();
    for index in 0..100 {
        let order = Arc::clone(&order);
        futures.push(service.submit("ordered", move || {
            order.lock().unwrap().push(index);
            Ok(index)
        }));
    }
    for future in &futures {
        assert_ok!(future.await_done());
    }
    assert_eq!(*order.lock().unwrap(), (0..100).collect::<Vec<_>>());
}

#[test]
fn distinct_keys_run_concurrently() {
    let service = PipelinedExecutor::new(PoolExecutor::new(2));
    let left_started = Arc::new(AtomicBool::new(false));
    let right_started = Arc::new(AtomicBool::new(false));

    // Each task refuses to finish until it has seen the other start; this
    // only completes if the two keys genuinely run in parallel.
    let left = {
        let mine = Arc::clone(&left_started);
        let other = Arc::clone(&right_started);
        service.submit("left", move || {
            mine.store(true, Ordering::SeqCst);
            assert!(spin_until(
                || other.load(Ordering::SeqCst),
                Duration::from_secs(5)
            ));
            Ok(())
        })
    };
    let right = {
        let mine = Arc::clone(&right_started);
        let other = Arc::clone(&left_started);
        service.submit("right", move || {
            mine.store(true, Ordering::SeqCst);
            assert!(spin_until(
                || other.load(Ordering::SeqCst),
                Duration::from_secs(5)
            ));
            Ok(())
        })
    };
    assert_ok!(left.get());
    assert_ok!(right.get());
}

#[test]
fn submitted_value_flows_through_the_future() {
    let service = PipelinedExecutor::new(PoolExecutor::new(2));
    let future = service.submit("k", || Ok(21 * 2));
    assert_eq!(future.get().unwrap(), 42);

    let future = service.submit_with_result("k", || {}, 7);
    assert_eq!(future.get().unwrap(), 7);

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let future = service.submit_runnable("k", move || flag.store(true, Ordering::SeqCst));
    assert_ok!(future.get());
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn task_error_fails_the_future() {
    let service = PipelinedExecutor::new(PoolExecutor::new(2));
    let future = service.submit("k", || -> anyhow::Result<u32> {
        Err(anyhow::anyhow!("task exploded"))
    });
    match future.get() {
        Err(CompletionError::Failed(cause)) => {
            assert_eq!(cause.to_string(), "task exploded");
        }
        other => panic!("expected task failure, got {other:?}"),
    }
}

#[test]
fn quiescence_follows_the_work() {
    let service = PipelinedExecutor::new(PoolExecutor::new(2));
    assert!(service.is_quiescent());
    assert!(service.is_pipeline_quiescent(&"gated"));

    let release = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&release);
    let future = service.submit("gated", move || {
        assert!(spin_until(
            || gate.load(Ordering::SeqCst),
            Duration::from_secs(5)
        ));
        Ok(())
    });

    assert!(spin_until(
        || !service.is_quiescent(),
        Duration::from_secs(1)
    ));
    assert!(!service.is_pipeline_quiescent(&"gated"));
    assert!(!service
        .await_quiescence_until(Instant::now() + Duration::from_millis(30))
        .unwrap());

    release.store(true, Ordering::SeqCst);
    assert_ok!(service.await_quiescence());
    assert!(service.is_quiescent());
    assert_ok!(service.await_pipeline_quiescence(&"gated"));
    assert!(service.is_pipeline_quiescent(&"gated"));
    assert_ok!(future.get());
}

#[test]
fn a_drained_pipeline_is_recreated_on_the_next_submission() {
    let service = PipelinedExecutor::new(PoolExecutor::new(2));
    assert_eq!(service.submit("k", || Ok(1)).get().unwrap(), 1);
    assert_ok!(service.await_quiescence());
    assert!(service.is_pipeline_quiescent(&"k"));
    assert_eq!(service.submit("k", || Ok(2)).get().unwrap(), 2);
}

#[test]
fn abort_cancels_queued_tasks_and_interrupts_the_running_one() {
    let service = PipelinedExecutor::new(PoolExecutor::new(2));

    let running_entered = Arc::new(AtomicBool::new(false));
    let saw_interrupt = Arc::new(AtomicBool::new(false));
    let running = {
        let entered = Arc::clone(&running_entered);
        let saw = Arc::clone(&saw_interrupt);
        service.submit("k", move || {
            entered.store(true, Ordering::SeqCst);
            if spin_until(interrupt::is_interrupted, Duration::from_secs(5)) {
                saw.store(true, Ordering::SeqCst);
            }
            Ok(())
        })
    };
    let queued = service.submit("k", || Ok(7));

    assert!(spin_until(
        || running_entered.load(Ordering::SeqCst),
        Duration::from_secs(5)
    ));
    let drained = service.abort_pipeline(&"k");
    assert_eq!(drained.len(), 1);
    assert!(drained[0].is_cancelled());
    assert!(queued.is_cancelled());

    // The running task observed the interrupt and its future ended
    // cancelled (the abort's cancellation beat the task's own completion).
    assert_ok!(running.await_done());
    assert!(running.is_cancelled());
    assert!(saw_interrupt.load(Ordering::SeqCst));

    assert_ok!(service.await_quiescence());
    // The key is usable again afterwards.
    assert_eq!(service.submit("k", || Ok(3)).get().unwrap(), 3);
}

#[test]
fn abort_all_sweeps_every_pipeline() {
    let service = PipelinedExecutor::new(PoolExecutor::new(2));
    let release = Arc::new(AtomicBool::new(false));

    for key in ["a", "b"] {
        let gate = Arc::clone(&release);
        service.execute(key, move || {
            spin_until(
                || gate.load(Ordering::SeqCst) || interrupt::is_interrupted(),
                Duration::from_secs(5),
            );
        });
        // One queued task behind each runner.
        service.execute(key, || {});
    }
    assert!(spin_until(|| !service.is_quiescent(), Duration::from_secs(1)));
    // Give both runners a moment to occupy their pipelines.
    assert!(spin_until(
        || !service.is_pipeline_quiescent(&"a") && !service.is_pipeline_quiescent(&"b"),
        Duration::from_secs(1)
    ));

    let drained = service.abort_all();
    assert_eq!(drained.len(), 2);
    for tasks in drained.values() {
        assert!(tasks.iter().all(|task| task.is_cancelled()));
    }
    release.store(true, Ordering::SeqCst);
    assert_ok!(service.await_quiescence());
}

#[test]
fn rejection_fails_the_submitted_task() {
    let service = PipelinedExecutor::new(Arc::new(RejectingExecutor));
    let future = service.submit("k", || Ok(1));
    assert!(future.is_failed());
    assert_eq!(future.failure().to_string(), Rejected.to_string());
    // The pipeline cleaned itself up.
    assert!(service.is_quiescent());
    assert!(service.is_pipeline_quiescent(&"k"));
}

#[test]
fn adapter_shares_the_pipeline_fifo() {
    let service = PipelinedExecutor::new(PoolExecutor::new(4));
    let adapter = service.pipeline_executor("shared");
    let order = Arc::new(Mutex::new(Vec::new()));

    let gate = Arc::new(AtomicBool::new(false));
    {
        let gate = Arc::clone(&gate);
        service.execute("shared", move || {
            spin_until(|| gate.load(Ordering::SeqCst), Duration::from_secs(5));
        });
    }
    let o = Arc::clone(&order);
    let direct = service.submit("shared", move || {
        o.lock().unwrap().push("direct");
        Ok(())
    });
    let o = Arc::clone(&order);
    let through_adapter = adapter
        .submit(move || {
            o.lock().unwrap().push("adapter");
            Ok(())
        })
        .unwrap();

    gate.store(true, Ordering::SeqCst);
    assert_ok!(direct.get());
    assert_ok!(through_adapter.get());
    assert_eq!(*order.lock().unwrap(), vec!["direct", "adapter"]);
}

#[test]
fn adapter_shutdown_rejects_new_work_and_terminates() {
    let service = PipelinedExecutor::new(PoolExecutor::new(2));
    let adapter = service.pipeline_executor("k");

    let before = adapter.submit(|| Ok(1)).unwrap();
    adapter.shutdown();
    assert!(adapter.is_shutdown());
    assert_err!(adapter.submit(|| Ok(2)));

    assert_eq!(before.get().unwrap(), 1);
    assert_ok!(adapter.await_termination());
    assert!(adapter.is_terminated());
}

#[test]
fn adapter_shutdown_now_drains_only_its_own_tasks() {
    let service = PipelinedExecutor::new(PoolExecutor::new(2));
    let adapter = service.pipeline_executor("k");

    // Occupy the pipeline with a foreign task so everything else queues.
    let release = Arc::new(AtomicBool::new(false));
    {
        let gate = Arc::clone(&release);
        service.execute("k", move || {
            spin_until(|| gate.load(Ordering::SeqCst), Duration::from_secs(5));
        });
    }
    let ran_foreign = Arc::new(AtomicBool::new(false));
    let foreign = {
        let ran = Arc::clone(&ran_foreign);
        service.submit("k", move || {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        })
    };
    let owned = adapter.submit(|| Ok("never runs")).unwrap();

    let drained = adapter.shutdown_now();
    assert_eq!(drained.len(), 1);
    assert!(owned.is_cancelled());

    release.store(true, Ordering::SeqCst);
    // The foreign task is untouched and still runs.
    assert_ok!(foreign.get());
    assert!(ran_foreign.load(Ordering::SeqCst));
    assert_ok!(adapter.await_termination());
}

#[test]
fn adapter_can_be_used_as_a_plain_executor() {
    let service = PipelinedExecutor::new(PoolExecutor::new(2));
    let adapter = service.pipeline_executor("exec");
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    adapter
        .execute(Box::new(move || flag.store(true, Ordering::SeqCst)))
        .unwrap();
    assert_ok!(service.await_pipeline_quiescence(&"exec"));
    assert!(ran.load(Ordering::SeqCst));
}
