// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! One pipeline: the task currently executing plus a FIFO of successors.
//!
//! A pipeline exists only while it has work. It is created with its first
//! task already in the `current` slot, chains tasks one dispatch at a time
//! (task N+1 is handed to the executor only after task N has finished), and
//! when the queue drains it closes, removes itself from the service map and
//! trips its termination latch. A pipeline that has closed never accepts
//! another task; an enqueue that finds a closed pipeline helps remove it and
//! recreates a fresh one under the same key.

use crate::{quiescence::TerminationLatch, service::ServiceInner};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use tempo_executor::Rejected;
use tempo_future::RunnableTask;
use tracing::debug;

#[derive(Clone)]
pub(crate) struct QueuedTask {
    pub task: Arc<dyn RunnableTask>,
    /// Tag identifying the single-pipeline adapter that submitted this task,
    /// if any; lets the adapter's shutdown drain exactly its own work.
    pub owner: Option<u64>,
}

/// A task removed from a pipeline by an abort or an adapter shutdown. The
/// underlying future has already been cancelled.
pub struct AbortedTask {
    task: Arc<dyn RunnableTask>,
}

impl AbortedTask {
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    pub fn is_done(&self) -> bool {
        self.task.is_done()
    }
}

struct PipelineState {
    current: Option<QueuedTask>,
    queue: VecDeque<QueuedTask>,
    closed: bool,
}

pub(crate) struct Pipeline<K> {
    key: K,
    state: Mutex<PipelineState>,
    terminated: TerminationLatch,
}

impl<K> Pipeline<K>
where
    K: crate::service::PipelineKey,
{
    /// A new pipeline born with its first task in the current slot.
    pub fn new(key: K, first: QueuedTask) -> Self {
        Self {
            key,
            state: Mutex::new(PipelineState {
                current: Some(first),
                queue: VecDeque::new(),
                closed: false,
            }),
            terminated: TerminationLatch::new(),
        }
    }

    /// Append a task. Fails iff the pipeline has already closed; the caller
    /// then removes this pipeline from the map and recreates one.
    pub fn try_enqueue(&self, task: QueuedTask) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.queue.push_back(task);
        true
    }

    /// Hand `queued` (already in the current slot) to the shared executor.
    pub fn dispatch(this: &Arc<Self>, service: &Arc<ServiceInner<K>>, queued: QueuedTask) {
        let pipeline = Arc::clone(this);
        let chained_service = Arc::clone(service);
        let task = Arc::clone(&queued.task);
        let work = Box::new(move || {
            task.run();
            Self::advance(&pipeline, &chained_service);
        });
        if service.executor.execute(work).is_err() {
            Self::reject_all(this, service, queued);
        }
    }

    /// Called by the worker after the current task finishes: move the next
    /// task into the current slot and dispatch it, or close and terminate.
    fn advance(this: &Arc<Self>, service: &Arc<ServiceInner<K>>) {
        let next = {
            let mut state = this.state.lock();
            match state.queue.pop_front() {
                Some(next) => {
                    state.current = Some(next.clone());
                    Some(next)
                }
                None => {
                    state.current = None;
                    state.closed = true;
                    None
                }
            }
        };
        match next {
            Some(queued) => Self::dispatch(this, service, queued),
            None => Self::terminate(this, service),
        }
    }

    /// The executor refused a dispatch: fail the rejected task and everything
    /// queued behind it, then terminate.
    fn reject_all(this: &Arc<Self>, service: &Arc<ServiceInner<K>>, rejected: QueuedTask) {
        debug!(key = ?this.key, "executor rejected pipeline dispatch; draining");
        rejected.task.fail(anyhow::Error::new(Rejected));
        let drained = {
            let mut state = this.state.lock();
            state.current = None;
            state.closed = true;
            state.queue.drain(..).collect::<Vec<_>>()
        };
        for queued in drained {
            queued.task.fail(anyhow::Error::new(Rejected));
        }
        Self::terminate(this, service);
    }

    fn terminate(this: &Arc<Self>, service: &Arc<ServiceInner<K>>) {
        service
            .pipelines
            .remove_if(&this.key, |_, existing| Arc::ptr_eq(existing, this));
        this.terminated.open();
        service.quiescence.deregister();
        debug!(key = ?this.key, "pipeline drained and terminated");
    }

    /// Drain the queue (cancelling each task) and request interruption of
    /// the currently-running task. The pipeline itself keeps going: the
    /// running task still finishes and closes the pipeline as usual.
    pub fn abort(&self) -> Vec<AbortedTask> {
        let (drained, current) = {
            let mut state = self.state.lock();
            let drained = state.queue.drain(..).collect::<Vec<_>>();
            (drained, state.current.clone())
        };
        for queued in &drained {
            queued.task.cancel(false);
        }
        if let Some(running) = current {
            running.task.cancel(true);
        }
        drained
            .into_iter()
            .map(|queued| AbortedTask { task: queued.task })
            .collect()
    }

    /// Drain only the tasks tagged with `owner`, cancelling them; interrupt
    /// the current task if it carries the same tag.
    pub fn drain_owner(&self, owner: u64) -> Vec<AbortedTask> {
        let (mine, running) = {
            let mut state = self.state.lock();
            let mut mine = Vec::new();
            state.queue.retain(|queued| {
                if queued.owner == Some(owner) {
                    mine.push(queued.clone());
                    false
                } else {
                    true
                }
            });
            let running = state
                .current
                .clone()
                .filter(|current| current.owner == Some(owner));
            (mine, running)
        };
        for queued in &mine {
            queued.task.cancel(false);
        }
        if let Some(current) = running {
            current.task.cancel(true);
        }
        mine.into_iter()
            .map(|queued| AbortedTask { task: queued.task })
            .collect()
    }

    pub fn await_terminated(&self) -> Result<(), tempo_sync::Interrupted> {
        self.terminated.await_open()
    }

    pub fn await_terminated_until(
        &self,
        deadline: std::time::Instant,
    ) -> Result<bool, tempo_sync::Interrupted> {
        self.terminated.await_open_until(deadline)
    }
}
