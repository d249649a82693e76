// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    pipeline::AbortedTask,
    quiescence::TerminationLatch,
    service::{PipelineKey, PipelinedExecutor},
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use tempo_executor::{same_thread, Executor, Rejected, Work};
use tempo_future::ListenableFuture;
use tempo_sync::Interrupted;

/// An executor-service view over one pipeline of a [`PipelinedExecutor`].
///
/// The adapter shares its pipeline with everything else submitted under the
/// same key: work flows through the same FIFO, and shutdown touches only the
/// tasks this adapter itself submitted (they carry its owner tag). Shutdown
/// posts a sentinel no-op through the pipeline; the adapter is terminated
/// once the sentinel has been reached, i.e. once every task it submitted
/// before shutdown has finished.
pub struct SinglePipelineExecutor<K: PipelineKey> {
    service: PipelinedExecutor<K>,
    key: K,
    owner: u64,
    shut_down: Arc<AtomicBool>,
    terminated: Arc<TerminationLatch>,
}

impl<K: PipelineKey> SinglePipelineExecutor<K> {
    pub(crate) fn new(service: PipelinedExecutor<K>, key: K, owner: u64) -> Self {
        Self {
            service,
            key,
            owner,
            shut_down: Arc::new(AtomicBool::new(false)),
            terminated: Arc::new(TerminationLatch::new()),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Submit a computation through this adapter's pipeline. Fails with
    /// [`Rejected`] once the adapter has been shut down.
    pub fn submit<T, F>(&self, task: F) -> Result<ListenableFuture<T>, Rejected>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Rejected);
        }
        Ok(self
            .service
            .submit_tagged(self.key.clone(), Some(self.owner), task))
    }

    /// Initiate an orderly shutdown: previously submitted tasks run to
    /// completion, new submissions are rejected. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.post_sentinel();
    }

    /// Shut down and additionally pull this adapter's not-yet-started tasks
    /// back out of the shared pipeline (cancelling them) and interrupt its
    /// currently-running task, if any. Tasks submitted by others under the
    /// same key are untouched. Returns the drained tasks.
    pub fn shutdown_now(&self) -> Vec<AbortedTask> {
        let first = !self.shut_down.swap(true, Ordering::AcqRel);
        let drained = match self.service.lookup(&self.key) {
            Some(pipeline) => pipeline.drain_owner(self.owner),
            None => Vec::new(),
        };
        if first {
            self.post_sentinel();
        }
        drained
    }

    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_open()
    }

    pub fn await_termination(&self) -> Result<(), Interrupted> {
        self.terminated.await_open()
    }

    /// Returns whether the adapter terminated before the deadline.
    pub fn await_termination_until(&self, deadline: Instant) -> Result<bool, Interrupted> {
        self.terminated.await_open_until(deadline)
    }

    /// The sentinel carries no owner tag so that neither an adapter drain
    /// nor a later shutdown_now can pull it out of the queue; the latch
    /// opens on any terminal state of the sentinel, including cancellation
    /// by a pipeline abort.
    fn post_sentinel(&self) {
        let latch = Arc::clone(&self.terminated);
        let sentinel =
            self.service
                .submit_tagged::<(), _>(self.key.clone(), None, || Ok(()));
        sentinel.add_listener(same_thread(), move |_| latch.open());
    }
}

impl<K: PipelineKey> Executor for SinglePipelineExecutor<K> {
    fn execute(&self, work: Work) -> Result<(), Rejected> {
        self.submit(move || {
            work();
            Ok(())
        })
        .map(|_| ())
    }
}
