// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    pipeline::{AbortedTask, Pipeline, QueuedTask},
    quiescence::QuiescenceTracker,
    single::SinglePipelineExecutor,
};
use dashmap::{mapref::entry::Entry, DashMap};
use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};
use tempo_executor::Executor;
use tempo_future::{ListenableFuture, RunnableFuture};
use tempo_sync::Interrupted;
use tracing::trace;

/// Anything usable as a pipeline key.
pub trait PipelineKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<K> PipelineKey for K where K: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

pub(crate) struct ServiceInner<K: PipelineKey> {
    pub executor: Arc<dyn Executor>,
    pub pipelines: DashMap<K, Arc<Pipeline<K>>>,
    pub quiescence: QuiescenceTracker,
    pub owner_ids: AtomicU64,
}

/// Serializes work per key on a shared executor.
///
/// Tasks submitted under the same key run strictly one after another, in
/// submission order, on threads borrowed from the underlying executor; tasks
/// under different keys are unrelated. Pipelines come and go with their
/// work: a key's pipeline is created on first submission and disappears once
/// it drains.
pub struct PipelinedExecutor<K: PipelineKey> {
    inner: Arc<ServiceInner<K>>,
}

impl<K: PipelineKey> Clone for PipelinedExecutor<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: PipelineKey> PipelinedExecutor<K> {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                executor,
                pipelines: DashMap::new(),
                quiescence: QuiescenceTracker::new(),
                owner_ids: AtomicU64::new(0),
            }),
        }
    }

    /// Submit a fallible computation under `key`. Its future fails with the
    /// computation's error, or with [`Rejected`](tempo_executor::Rejected)
    /// if the underlying executor refuses the dispatch.
    pub fn submit<T, F>(&self, key: K, task: F) -> ListenableFuture<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.submit_tagged(key, None, task)
    }

    /// Submit a runnable and a pre-chosen value its future completes with.
    pub fn submit_with_result<T, F>(&self, key: K, task: F, value: T) -> ListenableFuture<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.submit(key, move || {
            task();
            Ok(value)
        })
    }

    /// Submit a runnable whose future completes with `()`.
    pub fn submit_runnable<F>(&self, key: K, task: F) -> ListenableFuture<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(key, move || {
            task();
            Ok(())
        })
    }

    /// Fire and forget. The task still runs inside a runnable future, so a
    /// later executor rejection marks it failed instead of vanishing.
    pub fn execute<F>(&self, key: K, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.submit_runnable(key, task);
    }

    pub(crate) fn submit_tagged<T, F>(
        &self,
        key: K,
        owner: Option<u64>,
        task: F,
    ) -> ListenableFuture<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let runnable = Arc::new(RunnableFuture::new(task));
        let future = runnable.future();
        self.enqueue(
            key,
            QueuedTask {
                task: runnable,
                owner,
            },
        );
        future
    }

    /// Enqueue onto the key's pipeline, atomically creating one if the key
    /// is idle. Lost races and just-terminated pipelines are retried.
    fn enqueue(&self, key: K, queued: QueuedTask) {
        loop {
            if let Some(existing) = self.inner.pipelines.get(&key) {
                let pipeline = Arc::clone(existing.value());
                drop(existing);
                if pipeline.try_enqueue(queued.clone()) {
                    return;
                }
                // Terminated while we looked it up: help clean up, retry.
                self.inner
                    .pipelines
                    .remove_if(&key, |_, current| Arc::ptr_eq(current, &pipeline));
                continue;
            }

            let pipeline = Arc::new(Pipeline::new(key.clone(), queued.clone()));
            match self.inner.pipelines.entry(key.clone()) {
                // Someone recreated the pipeline first; enqueue on theirs.
                Entry::Occupied(_) => continue,
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(&pipeline));
                }
            }
            trace!(key = ?key, "created pipeline");
            self.inner.quiescence.register();
            Pipeline::dispatch(&pipeline, &self.inner, queued);
            return;
        }
    }

    /// Whether no pipeline is live (nothing running, nothing queued).
    pub fn is_quiescent(&self) -> bool {
        self.inner.quiescence.is_quiescent()
    }

    pub fn await_quiescence(&self) -> Result<(), Interrupted> {
        self.inner.quiescence.await_quiescence()
    }

    /// Returns whether quiescence was reached before the deadline.
    pub fn await_quiescence_until(&self, deadline: Instant) -> Result<bool, Interrupted> {
        self.inner.quiescence.await_quiescence_until(deadline)
    }

    /// Whether `key` currently has no live pipeline.
    pub fn is_pipeline_quiescent(&self, key: &K) -> bool {
        !self.inner.pipelines.contains_key(key)
    }

    pub fn await_pipeline_quiescence(&self, key: &K) -> Result<(), Interrupted> {
        while let Some(pipeline) = self.lookup(key) {
            pipeline.await_terminated()?;
        }
        Ok(())
    }

    /// Returns whether the key's pipeline (including any recreated under the
    /// same key) terminated before the deadline.
    pub fn await_pipeline_quiescence_until(
        &self,
        key: &K,
        deadline: Instant,
    ) -> Result<bool, Interrupted> {
        while let Some(pipeline) = self.lookup(key) {
            if !pipeline.await_terminated_until(deadline)? {
                return Ok(self.is_pipeline_quiescent(key));
            }
        }
        Ok(true)
    }

    /// Abort every pipeline: queued tasks are drained and cancelled, running
    /// tasks are interrupted. Returns the drained tasks per key.
    pub fn abort_all(&self) -> HashMap<K, Vec<AbortedTask>> {
        let keys: Vec<K> = self
            .inner
            .pipelines
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut drained = HashMap::new();
        for key in keys {
            if let Some(pipeline) = self.lookup(&key) {
                drained.insert(key, pipeline.abort());
            }
        }
        drained
    }

    /// Abort one key's pipeline. Returns the drained (now cancelled) tasks;
    /// empty if the key was already quiescent.
    pub fn abort_pipeline(&self, key: &K) -> Vec<AbortedTask> {
        match self.lookup(key) {
            Some(pipeline) => pipeline.abort(),
            None => Vec::new(),
        }
    }

    /// An executor-service view over this key's pipeline. Work submitted
    /// through the adapter is tagged so the adapter's shutdown can pick its
    /// own tasks back out of the shared pipeline.
    pub fn pipeline_executor(&self, key: K) -> SinglePipelineExecutor<K> {
        let owner = self.inner.owner_ids.fetch_add(1, Ordering::Relaxed);
        SinglePipelineExecutor::new(self.clone(), key, owner)
    }

    pub(crate) fn lookup(&self, key: &K) -> Option<Arc<Pipeline<K>>> {
        self.inner
            .pipelines
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
    }
}
