// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::future::{CancelAction, ListenableFuture};
use parking_lot::Mutex;
use std::sync::Arc;
use tempo_sync::{interrupt, InterruptHandle};

type Thunk<T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send>;

/// A future bound to a thunk. [`run`](Self::run) executes the thunk at most
/// once and completes the future from its `Result`; while the thunk runs the
/// executing thread is recorded so that `cancel(true)` can interrupt it.
pub struct RunnableFuture<T> {
    future: ListenableFuture<T>,
    task: Mutex<Option<Thunk<T>>>,
    running: Arc<Mutex<Option<InterruptHandle>>>,
}

impl<T> RunnableFuture<T>
where
    T: Send + Sync + 'static,
{
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let running: Arc<Mutex<Option<InterruptHandle>>> = Arc::new(Mutex::new(None));
        let hook_target = Arc::clone(&running);
        let action: CancelAction = Box::new(move |may_interrupt| {
            if may_interrupt {
                if let Some(thread) = hook_target.lock().as_ref() {
                    thread.interrupt();
                }
            }
        });
        Self {
            future: ListenableFuture::new_pending(Some(action), None),
            task: Mutex::new(Some(Box::new(task))),
            running,
        }
    }

    pub fn future(&self) -> ListenableFuture<T> {
        self.future.clone()
    }

    /// Execute the thunk and complete the future. A second call, or a call
    /// after the future was cancelled, is a no-op (the thunk is dropped
    /// unexecuted in the cancelled case). After `run` returns the future is
    /// terminal.
    pub fn run(&self) {
        let task = match self.task.lock().take() {
            Some(task) => task,
            None => return,
        };
        if self.future.is_done() {
            return;
        }
        *self.running.lock() = Some(interrupt::current());
        let outcome = task();
        *self.running.lock() = None;
        match outcome {
            Ok(value) => {
                self.future.complete_value(value);
            }
            Err(err) => {
                self.future.complete_failure(Arc::new(err));
            }
        }
        // A cancel(true) that raced with the tail of the thunk may have
        // interrupted this thread after the work was already done; do not
        // leak that flag into whatever this thread runs next.
        if self.future.is_cancelled() {
            let _ = interrupt::take_interrupted();
        }
    }
}

/// Object-safe view of a runnable future, for services that queue
/// heterogeneous tasks.
pub trait RunnableTask: Send + Sync {
    fn run(&self);
    fn cancel(&self, may_interrupt: bool) -> bool;
    fn fail(&self, cause: anyhow::Error) -> bool;
    fn is_done(&self) -> bool;
    fn is_cancelled(&self) -> bool;
}

impl<T> RunnableTask for RunnableFuture<T>
where
    T: Send + Sync + 'static,
{
    fn run(&self) {
        RunnableFuture::run(self);
    }

    fn cancel(&self, may_interrupt: bool) -> bool {
        self.future.cancel(may_interrupt)
    }

    fn fail(&self, cause: anyhow::Error) -> bool {
        self.future.complete_failure(Arc::new(cause))
    }

    fn is_done(&self) -> bool {
        self.future.is_done()
    }

    fn is_cancelled(&self) -> bool {
        self.future.is_cancelled()
    }
}
