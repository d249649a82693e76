// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! The completion primitive.
//!
//! A future moves through `Pending → Completing → {Success | Failure |
//! Cancelled}` under a CAS on a single atomic discriminator. `Completing` is
//! a transient the outside world never observes: queries report `Pending`
//! until the terminal store lands. The outcome is published into a
//! write-once cell before the terminal flip, so any thread that observes a
//! terminal state also observes the full outcome.

use crate::{
    error::{CompletionError, FailureCause},
    listener::{Listener, ListenerSet},
};
use crossbeam::utils::Backoff;
use once_cell::sync::OnceCell;
use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Instant,
};
use tempo_executor::{same_thread, Executor, Work};
use tempo_sync::{interrupt, Interrupted};
use tracing::debug;

pub(crate) const PENDING: u8 = 0;
pub(crate) const COMPLETING: u8 = 1;
pub(crate) const SUCCESS: u8 = 2;
pub(crate) const FAILURE: u8 = 3;
pub(crate) const CANCELLED: u8 = 4;

pub(crate) enum Outcome<T> {
    Value(T),
    Failure(FailureCause),
}

/// Invoked inside the cancellation transition, before the future becomes
/// observably terminal. Receives the may-interrupt flag of the cancelling
/// call; runnable futures interrupt their thread when it is set, combinator
/// results pass it through to their inputs.
pub(crate) type CancelAction = Box<dyn Fn(bool) + Send + Sync>;

pub(crate) struct Inner<T> {
    state: AtomicU8,
    outcome: OnceCell<Outcome<T>>,
    listeners: ListenerSet,
    /// Interrupt hook: runs inside the cancellation transition, before the
    /// future is observably terminal.
    cancel_action: Option<CancelAction>,
    /// Upstream propagation: runs after the cancellation has been published.
    /// Kept separate from the hook because propagation can synchronously
    /// re-enter this future through an upstream listener, which must then
    /// observe a terminal state rather than wait out the transition.
    cancel_propagation: Option<CancelAction>,
}

impl<T> Inner<T> {
    fn try_begin_completion(&self) -> bool {
        self.state
            .compare_exchange(PENDING, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Publish the outcome (if any) and flip to the terminal state, then
    /// drain the listener set in registration order.
    fn publish(&self, outcome: Option<Outcome<T>>, terminal: u8) {
        if let Some(outcome) = outcome {
            assert!(
                self.outcome.set(outcome).is_ok(),
                "completion outcome published twice"
            );
        }
        self.state.store(terminal, Ordering::Release);
        for listener in self.listeners.seal() {
            deliver(listener);
        }
    }

    fn add_listener_raw(&self, executor: Arc<dyn Executor>, work: Work) {
        match self.listeners.push(Listener { executor, work }) {
            Ok(()) => {}
            // Sealed: the future is terminal, run it from this thread.
            Err(listener) => deliver(listener),
        }
    }

    fn raw_state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    /// The externally observable state: `Completing` reads as `Pending`.
    fn observed_state(&self) -> u8 {
        match self.raw_state() {
            COMPLETING => PENDING,
            other => other,
        }
    }

    fn value(&self) -> &T {
        match self.outcome.get() {
            Some(Outcome::Value(value)) => value,
            _ => unreachable!("successful future without a published value"),
        }
    }

    fn cause(&self) -> &FailureCause {
        match self.outcome.get() {
            Some(Outcome::Failure(cause)) => cause,
            _ => unreachable!("failed future without a published cause"),
        }
    }
}

fn deliver(listener: Listener) {
    let Listener { executor, work } = listener;
    if executor.execute(work).is_err() {
        // The future stays healthy when an executor refuses a callback; the
        // rejection is the executor's to report.
        debug!("listener executor rejected a completion callback");
    }
}

/// A producer that loses the completion race to a concurrent `Completing`
/// must not return until the winner's transition (interrupt hook included)
/// has finished. Short spin first, then park behind an unpark listener.
fn block_until_terminal<T>(inner: &Arc<Inner<T>>)
where
    T: Send + Sync + 'static,
{
    let backoff = Backoff::new();
    while inner.raw_state() == COMPLETING {
        if backoff.is_completed() {
            let me = interrupt::current();
            inner.add_listener_raw(same_thread(), Box::new(move || me.unpark()));
            while inner.raw_state() == COMPLETING {
                interrupt::park();
            }
            return;
        }
        backoff.snooze();
    }
}

pub(crate) fn complete_value<T>(inner: &Arc<Inner<T>>, value: T) -> bool
where
    T: Send + Sync + 'static,
{
    if inner.try_begin_completion() {
        inner.publish(Some(Outcome::Value(value)), SUCCESS);
        true
    } else {
        block_until_terminal(inner);
        false
    }
}

pub(crate) fn complete_failure<T>(inner: &Arc<Inner<T>>, cause: FailureCause) -> bool
where
    T: Send + Sync + 'static,
{
    if inner.try_begin_completion() {
        inner.publish(Some(Outcome::Failure(cause)), FAILURE);
        true
    } else {
        block_until_terminal(inner);
        false
    }
}

pub(crate) fn complete_cancelled<T>(inner: &Arc<Inner<T>>, may_interrupt: bool) -> bool
where
    T: Send + Sync + 'static,
{
    if inner.try_begin_completion() {
        // The hook runs inside the transition: observers still see Pending,
        // and a racing producer is parked in block_until_terminal.
        if let Some(action) = &inner.cancel_action {
            action(may_interrupt);
        }
        inner.publish(None, CANCELLED);
        if let Some(propagate) = &inner.cancel_propagation {
            propagate(may_interrupt);
        }
        true
    } else {
        block_until_terminal(inner);
        false
    }
}

/// Synchronous dispatch over a completed future's terminal state.
pub trait FutureVisitor<T> {
    fn success(&mut self, value: &T);
    fn failure(&mut self, cause: &FailureCause);
    fn cancelled(&mut self);
}

/// A cloneable handle to a one-shot completion.
///
/// Consumers register continuations with [`add_listener`], block with
/// [`await_done`]/[`get`], or dispatch with [`visit`]. Producers complete the
/// future through [`SettableFuture`](crate::SettableFuture) or
/// [`RunnableFuture`](crate::RunnableFuture).
///
/// [`add_listener`]: ListenableFuture::add_listener
/// [`await_done`]: ListenableFuture::await_done
/// [`get`]: ListenableFuture::get
/// [`visit`]: ListenableFuture::visit
pub struct ListenableFuture<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ListenableFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for ListenableFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.inner.observed_state() {
            SUCCESS => "success",
            FAILURE => "failure",
            CANCELLED => "cancelled",
            _ => "pending",
        };
        f.debug_struct("ListenableFuture")
            .field("state", &state)
            .finish()
    }
}

impl<T> ListenableFuture<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new_pending(
        cancel_action: Option<CancelAction>,
        cancel_propagation: Option<CancelAction>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(PENDING),
                outcome: OnceCell::new(),
                listeners: ListenerSet::new(),
                cancel_action,
                cancel_propagation,
            }),
        }
    }

    pub(crate) fn new_terminal(outcome: Option<Outcome<T>>, terminal: u8) -> Self {
        let cell = OnceCell::new();
        if let Some(outcome) = outcome {
            let _ = cell.set(outcome);
        }
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(terminal),
                outcome: cell,
                listeners: ListenerSet::new_sealed(),
                cancel_action: None,
                cancel_propagation: None,
            }),
        }
    }

    pub(crate) fn complete_value(&self, value: T) -> bool {
        complete_value(&self.inner, value)
    }

    pub(crate) fn complete_failure(&self, cause: FailureCause) -> bool {
        complete_failure(&self.inner, cause)
    }

    pub(crate) fn complete_cancelled(&self, may_interrupt: bool) -> bool {
        complete_cancelled(&self.inner, may_interrupt)
    }

    /// Register a continuation. Delivered exactly once: enqueued while the
    /// future is pending, or submitted to `executor` immediately if the
    /// future is already terminal. Listeners registered before completion
    /// fire in registration order. A rejection from the executor is
    /// swallowed; the future itself stays healthy.
    pub fn add_listener<F>(&self, executor: Arc<dyn Executor>, callback: F)
    where
        F: FnOnce(ListenableFuture<T>) + Send + 'static,
    {
        let handle = self.clone();
        self.inner
            .add_listener_raw(executor, Box::new(move || callback(handle)));
    }

    /// Attempt to move the future from pending to cancelled. Returns whether
    /// this call effected the transition. The future's cancel action (if
    /// any) runs inside the transition, before `is_done` turns true.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.complete_cancelled(may_interrupt)
    }

    pub fn is_done(&self) -> bool {
        matches!(self.inner.observed_state(), SUCCESS | FAILURE | CANCELLED)
    }

    pub fn is_successful(&self) -> bool {
        self.inner.observed_state() == SUCCESS
    }

    pub fn is_failed(&self) -> bool {
        self.inner.observed_state() == FAILURE
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.observed_state() == CANCELLED
    }

    /// The successful value.
    ///
    /// Panics unless [`is_successful`](Self::is_successful); calling this on
    /// a pending, failed, or cancelled future is a programming error.
    pub fn result(&self) -> T
    where
        T: Clone,
    {
        if !self.is_successful() {
            panic!("result() called on a future that has not completed successfully");
        }
        self.inner.value().clone()
    }

    /// The failure cause.
    ///
    /// Panics unless [`is_failed`](Self::is_failed).
    pub fn failure(&self) -> FailureCause {
        if !self.is_failed() {
            panic!("failure() called on a future that has not failed");
        }
        self.inner.cause().clone()
    }

    /// Block interruptibly until the future is terminal.
    pub fn await_done(&self) -> Result<(), Interrupted> {
        if self.is_done() {
            return Ok(());
        }
        let me = interrupt::current();
        self.inner
            .add_listener_raw(same_thread(), Box::new(move || me.unpark()));
        while !self.is_done() {
            interrupt::check_interrupted()?;
            interrupt::park();
        }
        Ok(())
    }

    /// Block interruptibly until the future is terminal or the deadline
    /// elapses. Returns whether the future completed in time.
    pub fn await_done_until(&self, deadline: Instant) -> Result<bool, Interrupted> {
        if self.is_done() {
            return Ok(true);
        }
        let me = interrupt::current();
        self.inner
            .add_listener_raw(same_thread(), Box::new(move || me.unpark()));
        while !self.is_done() {
            interrupt::check_interrupted()?;
            if Instant::now() >= deadline {
                return Ok(self.is_done());
            }
            interrupt::park_until(deadline);
        }
        Ok(true)
    }

    /// Block until terminal and fetch the value. Failure, cancellation, and
    /// interruption all surface as [`CompletionError`].
    pub fn get(&self) -> Result<T, CompletionError>
    where
        T: Clone,
    {
        self.await_done()?;
        match self.inner.observed_state() {
            SUCCESS => Ok(self.inner.value().clone()),
            FAILURE => Err(CompletionError::Failed(self.inner.cause().clone())),
            CANCELLED => Err(CompletionError::Cancelled),
            _ => unreachable!("await_done returned on a pending future"),
        }
    }

    /// Dispatch on the terminal state from the calling thread.
    ///
    /// Panics if the future is not yet done.
    pub fn visit<V>(&self, visitor: &mut V)
    where
        V: FutureVisitor<T>,
    {
        match self.inner.observed_state() {
            SUCCESS => visitor.success(self.inner.value()),
            FAILURE => visitor.failure(self.inner.cause()),
            CANCELLED => visitor.cancelled(),
            _ => panic!("visit() called on a future that is not done"),
        }
    }
}
