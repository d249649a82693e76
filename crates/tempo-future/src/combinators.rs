// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Composition over the completion primitive.
//!
//! Every combinator returns a fresh future wired both ways: upstream
//! completion flows downstream through listeners registered on the
//! same-thread executor, and cancelling the returned future flows back
//! upstream through its cancel action. Fan-in combinators collect input
//! values in write-once slots and complete once the remaining-input counter
//! reaches zero; the first failure or cancellation wins and later slot
//! completions fall on an already-terminal future.

use crate::{
    future::ListenableFuture,
    immediate::completed,
    settable::SettableFuture,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tempo_executor::{same_thread, Executor, Rejected, Work};

fn inline() -> Arc<dyn Executor> {
    same_thread()
}

/// When `source` succeeds, complete the result with `f(value)`; an `Err`
/// from `f` fails the result. Failure and cancellation of the source
/// propagate downstream; cancelling the result propagates to the source.
/// `f` runs on whichever thread completes the source.
pub fn transform<T, U, F>(source: &ListenableFuture<T>, f: F) -> ListenableFuture<U>
where
    T: Clone + Send + Sync + 'static,
    U: Send + Sync + 'static,
    F: FnOnce(T) -> anyhow::Result<U> + Send + 'static,
{
    chain(source, inline(), f)
}

/// Like [`transform`], but `f` is a fresh work item submitted to `executor`
/// after the source completes. If the executor rejects the continuation the
/// result fails with the rejection.
pub fn chain<T, U, F>(
    source: &ListenableFuture<T>,
    executor: Arc<dyn Executor>,
    f: F,
) -> ListenableFuture<U>
where
    T: Clone + Send + Sync + 'static,
    U: Send + Sync + 'static,
    F: FnOnce(T) -> anyhow::Result<U> + Send + 'static,
{
    let upstream = source.clone();
    let result = SettableFuture::with_cancel_propagation(move |may_interrupt| {
        upstream.cancel(may_interrupt);
    });

    let setter = result.clone();
    source.add_listener(inline(), move |src| {
        if src.is_cancelled() {
            setter.set_cancelled();
            return;
        }
        if src.is_failed() {
            setter.set_failure_cause(src.failure());
            return;
        }
        let value = src.result();
        let continuation_setter = setter.clone();
        let work: Work = Box::new(move || match f(value) {
            Ok(output) => {
                continuation_setter.set_value(output);
            }
            Err(err) => {
                continuation_setter.set_failure(err);
            }
        });
        if executor.execute(work).is_err() {
            setter.set_failure(anyhow::Error::new(Rejected));
        }
    });

    result.future()
}

/// Flatten a future of a future. The result mirrors the inner future once
/// the outer succeeds; failure or cancellation of the outer propagates
/// directly. Cancelling the result cancels the outer and, once it has been
/// observed, the inner as well.
pub fn dereference<T>(outer: &ListenableFuture<ListenableFuture<T>>) -> ListenableFuture<T>
where
    T: Clone + Send + Sync + 'static,
{
    let observed_inner: Arc<Mutex<Option<ListenableFuture<T>>>> = Arc::new(Mutex::new(None));

    let outer_for_cancel = outer.clone();
    let inner_for_cancel = Arc::clone(&observed_inner);
    let result = SettableFuture::with_cancel_propagation(move |may_interrupt| {
        outer_for_cancel.cancel(may_interrupt);
        if let Some(inner) = inner_for_cancel.lock().as_ref() {
            inner.cancel(may_interrupt);
        }
    });

    let setter = result.clone();
    let observed = Arc::clone(&observed_inner);
    outer.add_listener(inline(), move |out| {
        if out.is_cancelled() {
            setter.set_cancelled();
            return;
        }
        if out.is_failed() {
            setter.set_failure_cause(out.failure());
            return;
        }
        let inner = out.result();
        *observed.lock() = Some(inner.clone());

        let mirror = setter.clone();
        inner.add_listener(inline(), move |inn| {
            if inn.is_cancelled() {
                mirror.set_cancelled();
            } else if inn.is_failed() {
                mirror.set_failure_cause(inn.failure());
            } else {
                mirror.set_value(inn.result());
            }
        });

        // The result may have been cancelled before the inner future was
        // recorded; it must still hear about the cancellation.
        if setter.future().is_cancelled() {
            inner.cancel(false);
        }
    });

    result.future()
}

struct JoinState<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

/// Complete with every input's value, in input order, once all inputs
/// succeed. The first failure fails the result and cancels the inputs that
/// are still pending; any input cancellation cancels the result. Cancelling
/// the result cancels all still-pending inputs. An empty input list succeeds
/// immediately.
pub fn join<T>(inputs: Vec<ListenableFuture<T>>) -> ListenableFuture<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    if inputs.is_empty() {
        return completed(Vec::new());
    }

    let inputs = Arc::new(inputs);
    let cancel_targets = Arc::clone(&inputs);
    let result = SettableFuture::with_cancel_propagation(move |may_interrupt| {
        for input in cancel_targets.iter() {
            input.cancel(may_interrupt);
        }
    });

    let state = Arc::new(Mutex::new(JoinState {
        values: (0..inputs.len()).map(|_| None).collect(),
        remaining: inputs.len(),
    }));

    for (index, input) in inputs.iter().enumerate() {
        let setter = result.clone();
        let state = Arc::clone(&state);
        let all_inputs = Arc::clone(&inputs);
        input.add_listener(inline(), move |fut| {
            if fut.is_cancelled() {
                // set_cancelled triggers the propagation, which sweeps the
                // remaining inputs.
                setter.set_cancelled();
                return;
            }
            if fut.is_failed() {
                if setter.set_failure_cause(fut.failure()) {
                    for other in all_inputs.iter() {
                        other.cancel(false);
                    }
                }
                return;
            }
            let ready = {
                let mut guard = state.lock();
                guard.values[index] = Some(fut.result());
                guard.remaining -= 1;
                if guard.remaining == 0 {
                    Some(
                        guard
                            .values
                            .iter_mut()
                            .map(|slot| slot.take().expect("every join slot fulfilled"))
                            .collect::<Vec<_>>(),
                    )
                } else {
                    None
                }
            };
            if let Some(values) = ready {
                setter.set_value(values);
            }
        });
    }

    result.future()
}

struct Combine2State<A, B, F> {
    a: Option<A>,
    b: Option<B>,
    f: Option<F>,
    remaining: usize,
}

/// Fan in two futures through a combining function. Same completion,
/// failure, and cancellation contract as [`join`].
pub fn combine<A, B, R, F>(
    a: &ListenableFuture<A>,
    b: &ListenableFuture<B>,
    f: F,
) -> ListenableFuture<R>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
    F: FnOnce(A, B) -> anyhow::Result<R> + Send + 'static,
{
    let (cancel_a, cancel_b) = (a.clone(), b.clone());
    let result = SettableFuture::with_cancel_propagation(move |may_interrupt| {
        cancel_a.cancel(may_interrupt);
        cancel_b.cancel(may_interrupt);
    });

    let state = Arc::new(Mutex::new(Combine2State {
        a: None,
        b: None,
        f: Some(f),
        remaining: 2,
    }));

    let setter = result.clone();
    let slot_state = Arc::clone(&state);
    let peers = (a.clone(), b.clone());
    a.add_listener(inline(), move |fut| {
        if fut.is_cancelled() {
            setter.set_cancelled();
            return;
        }
        if fut.is_failed() {
            if setter.set_failure_cause(fut.failure()) {
                peers.0.cancel(false);
                peers.1.cancel(false);
            }
            return;
        }
        let mut guard = slot_state.lock();
        guard.a = Some(fut.result());
        fulfil_combine2(guard, &setter);
    });

    let setter = result.clone();
    let slot_state = Arc::clone(&state);
    let peers = (a.clone(), b.clone());
    b.add_listener(inline(), move |fut| {
        if fut.is_cancelled() {
            setter.set_cancelled();
            return;
        }
        if fut.is_failed() {
            if setter.set_failure_cause(fut.failure()) {
                peers.0.cancel(false);
                peers.1.cancel(false);
            }
            return;
        }
        let mut guard = slot_state.lock();
        guard.b = Some(fut.result());
        fulfil_combine2(guard, &setter);
    });

    result.future()
}

fn fulfil_combine2<A, B, R, F>(
    mut guard: parking_lot::MutexGuard<'_, Combine2State<A, B, F>>,
    setter: &SettableFuture<R>,
) where
    R: Send + Sync + 'static,
    F: FnOnce(A, B) -> anyhow::Result<R> + Send + 'static,
{
    guard.remaining -= 1;
    if guard.remaining != 0 {
        return;
    }
    let a = guard.a.take().expect("combine slot a fulfilled");
    let b = guard.b.take().expect("combine slot b fulfilled");
    let f = guard.f.take().expect("combine function consumed once");
    drop(guard);
    match f(a, b) {
        Ok(value) => {
            setter.set_value(value);
        }
        Err(err) => {
            setter.set_failure(err);
        }
    }
}

/// Fan in three futures through a combining function. Same contract as
/// [`combine`].
pub fn combine3<A, B, C, R, F>(
    a: &ListenableFuture<A>,
    b: &ListenableFuture<B>,
    c: &ListenableFuture<C>,
    f: F,
) -> ListenableFuture<R>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
    F: FnOnce(A, B, C) -> anyhow::Result<R> + Send + 'static,
{
    let ab = combine(a, b, |a, b| Ok((a, b)));
    let c = c.clone();
    combine(&ab, &c, move |(a, b), c| f(a, b, c))
}
