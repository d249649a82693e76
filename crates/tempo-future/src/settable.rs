// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::FailureCause,
    future::{CancelAction, ListenableFuture},
};
use std::sync::Arc;

/// The producer side of a completion: delivers a value, a failure, or a
/// cancellation exactly once. Cloneable; all clones feed the same future and
/// at most one completion call across all of them ever returns `true`.
pub struct SettableFuture<T> {
    future: ListenableFuture<T>,
}

impl<T> Clone for SettableFuture<T> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
        }
    }
}

impl<T> Default for SettableFuture<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SettableFuture<T>
where
    T: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            future: ListenableFuture::new_pending(None, None),
        }
    }

    /// A settable future with a cancel action: invoked inside any
    /// cancellation transition, before the future is observably terminal,
    /// with the may-interrupt flag of the cancelling call.
    pub fn with_cancel_action<F>(action: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let action: CancelAction = Box::new(action);
        Self {
            future: ListenableFuture::new_pending(Some(action), None),
        }
    }

    /// A settable future that forwards its cancellation to upstream futures.
    /// The forwarding runs after the cancellation is published, so upstream
    /// listeners that re-enter this future see it already terminal.
    pub(crate) fn with_cancel_propagation<F>(propagation: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let propagation: CancelAction = Box::new(propagation);
        Self {
            future: ListenableFuture::new_pending(None, Some(propagation)),
        }
    }

    /// The consumer handle.
    pub fn future(&self) -> ListenableFuture<T> {
        self.future.clone()
    }

    /// Complete with a value. Returns whether this call won the completion
    /// race; a producer that loses to an in-flight cancellation returns
    /// `false` only once that cancellation (interrupt hook included) has
    /// finished.
    pub fn set_value(&self, value: T) -> bool {
        self.future.complete_value(value)
    }

    /// Complete with a failure.
    pub fn set_failure(&self, cause: anyhow::Error) -> bool {
        self.set_failure_cause(Arc::new(cause))
    }

    /// Complete with an already-shared failure cause. Combinators use this
    /// to propagate one upstream failure to several downstream futures.
    pub fn set_failure_cause(&self, cause: FailureCause) -> bool {
        self.future.complete_failure(cause)
    }

    /// Complete as cancelled (without requesting interruption).
    pub fn set_cancelled(&self) -> bool {
        self.future.complete_cancelled(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn only_the_first_completion_wins() {
        let settable = SettableFuture::new();
        assert!(settable.set_value(7));
        assert!(!settable.set_value(8));
        assert!(!settable.set_failure(anyhow!("late")));
        assert!(!settable.set_cancelled());
        assert_eq!(settable.future().result(), 7);
    }

    #[test]
    fn failure_surfaces_through_the_future() {
        let settable = SettableFuture::<u32>::new();
        assert!(settable.set_failure(anyhow!("boom")));
        let future = settable.future();
        assert!(future.is_failed());
        assert_eq!(future.failure().to_string(), "boom");
    }

    #[test]
    fn cancellation_is_a_distinct_terminal_state() {
        let settable = SettableFuture::<u32>::new();
        assert!(settable.set_cancelled());
        let future = settable.future();
        assert!(future.is_done());
        assert!(future.is_cancelled());
        assert!(!future.is_failed());
        assert!(!future.is_successful());
    }
}
