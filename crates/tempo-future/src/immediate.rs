// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Futures that are terminal at construction. Their listener sets are born
//! sealed, so `add_listener` always delivers immediately and `cancel` always
//! returns false.

use crate::future::{ListenableFuture, Outcome, CANCELLED, FAILURE, SUCCESS};
use std::sync::Arc;

/// A future already completed with `value`.
pub fn completed<T>(value: T) -> ListenableFuture<T>
where
    T: Send + Sync + 'static,
{
    ListenableFuture::new_terminal(Some(Outcome::Value(value)), SUCCESS)
}

/// A future already failed with `cause`.
pub fn failed<T>(cause: anyhow::Error) -> ListenableFuture<T>
where
    T: Send + Sync + 'static,
{
    ListenableFuture::new_terminal(Some(Outcome::Failure(Arc::new(cause))), FAILURE)
}

/// A future already cancelled.
pub fn cancelled_future<T>() -> ListenableFuture<T>
where
    T: Send + Sync + 'static,
{
    ListenableFuture::new_terminal(None, CANCELLED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempo_executor::same_thread;

    #[test]
    fn completed_is_terminal_at_birth() {
        let future = completed(5);
        assert!(future.is_successful());
        assert_eq!(future.result(), 5);
        assert!(!future.cancel(true));
    }

    #[test]
    fn failed_reports_the_cause() {
        let future = failed::<u32>(anyhow!("preloaded"));
        assert!(future.is_failed());
        assert_eq!(future.failure().to_string(), "preloaded");
    }

    #[test]
    fn cancelled_future_is_cancelled() {
        let future = cancelled_future::<u32>();
        assert!(future.is_cancelled());
        assert!(!future.cancel(false));
    }

    #[test]
    fn listeners_fire_immediately() {
        let future = completed(1);
        let fired = Arc::new(AtomicBool::new(false));
        let observer = Arc::clone(&fired);
        future.add_listener(same_thread(), move |f| {
            assert!(f.is_successful());
            observer.store(true, Ordering::SeqCst);
        });
        assert!(fired.load(Ordering::SeqCst));
    }
}
