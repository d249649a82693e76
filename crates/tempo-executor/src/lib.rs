// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! The one-method executor handle the rest of the toolkit is written
//! against. Listener delivery, continuation chaining and pipeline dispatch
//! all go through [`Executor::execute`]; any thread pool can participate by
//! implementing it.

#![forbid(unsafe_code)]

use once_cell::sync::Lazy;
use std::sync::Arc;
use thiserror::Error;

/// An erased unit of work.
pub type Work = Box<dyn FnOnce() + Send>;

/// Raised by an executor that refuses the submitted work (saturated, shut
/// down, or otherwise unwilling).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("executor rejected the work item")]
pub struct Rejected;

pub trait Executor: Send + Sync {
    /// Arrange for `work` to run, now or later, on some thread.
    fn execute(&self, work: Work) -> Result<(), Rejected>;
}

/// Runs each work item inline on the submitting thread. Never rejects.
#[derive(Clone, Copy, Debug, Default)]
pub struct SameThreadExecutor;

impl Executor for SameThreadExecutor {
    fn execute(&self, work: Work) -> Result<(), Rejected> {
        work();
        Ok(())
    }
}

static SAME_THREAD: Lazy<Arc<SameThreadExecutor>> = Lazy::new(|| Arc::new(SameThreadExecutor));

/// The process-wide same-thread executor.
pub fn same_thread() -> Arc<SameThreadExecutor> {
    Arc::clone(&SAME_THREAD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn same_thread_runs_inline() {
        let ran = Arc::new(AtomicBool::new(false));
        let seen_thread = Arc::new(std::sync::Mutex::new(None));
        let (ran2, seen2) = (Arc::clone(&ran), Arc::clone(&seen_thread));
        same_thread()
            .execute(Box::new(move || {
                ran2.store(true, Ordering::SeqCst);
                *seen2.lock().unwrap() = Some(std::thread::current().id());
            }))
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(
            seen_thread.lock().unwrap().unwrap(),
            std::thread::current().id()
        );
    }
}
