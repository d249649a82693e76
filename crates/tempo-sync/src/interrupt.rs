// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Per-thread interrupt tokens.
//!
//! Interrupting a thread sets its flag and unparks it. Blocking primitives
//! check the flag around each park and surface [`Interrupted`], clearing the
//! flag as they do so. Code that must not be interrupted remembers a pending
//! flag and reasserts it on exit.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, Thread},
    time::Instant,
};
use thiserror::Error;

/// Returned by interruptible blocking calls when the waiting thread was
/// interrupted. The thread's interrupt flag is cleared before this error is
/// produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("thread interrupted")]
pub struct Interrupted;

#[derive(Debug)]
struct Token {
    thread: Thread,
    interrupted: AtomicBool,
}

thread_local! {
    static CURRENT: Arc<Token> = Arc::new(Token {
        thread: thread::current(),
        interrupted: AtomicBool::new(false),
    });
}

/// A cloneable handle to a thread's interrupt token.
#[derive(Clone, Debug)]
pub struct InterruptHandle {
    token: Arc<Token>,
}

impl InterruptHandle {
    /// Set the target thread's interrupt flag and wake it from any park.
    pub fn interrupt(&self) {
        self.token.interrupted.store(true, Ordering::Release);
        self.token.thread.unpark();
    }

    /// Peek at the target thread's flag without clearing it.
    pub fn is_interrupted(&self) -> bool {
        self.token.interrupted.load(Ordering::Acquire)
    }

    /// Wake the target thread without touching its interrupt flag.
    pub fn unpark(&self) {
        self.token.thread.unpark();
    }
}

/// The calling thread's interrupt handle.
pub fn current() -> InterruptHandle {
    CURRENT.with(|token| InterruptHandle {
        token: Arc::clone(token),
    })
}

/// Peek at the calling thread's interrupt flag.
pub fn is_interrupted() -> bool {
    CURRENT.with(|token| token.interrupted.load(Ordering::Acquire))
}

/// Check and clear the calling thread's interrupt flag.
pub fn take_interrupted() -> bool {
    CURRENT.with(|token| token.interrupted.swap(false, Ordering::AcqRel))
}

/// Clear-and-error convention for blocking calls: returns `Err(Interrupted)`
/// iff the flag was set, clearing it.
pub fn check_interrupted() -> Result<(), Interrupted> {
    if take_interrupted() {
        Err(Interrupted)
    } else {
        Ok(())
    }
}

/// Reassert the calling thread's interrupt flag. Used by uninterruptible
/// waits to preserve a pending interrupt across the wait.
pub fn reassert_interrupted() {
    CURRENT.with(|token| token.interrupted.store(true, Ordering::Release));
}

/// Park the calling thread. Wakeups may be spurious; callers loop on their
/// own predicate.
pub fn park() {
    thread::park();
}

/// Park the calling thread until `deadline` at the latest. Returns without
/// parking if the deadline has already passed. Wakeups may be spurious.
pub fn park_until(deadline: Instant) {
    let now = Instant::now();
    if let Some(remaining) = deadline.checked_duration_since(now) {
        thread::park_timeout(remaining);
    }
}
