// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Quiescence bookkeeping: a phase counter whose parties are the live
//! pipelines, plus the per-pipeline termination latch. Both ride on the
//! workspace spinlock since every critical section is a handful of loads and
//! stores.

use std::time::Instant;
use tempo_sync::{Interrupted, SpinCondvar, SpinLock};

struct PhaseState {
    active: usize,
    phase: u64,
}

/// Counts live pipelines; a waiter observes the phase at entry and is
/// released when the count drops to zero (which advances the phase), so a
/// momentary quiescent point suffices even if new pipelines appear right
/// after it.
pub(crate) struct QuiescenceTracker {
    state: SpinLock<PhaseState>,
    arrived: SpinCondvar,
}

impl QuiescenceTracker {
    pub fn new() -> Self {
        let state = SpinLock::new(PhaseState {
            active: 0,
            phase: 0,
        });
        let arrived = state.condvar();
        Self { state, arrived }
    }

    pub fn register(&self) {
        self.state.lock().active += 1;
    }

    pub fn deregister(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.active > 0, "deregister without a matching register");
        state.active -= 1;
        if state.active == 0 {
            state.phase += 1;
            self.arrived.notify_all();
        }
    }

    pub fn is_quiescent(&self) -> bool {
        self.state.lock().active == 0
    }

    pub fn await_quiescence(&self) -> Result<(), Interrupted> {
        let mut state = self.state.lock();
        let entry_phase = state.phase;
        while state.active > 0 && state.phase == entry_phase {
            state = self.arrived.wait_interruptibly(state)?;
        }
        Ok(())
    }

    /// Returns whether quiescence was reached before the deadline.
    pub fn await_quiescence_until(&self, deadline: Instant) -> Result<bool, Interrupted> {
        let mut state = self.state.lock();
        let entry_phase = state.phase;
        while state.active > 0 && state.phase == entry_phase {
            let (reacquired, timed_out) = self.arrived.wait_until(state, deadline)?;
            state = reacquired;
            if timed_out {
                return Ok(state.active == 0 || state.phase != entry_phase);
            }
        }
        Ok(true)
    }
}

/// One-shot gate that opens when a pipeline (or a single-pipeline adapter)
/// terminates.
pub(crate) struct TerminationLatch {
    open: SpinLock<bool>,
    opened: SpinCondvar,
}

impl TerminationLatch {
    pub fn new() -> Self {
        let open = SpinLock::new(false);
        let opened = open.condvar();
        Self { open, opened }
    }

    pub fn open(&self) {
        let mut open = self.open.lock();
        if !*open {
            *open = true;
            self.opened.notify_all();
        }
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    pub fn await_open(&self) -> Result<(), Interrupted> {
        let mut open = self.open.lock();
        while !*open {
            open = self.opened.wait_interruptibly(open)?;
        }
        Ok(())
    }

    /// Returns whether the latch opened before the deadline.
    pub fn await_open_until(&self, deadline: Instant) -> Result<bool, Interrupted> {
        let mut open = self.open.lock();
        while !*open {
            let (reacquired, timed_out) = self.opened.wait_until(open, deadline)?;
            open = reacquired;
            if timed_out {
                return Ok(*open);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, time::Duration};

    #[test]
    fn tracker_is_quiescent_when_empty() {
        let tracker = QuiescenceTracker::new();
        assert!(tracker.is_quiescent());
        tracker.register();
        assert!(!tracker.is_quiescent());
        tracker.deregister();
        assert!(tracker.is_quiescent());
    }

    #[test]
    fn await_quiescence_returns_once_parties_leave() {
        let tracker = Arc::new(QuiescenceTracker::new());
        tracker.register();
        let waiter = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || tracker.await_quiescence())
        };
        thread::sleep(Duration::from_millis(10));
        tracker.deregister();
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn timed_await_reports_missed_deadline() {
        let tracker = QuiescenceTracker::new();
        tracker.register();
        let reached = tracker
            .await_quiescence_until(Instant::now() + Duration::from_millis(20))
            .unwrap();
        assert!(!reached);
        tracker.deregister();
    }

    #[test]
    fn latch_releases_waiters_when_opened() {
        let latch = Arc::new(TerminationLatch::new());
        let waiter = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || latch.await_open())
        };
        thread::sleep(Duration::from_millis(10));
        latch.open();
        waiter.join().unwrap().unwrap();
        assert!(latch.is_open());
    }
}
