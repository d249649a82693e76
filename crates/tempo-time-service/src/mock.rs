// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{TimeServiceTrait, NANOS_PER_MILLI};
use parking_lot::{Condvar, Mutex};
use std::{sync::Arc, time::Duration};
use tempo_sync::{interrupt, Interrupted};

/// Virtual clock for tests. Time starts at zero and only moves when a test
/// calls [`MockTimeService::advance`]; sleepers block until virtual time
/// reaches their deadline.
#[derive(Clone, Debug)]
pub struct MockTimeService {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    now_nanos: Mutex<u64>,
    advanced: Condvar,
}

// Upper bound on how long a sleeper stays parked between interrupt checks;
// the condvar is notified on every advance, so this only bounds interrupt
// latency.
const INTERRUPT_POLL: Duration = Duration::from_millis(1);

impl MockTimeService {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                now_nanos: Mutex::new(0),
                advanced: Condvar::new(),
            }),
        }
    }

    /// Move virtual time forward and wake every sleeper.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.inner.now_nanos.lock();
        *now += duration.as_nanos() as u64;
        self.inner.advanced.notify_all();
    }

    pub fn advance_ms(&self, millis: u64) {
        self.advance(Duration::from_nanos(millis * NANOS_PER_MILLI));
    }
}

impl Default for MockTimeService {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeServiceTrait for MockTimeService {
    fn now_nanos(&self) -> u64 {
        *self.inner.now_nanos.lock()
    }

    fn sleep_until_nanos(&self, deadline_nanos: u64) -> Result<(), Interrupted> {
        let mut now = self.inner.now_nanos.lock();
        while *now < deadline_nanos {
            interrupt::check_interrupted()?;
            self.inner.advanced.wait_for(&mut now, INTERRUPT_POLL);
        }
        Ok(())
    }

    fn uninterrupted_sleep_until_nanos(&self, deadline_nanos: u64) {
        let mut now = self.inner.now_nanos.lock();
        while *now < deadline_nanos {
            self.inner.advanced.wait_for(&mut now, INTERRUPT_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TimeService, NANOS_PER_SEC};
    use std::thread;

    #[test]
    fn time_only_moves_on_advance() {
        let time = MockTimeService::new();
        assert_eq!(time.now_nanos(), 0);
        thread::sleep(Duration::from_millis(5));
        assert_eq!(time.now_nanos(), 0);
        time.advance(Duration::from_secs(1));
        assert_eq!(time.now_nanos(), NANOS_PER_SEC);
    }

    #[test]
    fn sleep_wakes_when_time_catches_up() {
        let time = TimeService::mock();
        let mock = time.clone().into_mock();
        let sleeper = {
            let time = time.clone();
            thread::spawn(move || {
                time.sleep_until_nanos(NANOS_PER_SEC).unwrap();
                time.now_nanos()
            })
        };
        thread::sleep(Duration::from_millis(10));
        mock.advance(Duration::from_secs(1));
        assert!(sleeper.join().unwrap() >= NANOS_PER_SEC);
    }

    #[test]
    fn interrupted_sleep_returns_early() {
        let time = TimeService::mock();
        let (tx, rx) = std::sync::mpsc::channel();
        let sleeper = {
            let time = time.clone();
            thread::spawn(move || {
                tx.send(interrupt::current()).unwrap();
                time.sleep_until_nanos(NANOS_PER_SEC)
            })
        };
        let handle = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(10));
        handle.interrupt();
        assert_eq!(sleeper.join().unwrap(), Err(Interrupted));
    }
}
