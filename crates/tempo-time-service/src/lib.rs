// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! A monotonic-nanosecond time source with a sleep-until operation.
//!
//! Production code holds a [`TimeService`] and never names the concrete
//! implementation; tests construct `TimeService::mock()` (behind the
//! `testing` feature) and drive virtual time with
//! [`MockTimeService::advance`].

#![forbid(unsafe_code)]

use enum_dispatch::enum_dispatch;
use std::{fmt::Debug, time::Duration};
use tempo_sync::Interrupted;

mod real;
pub use real::RealTimeService;

#[cfg(any(test, feature = "testing"))]
mod mock;
#[cfg(any(test, feature = "testing"))]
pub use mock::MockTimeService;

/// Nanoseconds in one millisecond.
pub const NANOS_PER_MILLI: u64 = 1_000_000;
/// Nanoseconds in one second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

#[enum_dispatch(TimeServiceTrait)]
#[derive(Clone, Debug)]
pub enum TimeService {
    RealTimeService(RealTimeService),

    #[cfg(any(test, feature = "testing"))]
    MockTimeService(MockTimeService),
}

impl TimeService {
    pub fn real() -> Self {
        RealTimeService::new().into()
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn mock() -> Self {
        MockTimeService::new().into()
    }

    #[cfg(any(test, feature = "testing"))]
    pub fn into_mock(self) -> MockTimeService {
        match self {
            TimeService::MockTimeService(inner) => inner,
            TimeService::RealTimeService(_) => panic!("not a mock time service"),
        }
    }
}

#[enum_dispatch]
pub trait TimeServiceTrait: Clone + Debug + Send + Sync {
    /// Monotonic non-decreasing nanosecond reading. The zero point is
    /// arbitrary but fixed for the process lifetime.
    fn now_nanos(&self) -> u64;

    /// Block until the clock reaches `deadline_nanos`, or until the calling
    /// thread is interrupted.
    fn sleep_until_nanos(&self, deadline_nanos: u64) -> Result<(), Interrupted>;

    /// Block until the clock reaches `deadline_nanos`, shrugging off
    /// interrupts. A pending interrupt is reasserted before returning.
    fn uninterrupted_sleep_until_nanos(&self, deadline_nanos: u64);

    /// Convenience: sleep for a duration from now, interruptibly.
    fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = self.now_nanos().saturating_add(duration.as_nanos() as u64);
        self.sleep_until_nanos(deadline)
    }
}
