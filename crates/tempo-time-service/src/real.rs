// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::TimeServiceTrait;
use once_cell::sync::Lazy;
use std::time::{Duration, Instant};
use tempo_sync::{interrupt, Interrupted};

// All readings are offsets from a single process-wide anchor so that the
// nanosecond domain is shared across every RealTimeService instance.
static MONOTONIC_ANCHOR: Lazy<Instant> = Lazy::new(Instant::now);

#[derive(Clone, Copy, Debug, Default)]
pub struct RealTimeService;

impl RealTimeService {
    pub fn new() -> Self {
        RealTimeService
    }

    fn instant_for(deadline_nanos: u64) -> Instant {
        *MONOTONIC_ANCHOR + Duration::from_nanos(deadline_nanos)
    }
}

impl TimeServiceTrait for RealTimeService {
    fn now_nanos(&self) -> u64 {
        MONOTONIC_ANCHOR.elapsed().as_nanos() as u64
    }

    fn sleep_until_nanos(&self, deadline_nanos: u64) -> Result<(), Interrupted> {
        let wake_at = Self::instant_for(deadline_nanos);
        while self.now_nanos() < deadline_nanos {
            interrupt::check_interrupted()?;
            interrupt::park_until(wake_at);
            interrupt::check_interrupted()?;
        }
        Ok(())
    }

    fn uninterrupted_sleep_until_nanos(&self, deadline_nanos: u64) {
        let wake_at = Self::instant_for(deadline_nanos);
        let mut pending_interrupt = false;
        while self.now_nanos() < deadline_nanos {
            interrupt::park_until(wake_at);
            if interrupt::take_interrupted() {
                pending_interrupt = true;
            }
        }
        if pending_interrupt {
            interrupt::reassert_interrupted();
        }
    }
}
