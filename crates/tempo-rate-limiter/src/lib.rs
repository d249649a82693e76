// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Token-bucket admission control.
//!
//! Permits accrue over time up to a cap and are consumed by acquisitions; an
//! acquisition that outruns the bucket goes into debt and sleeps until the
//! bucket's timeline reaches it. The accounting pair `(as_of_nanos,
//! stored_permits)` lives under a spinlock, so the decision to admit and the
//! state mutation are always atomic; `as_of_nanos` never moves backwards.
//!
//! Optional jitter perturbs the effective rate per decision by `1 ± jitter ·
//! U^Δ` (U uniform in [0,1), Δ the seconds the decision spans), which
//! scatters short-horizon timing while long-horizon averages stay at the
//! nominal rate.

#![forbid(unsafe_code)]

use rand::Rng;
use std::time::Duration;
use tempo_sync::{Interrupted, SpinLock};
use tempo_time_service::{TimeService, TimeServiceTrait, NANOS_PER_MILLI, NANOS_PER_SEC};
use tracing::trace;

// Subtracted from every clock reading to smooth over scheduling inaccuracy:
// a sleeper that wakes marginally early still counts as on time.
const SCHEDULING_SLACK_NANOS: u64 = NANOS_PER_MILLI;

#[derive(Clone, Copy)]
struct Bucket {
    as_of_nanos: u64,
    stored_permits: u64,
}

pub struct RateLimiter {
    nanos_per_permit: f64,
    max_stored_permits: u64,
    jitter: f64,
    time: TimeService,
    bucket: SpinLock<Bucket>,
}

impl RateLimiter {
    /// A limiter admitting `permits_per_second` on average, storing at most
    /// `max_stored_permits` across idle stretches, starting with
    /// `initial_permits` banked. `jitter` in `[0, 1]` scales the per-decision
    /// rate perturbation; zero disables it.
    pub fn new(
        permits_per_second: f64,
        max_stored_permits: u64,
        initial_permits: u64,
        jitter: f64,
        time: TimeService,
    ) -> Self {
        assert!(
            permits_per_second > 0.0 && permits_per_second.is_finite(),
            "permits_per_second must be positive and finite"
        );
        assert!(max_stored_permits >= 1, "max_stored_permits must be >= 1");
        assert!(
            initial_permits <= max_stored_permits,
            "initial_permits cannot exceed max_stored_permits"
        );
        assert!(
            (0.0..=1.0).contains(&jitter),
            "jitter must lie in [0, 1]"
        );
        let bucket = SpinLock::new(Bucket {
            as_of_nanos: time.now_nanos(),
            stored_permits: initial_permits,
        });
        Self {
            nanos_per_permit: NANOS_PER_SEC as f64 / permits_per_second,
            max_stored_permits,
            jitter,
            time,
            bucket,
        }
    }

    /// Take `permits` from the bucket, sleeping interruptibly until the
    /// bucket's timeline covers them. `permits` must be at least 1.
    pub fn acquire(&self, permits: u64) -> Result<(), Interrupted> {
        let complete_at = self.reserve(permits);
        self.time.sleep_until_nanos(complete_at)
    }

    /// [`acquire`](Self::acquire), shrugging off interrupts (a pending
    /// interrupt flag is preserved across the sleep).
    pub fn acquire_uninterruptibly(&self, permits: u64) {
        let complete_at = self.reserve(permits);
        self.time.uninterrupted_sleep_until_nanos(complete_at);
    }

    /// Take `permits` only if no sleep would be needed. The bucket is left
    /// untouched when this returns false.
    pub fn try_acquire(&self, permits: u64) -> bool {
        self.reserve_within(permits, 0).is_some()
    }

    /// Take `permits` only if the required sleep fits within `timeout`,
    /// then perform that sleep. The bucket is left untouched when this
    /// returns `Ok(false)`.
    pub fn try_acquire_for(&self, permits: u64, timeout: Duration) -> Result<bool, Interrupted> {
        match self.reserve_within(permits, timeout.as_nanos() as u64) {
            Some(complete_at) => {
                self.time.sleep_until_nanos(complete_at)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Commit a reservation unconditionally and return its completion time.
    fn reserve(&self, permits: u64) -> u64 {
        assert!(permits >= 1, "must acquire at least one permit");
        let mut bucket = self.bucket.lock();
        let complete_at = self.plan(permits, &mut bucket);
        trace!(permits, complete_at, "reserved permits");
        complete_at
    }

    /// Commit a reservation only if its sleep fits in `budget_nanos`; the
    /// admission decision and the state mutation happen under one lock hold.
    fn reserve_within(&self, permits: u64, budget_nanos: u64) -> Option<u64> {
        assert!(permits >= 1, "must acquire at least one permit");
        let mut bucket = self.bucket.lock();
        let mut scratch = *bucket;
        let complete_at = self.plan(permits, &mut scratch);
        if complete_at > self.time.now_nanos().saturating_add(budget_nanos) {
            return None;
        }
        *bucket = scratch;
        Some(complete_at)
    }

    /// The bucket accounting: accrue permits earned since `as_of_nanos`,
    /// then either consume from the store or push `as_of_nanos` into the
    /// future by the shortage. Returns the completion time.
    fn plan(&self, permits: u64, bucket: &mut Bucket) -> u64 {
        let now = self
            .time
            .now_nanos()
            .saturating_sub(SCHEDULING_SLACK_NANOS);
        if bucket.as_of_nanos <= now {
            let span_nanos = now - bucket.as_of_nanos;
            let rate = self.jittered_nanos_per_permit(span_nanos as f64 / NANOS_PER_SEC as f64);
            let accrued = (span_nanos as f64 / rate).floor() as u64;
            bucket.stored_permits =
                (bucket.stored_permits + accrued).min(self.max_stored_permits);
            bucket.as_of_nanos += (accrued as f64 * rate) as u64;
        }
        if bucket.stored_permits >= permits {
            bucket.stored_permits -= permits;
            now
        } else {
            let shortage = permits - bucket.stored_permits;
            let debt_seconds = shortage as f64 * self.nanos_per_permit / NANOS_PER_SEC as f64;
            let rate = self.jittered_nanos_per_permit(debt_seconds);
            bucket.stored_permits = 0;
            bucket.as_of_nanos += (shortage as f64 * rate) as u64;
            bucket.as_of_nanos
        }
    }

    /// The effective nanos-per-permit for one decision spanning
    /// `span_seconds`. Always within `nominal * [1 - jitter, 1 + jitter]`;
    /// the `U^Δ` exponent damps the typical perturbation as the span grows.
    fn jittered_nanos_per_permit(&self, span_seconds: f64) -> f64 {
        if self.jitter == 0.0 {
            return self.nanos_per_permit;
        }
        let mut rng = rand::thread_rng();
        let uniform: f64 = rng.gen();
        let magnitude = self.jitter * uniform.powf(span_seconds.max(f64::MIN_POSITIVE));
        let sigma = if rng.gen::<bool>() { magnitude } else { -magnitude };
        (self.nanos_per_permit * (1.0 + sigma)).max(1.0)
    }
}
