//! Election and recheck timing
//!
//! Timers themselves belong to whoever drives the engine. This module only
//! decides durations and tells live firings from stale ones.

use baton_core::{DEFAULT_PERIOD_MS, DEFAULT_PERIOD_VARIABILITY};
use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;

/// Spread of each election deadline around the election timeout
pub const ELECTION_JITTER: f64 = 0.5;

/// `base` scaled by a random factor in `[1 - variability, 1 + variability]`
pub fn jittered(base: Duration, variability: f64, rng: &mut impl Rng) -> Duration {
    let variability = variability.clamp(0.0, 1.0);
    if variability == 0.0 {
        return base;
    }
    let factor = rng.gen_range(1.0 - variability..=1.0 + variability);
    base.mul_f64(factor)
}

/// A configured period, or a per-instance jittered default when unset.
///
/// Instances started together then drift apart instead of retrying in
/// lockstep.
pub fn resolve_period(configured_ms: Option<u64>, rng: &mut impl Rng) -> Duration {
    match configured_ms {
        Some(ms) => Duration::from_millis(ms),
        None => jittered(
            Duration::from_millis(DEFAULT_PERIOD_MS),
            DEFAULT_PERIOD_VARIABILITY,
            rng,
        ),
    }
}

/// One-shot election deadline.
///
/// Each arming gets a fresh epoch; a firing whose epoch is not the latest
/// armed one is stale and ignored.
#[derive(Debug)]
pub struct ElectionWatchdog {
    timeout: Duration,
    rng: StdRng,
    epoch: u64,
    pending: bool,
}

impl ElectionWatchdog {
    pub fn new(timeout: Duration, rng: StdRng) -> Self {
        Self {
            timeout,
            rng,
            epoch: 0,
            pending: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Arm a new deadline, returning its delay and epoch
    pub fn arm(&mut self) -> (Duration, u64) {
        self.epoch += 1;
        self.pending = true;
        (jittered(self.timeout, ELECTION_JITTER, &mut self.rng), self.epoch)
    }

    /// Disarm. Returns whether a deadline was pending.
    pub fn disarm(&mut self) -> bool {
        std::mem::replace(&mut self.pending, false)
    }

    /// Consume a firing. Returns true if it is the live deadline.
    pub fn fire(&mut self, epoch: u64) -> bool {
        if !self.pending || epoch != self.epoch {
            return false;
        }
        self.pending = false;
        true
    }
}
