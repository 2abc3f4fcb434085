//! Acceptor population estimate
//!
//! Nobody knows how many instances are racing for a baton. Each proposer
//! estimates it from the responses its previous round drew, refreshed at
//! most once per election window.
//!
//! The estimate is only as good as the round it was taken from. Responses
//! lost in that round, or a partition that hides part of the population,
//! shrink it, and the quorum shrinks with it. Once two sides of a lossy
//! network each count only themselves, both can commit and two instances
//! can hold the baton at once. The heuristic is safe on a network that
//! delivers at least a majority of each round's replies.

use std::time::{Duration, Instant};

/// Estimate used before a full round has been observed. Its quorum is out
/// of reach, so the first proposal only gathers responses.
pub const UNKNOWN_POPULATION: usize = usize::MAX;

/// Responses drawn by one proposal round, counted per distinct acceptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundCounts {
    pub promises: usize,
    pub accepted: usize,
    pub nacks: usize,
}

impl RoundCounts {
    /// Acceptors that answered the round in any way
    pub fn population(&self) -> usize {
        self.promises.max(self.accepted) + self.nacks
    }
}

/// Windowed estimate of the number of live acceptors
#[derive(Debug, Clone)]
pub struct QuorumEstimator {
    window: Duration,
    estimate: usize,
    last_gathering: Option<Instant>,
}

impl QuorumEstimator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            estimate: UNKNOWN_POPULATION,
            last_gathering: None,
        }
    }

    /// Fold in the round that just finished and return the estimate to use
    /// for the next one.
    ///
    /// The estimate only moves once the window has elapsed since the last
    /// gathering started, so a round that was cut short by a retry does not
    /// shrink it.
    pub fn estimate(&mut self, now: Instant, finished: RoundCounts) -> usize {
        match self.last_gathering {
            None => self.last_gathering = Some(now),
            Some(started) if now.saturating_duration_since(started) >= self.window => {
                let seen = finished.population();
                self.estimate = if seen == 0 { UNKNOWN_POPULATION } else { seen };
                self.last_gathering = Some(now);
            }
            Some(_) => {}
        }
        self.estimate
    }

    /// Current estimate without folding anything in
    pub fn current(&self) -> usize {
        self.estimate
    }

    /// Whether a full round has been observed yet
    pub fn is_known(&self) -> bool {
        self.estimate != UNKNOWN_POPULATION
    }

    /// Strict majority of an estimated population
    pub fn quorum_of(population: usize) -> usize {
        population / 2 + 1
    }
}
