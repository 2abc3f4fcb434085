//! Proposer role
//!
//! Runs one round at a time: prepare, gather promises, send a single accept
//! once a quorum promised, then gather accepteds until the round commits.
//! Responses are counted per acceptor so duplicated deliveries count once.

use crate::message::{Accepted, Nack, Promise};
use crate::quorum::RoundCounts;
use baton_core::{Ballot, BallotId, InstanceId, ProposalNumber};
use std::collections::HashSet;

/// Outcome of feeding a promise to the proposer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromiseOutcome {
    /// Not enough promises yet, or the promise was for an older round
    Pending,
    /// The promise quorum was just reached: send this accept
    Accept(Ballot),
}

#[derive(Debug)]
pub struct Proposer {
    id: InstanceId,
    proposal_number: ProposalNumber,
    /// Highest proposal number observed from anyone, used to outbid
    highest_seen: ProposalNumber,
    best_promise: Option<Ballot>,
    current: Option<BallotId>,
    quorum: usize,
    promises: HashSet<InstanceId>,
    accepted: HashSet<InstanceId>,
    nacks: HashSet<InstanceId>,
    accept_sent: bool,
    committed: bool,
}

impl Proposer {
    pub fn new(id: InstanceId) -> Self {
        Self {
            id,
            proposal_number: ProposalNumber::ZERO,
            highest_seen: ProposalNumber::ZERO,
            best_promise: None,
            current: None,
            quorum: usize::MAX,
            promises: HashSet::new(),
            accepted: HashSet::new(),
            nacks: HashSet::new(),
            accept_sent: false,
            committed: false,
        }
    }

    pub fn proposal_number(&self) -> ProposalNumber {
        self.proposal_number
    }

    pub fn current(&self) -> Option<&BallotId> {
        self.current.as_ref()
    }

    pub fn best_promise(&self) -> Option<&Ballot> {
        self.best_promise.as_ref()
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Responses drawn by the current round so far
    pub fn round_counts(&self) -> RoundCounts {
        RoundCounts {
            promises: self.promises.len(),
            accepted: self.accepted.len(),
            nacks: self.nacks.len(),
        }
    }

    /// Open a new round that outbids every number seen so far
    pub fn start_round(&mut self, quorum: usize) -> BallotId {
        let seen = self
            .best_promise
            .as_ref()
            .map(Ballot::number)
            .unwrap_or(ProposalNumber::ZERO)
            .max(self.highest_seen);
        self.proposal_number = self.proposal_number.max(seen).next();

        let ballot = BallotId::new(self.proposal_number, self.id.clone());
        self.current = Some(ballot.clone());
        self.quorum = quorum.max(1);
        self.promises.clear();
        self.accepted.clear();
        self.nacks.clear();
        self.accept_sent = false;
        self.committed = false;
        ballot
    }

    /// Record a promise. Returns the accept to send once the quorum is met.
    ///
    /// `wants_baton` decides the winner when no promise carried one.
    pub fn on_promise(&mut self, promise: &Promise, wants_baton: bool) -> PromiseOutcome {
        if let Some(revealed) = &promise.accepted {
            self.highest_seen = self.highest_seen.max(revealed.number());
            // A withheld winner on the best ballot means an acceptor saw
            // that winner vanish
            let adopt = match &self.best_promise {
                None => true,
                Some(best) => {
                    revealed.id > best.id || (revealed.id == best.id && revealed.winner.is_none())
                }
            };
            if adopt {
                self.best_promise = Some(revealed.clone());
            }
        }

        let current = match &self.current {
            Some(current) if *current == promise.ballot => current.clone(),
            _ => return PromiseOutcome::Pending,
        };
        self.promises.insert(promise.acceptor_id.clone());

        if self.accept_sent || self.promises.len() < self.quorum {
            return PromiseOutcome::Pending;
        }
        self.accept_sent = true;
        PromiseOutcome::Accept(Ballot::new(current, self.choose_winner(wants_baton)))
    }

    /// Record a refusal
    pub fn on_nack(&mut self, nack: &Nack) {
        if let Some(promised) = &nack.promised {
            self.highest_seen = self.highest_seen.max(promised.number);
        }
        if self.current.as_ref() == Some(&nack.ballot) {
            self.nacks.insert(nack.acceptor_id.clone());
        }
    }

    /// Record an acceptance of one of our ballots. Returns true exactly once
    /// per round, when the accepted quorum is first reached.
    pub fn on_accepted(&mut self, accepted: &Accepted) -> bool {
        if self.current.as_ref() != Some(&accepted.ballot.id) {
            return false;
        }
        self.accepted.insert(accepted.acceptor_id.clone());
        if self.committed || self.accepted.len() < self.quorum {
            return false;
        }
        self.committed = true;
        true
    }

    /// Whether the current round has gathered its accepted quorum
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Drop the remembered winner so the next round may pick a new one
    pub fn forget_winner(&mut self) {
        if let Some(best) = &mut self.best_promise {
            best.winner = None;
        }
    }

    /// Never override another live winner. Only supply ourselves, and only
    /// while we want the baton.
    fn choose_winner(&self, wants_baton: bool) -> Option<InstanceId> {
        match self.best_promise.as_ref().and_then(|b| b.winner.as_ref()) {
            Some(winner) if *winner != self.id => Some(winner.clone()),
            _ if wants_baton => Some(self.id.clone()),
            _ => None,
        }
    }
}
