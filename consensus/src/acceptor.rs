//! Acceptor role
//!
//! Remembers the highest ballot promised and the last ballot accepted. Both
//! only ever grow.

use crate::message::{Accepted, Nack, Prepare, Promise};
use baton_core::{Ballot, BallotId, ConnectionTest, InstanceId};

#[derive(Debug, Clone)]
pub struct Acceptor {
    id: InstanceId,
    promised: Option<BallotId>,
    accepted: Option<Ballot>,
}

impl Acceptor {
    pub fn new(id: InstanceId) -> Self {
        Self {
            id,
            promised: None,
            accepted: None,
        }
    }

    /// Highest ballot promised or accepted so far
    pub fn promised(&self) -> Option<&BallotId> {
        self.promised.as_ref()
    }

    pub fn accepted(&self) -> Option<&Ballot> {
        self.accepted.as_ref()
    }

    /// Promise a strictly higher ballot, or refuse it.
    ///
    /// The promise reveals the last accepted ballot. Its winner is withheld
    /// when the oracle no longer vouches for it, which lets the proposer hand
    /// the baton to someone else.
    pub fn on_prepare(&mut self, prepare: &Prepare, oracle: &dyn ConnectionTest) -> Result<Promise, Nack> {
        if Some(&prepare.ballot) <= self.promised.as_ref() {
            return Err(self.nack(prepare.ballot.clone()));
        }
        self.promised = Some(prepare.ballot.clone());

        let accepted = self.accepted.clone().map(|mut ballot| {
            if let Some(winner) = &ballot.winner {
                if !oracle.is_connected(winner) {
                    ballot.winner = None;
                }
            }
            ballot
        });

        Ok(Promise {
            ballot: prepare.ballot.clone(),
            acceptor_id: self.id.clone(),
            accepted,
        })
    }

    /// Accept a ballot that is not lower than the promise, or refuse it
    pub fn on_accept(&mut self, ballot: &Ballot) -> Result<Accepted, Nack> {
        if Some(&ballot.id) < self.promised.as_ref() {
            return Err(self.nack(ballot.id.clone()));
        }
        self.promised = Some(ballot.id.clone());
        self.accepted = Some(ballot.clone());

        Ok(Accepted {
            ballot: ballot.clone(),
            acceptor_id: self.id.clone(),
        })
    }

    fn nack(&self, ballot: BallotId) -> Nack {
        Nack {
            ballot,
            acceptor_id: self.id.clone(),
            promised: self.promised.clone(),
        }
    }
}
