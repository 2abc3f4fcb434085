//! Core types for the virtual baton
//!
//! Defines the identities and ballots exchanged by every participant.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the resource being arbitrated.
///
/// Every participant racing for the same resource uses an identical name;
/// batons with different names never interact.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatonName(String);

impl BatonName {
    pub fn new(name: impl Into<String>) -> Self {
        BatonName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for BatonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for BatonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BatonName({})", self.0)
    }
}

impl From<&str> for BatonName {
    fn from(name: &str) -> Self {
        BatonName::new(name)
    }
}

/// Identity of one (baton, participant) instance.
///
/// Serves both as the voter identity and as a candidate winner. It may be a
/// transport session identity, an object identity, or the concatenation of
/// the two.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        InstanceId(id.into())
    }

    /// Generate a fresh random identity
    pub fn random() -> Self {
        InstanceId(uuid::Uuid::new_v4().to_string())
    }

    /// Concatenate a session identity and an object identity.
    pub fn compose(session: &str, object: &str) -> Self {
        InstanceId(format!("{}{}", session, object))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        InstanceId::new(id)
    }
}

impl From<String> for InstanceId {
    fn from(id: String) -> Self {
        InstanceId(id)
    }
}

/// Proposal number, strictly increasing per proposer
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProposalNumber(pub u64);

impl ProposalNumber {
    pub const ZERO: ProposalNumber = ProposalNumber(0);

    pub fn new(n: u64) -> Self {
        ProposalNumber(n)
    }

    pub fn next(&self) -> Self {
        ProposalNumber(self.0 + 1)
    }
}

impl fmt::Display for ProposalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for ProposalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProposalNumber({})", self.0)
    }
}

/// Totally ordered ballot identity.
///
/// Ordered by number first and proposer second, so two proposers that pick
/// the same number never produce equal ballots.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BallotId {
    pub number: ProposalNumber,
    pub proposer_id: InstanceId,
}

impl BallotId {
    pub fn new(number: ProposalNumber, proposer_id: InstanceId) -> Self {
        Self { number, proposer_id }
    }
}

impl fmt::Display for BallotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.number, self.proposer_id)
    }
}

/// A numbered commitment: who should hold the baton once it commits.
///
/// `winner == None` releases the baton to nobody.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ballot {
    pub id: BallotId,
    pub winner: Option<InstanceId>,
}

impl Ballot {
    pub fn new(id: BallotId, winner: Option<InstanceId>) -> Self {
        Self { id, winner }
    }

    pub fn number(&self) -> ProposalNumber {
        self.id.number
    }

    pub fn proposer_id(&self) -> &InstanceId {
        &self.id.proposer_id
    }

    /// Whether this ballot names `id` as the holder
    pub fn is_won_by(&self, id: &InstanceId) -> bool {
        self.winner.as_ref() == Some(id)
    }
}

impl fmt::Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.winner {
            Some(winner) => write!(f, "{} -> {}", self.id, winner),
            None => write!(f, "{} -> nobody", self.id),
        }
    }
}
