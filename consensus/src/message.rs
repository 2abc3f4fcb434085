//! Wire messages and topic layout for the election protocol
//!
//! Each operation gets its own sub-channel under the baton's channel key.
//! `prepare` and `accept` are broadcast; `promise`, `nack` and (optimized)
//! `accepted` go to a per-recipient sub-topic.

use baton_core::{Ballot, BallotId, BatonName, BatonResult, InstanceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix shared by every baton channel
pub const CHANNEL_PREFIX: &str = "virtual-baton";

/// Protocol operations, one sub-channel each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Prepare,
    Promise,
    Accept,
    Accepted,
    Nack,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Prepare => "prepare",
            Operation::Promise => "promise",
            Operation::Accept => "accept",
            Operation::Accepted => "accepted",
            Operation::Nack => "nack",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic strings for one baton instance
#[derive(Debug, Clone)]
pub struct Topics {
    channel_key: String,
    instance_id: InstanceId,
    use_optimizations: bool,
}

impl Topics {
    pub fn new(baton_name: &BatonName, instance_id: &InstanceId, use_optimizations: bool) -> Self {
        Self {
            channel_key: format!("{}:{}", CHANNEL_PREFIX, baton_name),
            instance_id: instance_id.clone(),
            use_optimizations,
        }
    }

    /// Broadcast sub-channel for an operation
    pub fn broadcast(&self, operation: Operation) -> String {
        format!("{}:{}", self.channel_key, operation)
    }

    /// Point-to-point sub-channel of `recipient` for an operation
    pub fn direct(&self, operation: Operation, recipient: &InstanceId) -> String {
        format!("{}:{}{}", self.channel_key, operation, recipient)
    }

    /// Every topic this instance listens on, with the operation it carries
    pub fn subscriptions(&self) -> Vec<(String, Operation)> {
        let accepted = if self.use_optimizations {
            self.direct(Operation::Accepted, &self.instance_id)
        } else {
            self.broadcast(Operation::Accepted)
        };
        vec![
            (self.broadcast(Operation::Prepare), Operation::Prepare),
            (self.broadcast(Operation::Accept), Operation::Accept),
            (self.direct(Operation::Promise, &self.instance_id), Operation::Promise),
            (self.direct(Operation::Nack, &self.instance_id), Operation::Nack),
            (accepted, Operation::Accepted),
        ]
    }
}

/// Phase 1a: ask acceptors to promise a ballot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prepare {
    pub ballot: BallotId,
}

/// Phase 1b: an acceptor promises not to accept anything lower.
///
/// `accepted` is the acceptor's last accepted ballot; its winner is withheld
/// when the identity oracle says that winner is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promise {
    pub ballot: BallotId,
    pub acceptor_id: InstanceId,
    pub accepted: Option<Ballot>,
}

/// Phase 2b: an acceptor accepted a ballot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    pub ballot: Ballot,
    pub acceptor_id: InstanceId,
}

/// Refusal of a prepare or accept that is not higher than what the
/// acceptor already promised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nack {
    pub ballot: BallotId,
    pub acceptor_id: InstanceId,
    pub promised: Option<BallotId>,
}

/// Message types for the election protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatonMessage {
    Prepare(Prepare),
    Promise(Promise),
    /// Phase 2a: ask acceptors to accept a ballot
    Accept(Ballot),
    Accepted(Accepted),
    Nack(Nack),
}

impl BatonMessage {
    pub fn to_bytes(&self) -> BatonResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }

    pub fn operation(&self) -> Operation {
        match self {
            BatonMessage::Prepare(_) => Operation::Prepare,
            BatonMessage::Promise(_) => Operation::Promise,
            BatonMessage::Accept(_) => Operation::Accept,
            BatonMessage::Accepted(_) => Operation::Accepted,
            BatonMessage::Nack(_) => Operation::Nack,
        }
    }
}
