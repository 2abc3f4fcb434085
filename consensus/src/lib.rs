//! Virtual Baton Election Protocol
//!
//! Decentralized mutual exclusion over a best-effort pub/sub channel:
//! - Single-decree Paxos per baton, one ballot at a time
//! - Every instance is proposer, acceptor and learner
//! - Quorum sized from an estimate of live acceptors
//! - Election and holder-recheck watchdogs for liveness

pub mod message;
pub mod quorum;
pub mod acceptor;
pub mod proposer;
pub mod learner;
pub mod watchdog;
pub mod engine;
pub mod baton;

#[cfg(test)]
mod sim;

pub use message::*;
pub use quorum::*;
pub use acceptor::*;
pub use proposer::*;
pub use learner::*;
pub use watchdog::*;
pub use engine::*;
pub use baton::*;
