//! Virtual Baton Transports
//!
//! Provides the publish/subscribe channel the election protocol runs on:
//! - A transport contract with per-recipient sub-topics
//! - An in-memory network with loss, duplication and reordering
//! - A libp2p gossipsub network with mDNS discovery
//! - A peer registry answering identity liveness

pub mod transport;
pub mod memory;
pub mod network;
pub mod behaviour;
pub mod peer;

pub use transport::*;
pub use memory::*;
pub use network::*;
pub use behaviour::*;
pub use peer::*;
