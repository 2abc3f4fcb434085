//! Virtual Baton Node
//!
//! Node binary that combines all components:
//! - libp2p gossip transport
//! - One baton instance
//! - HTTP API

mod api;
mod node;
mod runtime;

pub use api::*;
pub use node::*;
pub use runtime::*;
