//! Virtual Baton Core Library
//!
//! Core types, traits, and configuration shared by the transport, the
//! election protocol, and the node binary.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
