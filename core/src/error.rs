//! Error types for the virtual baton

use thiserror::Error;

/// Main error type for the virtual baton
#[derive(Error, Debug)]
pub enum BatonError {
    // ============ Configuration Errors ============
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("A virtual baton must specify a baton name")]
    MissingBatonName,

    // ============ Transport Errors ============
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Subscription to {topic} failed: {reason}")]
    Subscription { topic: String, reason: String },

    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Message serialization failed: {0}")]
    Serialization(String),

    #[error("Message deserialization failed: {0}")]
    Deserialization(String),

    // ============ Lifecycle Errors ============
    #[error("Baton {0} has been unloaded")]
    Unloaded(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    // ============ General Errors ============
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for BatonError {
    fn from(err: std::io::Error) -> Self {
        BatonError::Transport(err.to_string())
    }
}

impl From<bincode::Error> for BatonError {
    fn from(err: bincode::Error) -> Self {
        BatonError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for BatonError {
    fn from(err: serde_json::Error) -> Self {
        BatonError::Serialization(err.to_string())
    }
}
