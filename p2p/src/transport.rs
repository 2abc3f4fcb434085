//! Messaging adapter contract
//!
//! A best-effort publish/subscribe channel: messages may be lost, duplicated
//! or reordered, and a sender receives its own broadcasts.

use async_trait::async_trait;
use baton_core::{BatonResult, InstanceId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the inbound fan-out channel
pub const INBOUND_CAPACITY: usize = 4096;

/// A message delivered to local subscribers
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Topic the message was published on
    pub topic: String,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Transport-level sender, not necessarily an instance id
    pub sender: String,
}

/// Publish/subscribe transport used by the election protocol
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport session identity of this process
    fn local_identity(&self) -> String;

    /// Register interest in a topic
    async fn subscribe(&self, topic: &str) -> BatonResult<()>;

    /// Drop interest in a topic
    async fn unsubscribe(&self, topic: &str) -> BatonResult<()>;

    /// Broadcast to every subscriber of `topic`
    async fn send(&self, topic: &str, payload: Vec<u8>) -> BatonResult<()>;

    /// Send to a single recipient on its distinguished sub-topic
    async fn send_to(&self, topic: &str, recipient: &InstanceId, payload: Vec<u8>) -> BatonResult<()> {
        self.send(&recipient_topic(topic, recipient), payload).await
    }

    /// Stream of every message delivered to this process
    fn incoming(&self) -> broadcast::Receiver<InboundMessage>;
}

/// Shared transport
pub type SharedTransport = Arc<dyn Transport>;

/// Per-recipient sub-topic: the topic string followed by the recipient id
pub fn recipient_topic(topic: &str, recipient: &InstanceId) -> String {
    format!("{}{}", topic, recipient)
}

/// Reference-counted topic subscriptions.
///
/// Several instances in one process may share a topic; the underlying
/// subscription lives until the last of them lets go.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    topics: HashMap<String, usize>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference; returns true if this is the first one
    pub fn acquire(&mut self, topic: &str) -> bool {
        let count = self.topics.entry(topic.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop a reference; returns true if it was the last one
    pub fn release(&mut self, topic: &str) -> bool {
        match self.topics.get_mut(topic) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.topics.remove(topic);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
