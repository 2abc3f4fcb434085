//! Network behaviour for libp2p

use anyhow::anyhow;
use libp2p::{
    gossipsub::{self, IdentTopic, MessageAuthenticity, ValidationMode},
    identity::Keypair,
    mdns,
    swarm::NetworkBehaviour,
};
use std::time::Duration;

/// Combined network behaviour
#[derive(NetworkBehaviour)]
pub struct BatonBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub mdns: libp2p::swarm::behaviour::toggle::Toggle<mdns::tokio::Behaviour>,
}

impl BatonBehaviour {
    pub fn new(keypair: &Keypair, enable_mdns: bool, heartbeat: Duration) -> anyhow::Result<Self> {
        // Message ids stay the default source + sequence number: identical
        // replies from two acceptors are distinct votes and must not be merged.
        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(heartbeat)
            .validation_mode(ValidationMode::Strict)
            .build()
            .map_err(|e| anyhow!("Failed to build gossipsub config: {}", e))?;

        let gossipsub = gossipsub::Behaviour::new(
            MessageAuthenticity::Signed(keypair.clone()),
            gossipsub_config,
        )
        .map_err(|e| anyhow!("Failed to create gossipsub: {}", e))?;

        let mdns = if enable_mdns {
            Some(mdns::tokio::Behaviour::new(
                mdns::Config::default(),
                keypair.public().to_peer_id(),
            )?)
        } else {
            None
        };

        Ok(Self {
            gossipsub,
            mdns: mdns.into(),
        })
    }

    /// Subscribe to a topic
    pub fn subscribe(&mut self, topic: &str) -> Result<bool, gossipsub::SubscriptionError> {
        self.gossipsub.subscribe(&IdentTopic::new(topic))
    }

    /// Unsubscribe from a topic
    pub fn unsubscribe(&mut self, topic: &str) {
        let _ = self.gossipsub.unsubscribe(&IdentTopic::new(topic));
    }

    /// Publish a message to a topic
    pub fn publish(
        &mut self,
        topic: &str,
        data: Vec<u8>,
    ) -> Result<gossipsub::MessageId, gossipsub::PublishError> {
        self.gossipsub.publish(IdentTopic::new(topic), data)
    }
}
