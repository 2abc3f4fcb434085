//! Gossip network transport
//!
//! [`NetworkService`] owns the libp2p swarm and runs its event loop.
//! [`NetworkHandle`] is the cloneable [`Transport`] the batons talk to; it
//! forwards subscribe/publish commands to the service and receives inbound
//! gossip through a broadcast channel.

use crate::behaviour::{BatonBehaviour, BatonBehaviourEvent};
use crate::peer::{create_peer_manager, PeerInfo, SharedPeerManager};
use crate::transport::{InboundMessage, SubscriptionTable, Transport, INBOUND_CAPACITY};
use anyhow::Result;
use async_trait::async_trait;
use baton_core::{BatonError, BatonResult, NetworkConfig};
use futures::StreamExt;
use libp2p::{gossipsub, identity::Keypair, mdns, swarm::SwarmEvent, Multiaddr, PeerId, Swarm};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Commands served by the network event loop
#[derive(Debug)]
pub enum NetworkCommand {
    Subscribe {
        topic: String,
        reply: oneshot::Sender<BatonResult<()>>,
    },
    Unsubscribe {
        topic: String,
        reply: oneshot::Sender<BatonResult<()>>,
    },
    Publish {
        topic: String,
        data: Vec<u8>,
    },
}

/// Network service for the virtual baton
pub struct NetworkService {
    swarm: Swarm<BatonBehaviour>,
    peer_manager: SharedPeerManager,
    local_peer_id: PeerId,
    subscriptions: SubscriptionTable,
    commands: mpsc::UnboundedReceiver<NetworkCommand>,
    inbound: broadcast::Sender<InboundMessage>,
}

/// Cloneable transport handle onto a running [`NetworkService`]
#[derive(Clone)]
pub struct NetworkHandle {
    local_identity: String,
    commands: mpsc::UnboundedSender<NetworkCommand>,
    inbound: broadcast::Sender<InboundMessage>,
    peer_manager: SharedPeerManager,
}

impl NetworkService {
    /// Create a new network service and its handle
    pub fn new(keypair: Keypair, config: &NetworkConfig) -> Result<(Self, NetworkHandle)> {
        let local_peer_id = keypair.public().to_peer_id();
        let behaviour = BatonBehaviour::new(
            &keypair,
            config.enable_mdns,
            Duration::from_millis(config.heartbeat_interval_ms),
        )?;

        let idle_timeout = Duration::from_secs(config.idle_connection_timeout_secs);
        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                libp2p::tcp::Config::default(),
                libp2p::noise::Config::new,
                libp2p::yamux::Config::default,
            )?
            .with_behaviour(|_| behaviour)?
            .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(idle_timeout))
            .build();

        let listen_addr: Multiaddr = config.listen_addr.parse()?;
        swarm.listen_on(listen_addr)?;

        for addr_str in &config.bootstrap_nodes {
            match addr_str.parse::<Multiaddr>() {
                Ok(addr) => {
                    info!("Connecting to bootstrap node: {}", addr);
                    if let Err(e) = swarm.dial(addr.clone()) {
                        warn!("Failed to dial {}: {}", addr, e);
                    }
                }
                Err(e) => {
                    warn!("Invalid bootstrap address {}: {}", addr_str, e);
                }
            }
        }

        let local_identity = local_peer_id.to_string();
        let peer_manager = create_peer_manager(local_identity.clone());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);

        info!("Network service created for peer {}", local_peer_id);

        let handle = NetworkHandle {
            local_identity,
            commands: command_tx,
            inbound: inbound.clone(),
            peer_manager: peer_manager.clone(),
        };

        Ok((
            Self {
                swarm,
                peer_manager,
                local_peer_id,
                subscriptions: SubscriptionTable::new(),
                commands: command_rx,
                inbound,
            },
            handle,
        ))
    }

    /// Get the local peer id
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Get the peer manager
    pub fn peer_manager(&self) -> SharedPeerManager {
        self.peer_manager.clone()
    }

    /// Run the network event loop until every handle is dropped
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event);
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("All network handles dropped, stopping network service");
                        break;
                    }
                },
            }
        }
    }

    fn handle_command(&mut self, command: NetworkCommand) {
        match command {
            NetworkCommand::Subscribe { topic, reply } => {
                let result = if self.subscriptions.acquire(&topic) {
                    self.swarm
                        .behaviour_mut()
                        .subscribe(&topic)
                        .map(|_| ())
                        .map_err(|e| {
                            self.subscriptions.release(&topic);
                            BatonError::Subscription {
                                topic: topic.clone(),
                                reason: e.to_string(),
                            }
                        })
                } else {
                    Ok(())
                };
                debug!("Subscribed to {}", topic);
                let _ = reply.send(result);
            }
            NetworkCommand::Unsubscribe { topic, reply } => {
                if self.subscriptions.release(&topic) {
                    self.swarm.behaviour_mut().unsubscribe(&topic);
                    debug!("Unsubscribed from {}", topic);
                }
                let _ = reply.send(Ok(()));
            }
            NetworkCommand::Publish { topic, data } => {
                // Gossipsub never hands our own messages back to us, but every
                // local subscriber is a participant too.
                if self.subscriptions.contains(&topic) {
                    let _ = self.inbound.send(InboundMessage {
                        topic: topic.clone(),
                        payload: data.clone(),
                        sender: self.local_peer_id.to_string(),
                    });
                }

                match self.swarm.behaviour_mut().publish(&topic, data) {
                    Ok(_) => trace!("Published on {}", topic),
                    Err(gossipsub::PublishError::InsufficientPeers) => {
                        trace!("No peers for {}, delivered locally only", topic);
                    }
                    Err(e) => warn!("Failed to publish on {}: {}", topic, e),
                }
            }
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<BatonBehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(event) => self.handle_behaviour_event(event),
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}", address);
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                info!("Peer connected: {}", peer_id);
                self.peer_manager.add_peer(PeerInfo::new(peer_id.to_string()));
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 {
                    info!("Peer disconnected: {}", peer_id);
                    self.peer_manager.remove_peer(&peer_id.to_string());
                }
            }
            _ => {}
        }
    }

    fn handle_behaviour_event(&mut self, event: BatonBehaviourEvent) {
        match event {
            BatonBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                message,
                propagation_source,
                ..
            }) => {
                let topic = message.topic.as_str().to_string();
                if !self.subscriptions.contains(&topic) {
                    return;
                }
                let sender = message.source.unwrap_or(propagation_source).to_string();
                self.peer_manager.update_last_seen(&sender);
                let _ = self.inbound.send(InboundMessage {
                    topic,
                    payload: message.data,
                    sender,
                });
            }
            BatonBehaviourEvent::Mdns(mdns::Event::Discovered(peers)) => {
                for (peer_id, addr) in peers {
                    info!("mDNS discovered peer: {} at {}", peer_id, addr);
                    if let Err(e) = self.swarm.dial(addr) {
                        warn!("Failed to dial discovered peer: {}", e);
                    }
                }
            }
            BatonBehaviourEvent::Mdns(mdns::Event::Expired(peers)) => {
                for (peer_id, _) in peers {
                    debug!("mDNS peer expired: {}", peer_id);
                }
            }
            _ => {}
        }
    }
}

impl NetworkHandle {
    /// Get the peer manager, which doubles as the identity oracle
    pub fn peer_manager(&self) -> SharedPeerManager {
        self.peer_manager.clone()
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<BatonResult<()>>) -> NetworkCommand,
    ) -> BatonResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| BatonError::ChannelClosed("network service stopped".into()))?;
        response
            .await
            .map_err(|_| BatonError::ChannelClosed("network service dropped request".into()))?
    }
}

#[async_trait]
impl Transport for NetworkHandle {
    fn local_identity(&self) -> String {
        self.local_identity.clone()
    }

    async fn subscribe(&self, topic: &str) -> BatonResult<()> {
        let topic = topic.to_string();
        self.request(|reply| NetworkCommand::Subscribe { topic, reply }).await
    }

    async fn unsubscribe(&self, topic: &str) -> BatonResult<()> {
        let topic = topic.to_string();
        self.request(|reply| NetworkCommand::Unsubscribe { topic, reply }).await
    }

    async fn send(&self, topic: &str, payload: Vec<u8>) -> BatonResult<()> {
        self.commands
            .send(NetworkCommand::Publish {
                topic: topic.to_string(),
                data: payload,
            })
            .map_err(|_| BatonError::ChannelClosed("network service stopped".into()))
    }

    fn incoming(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }
}
