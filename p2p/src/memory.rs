//! In-memory transport
//!
//! Connects every transport created from the same [`MemoryNetwork`] inside a
//! single process. Loss, duplication and delay (which reorders messages) can
//! be injected to exercise the protocol against an unreliable channel.

use crate::transport::{InboundMessage, SubscriptionTable, Transport, INBOUND_CAPACITY};
use async_trait::async_trait;
use baton_core::{is_live_or_composite, BatonError, BatonResult, ConnectionTest, InstanceId};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::trace;

/// Fault injection knobs for the in-memory network
#[derive(Debug, Clone, Default)]
pub struct MemoryNetworkConfig {
    /// Probability that a delivery is silently dropped
    pub drop_probability: f64,
    /// Probability that a delivery happens twice
    pub duplicate_probability: f64,
    /// Upper bound of the random delay applied to each delivery
    pub max_delay_ms: u64,
    /// Seed for the fault generator
    pub seed: Option<u64>,
}

struct Endpoint {
    inbound: broadcast::Sender<InboundMessage>,
    subscriptions: Arc<Mutex<SubscriptionTable>>,
    connected: bool,
}

struct Hub {
    config: MemoryNetworkConfig,
    endpoints: RwLock<HashMap<String, Endpoint>>,
    rng: Mutex<StdRng>,
}

/// A process-local publish/subscribe network
#[derive(Clone)]
pub struct MemoryNetwork {
    hub: Arc<Hub>,
}

impl MemoryNetwork {
    /// Create a lossless network
    pub fn new() -> Self {
        Self::with_config(MemoryNetworkConfig::default())
    }

    pub fn with_config(config: MemoryNetworkConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            hub: Arc::new(Hub {
                config,
                endpoints: RwLock::new(HashMap::new()),
                rng: Mutex::new(rng),
            }),
        }
    }

    /// Attach a participant with the given session identity
    pub fn join(&self, identity: impl Into<String>) -> Arc<MemoryTransport> {
        let identity = identity.into();
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let subscriptions = Arc::new(Mutex::new(SubscriptionTable::new()));

        self.hub.endpoints.write().insert(
            identity.clone(),
            Endpoint {
                inbound: inbound.clone(),
                subscriptions: subscriptions.clone(),
                connected: true,
            },
        );

        Arc::new(MemoryTransport {
            identity,
            network: self.clone(),
            inbound,
            subscriptions,
        })
    }

    /// Cut a participant off: it neither sends nor receives anymore
    pub fn disconnect(&self, identity: &str) {
        if let Some(endpoint) = self.hub.endpoints.write().get_mut(identity) {
            endpoint.connected = false;
        }
    }

    /// Bring a disconnected participant back
    pub fn reconnect(&self, identity: &str) {
        if let Some(endpoint) = self.hub.endpoints.write().get_mut(identity) {
            endpoint.connected = true;
        }
    }

    /// Whether a session identity is attached and connected
    pub fn is_connected_identity(&self, identity: &str) -> bool {
        self.hub
            .endpoints
            .read()
            .get(identity)
            .map(|e| e.connected)
            .unwrap_or(false)
    }

    fn connected_identities(&self) -> Vec<String> {
        self.hub
            .endpoints
            .read()
            .iter()
            .filter(|(_, e)| e.connected)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn publish(&self, sender: &str, topic: &str, payload: Vec<u8>) {
        let endpoints = self.hub.endpoints.read();
        if !endpoints.get(sender).map(|e| e.connected).unwrap_or(false) {
            trace!("Dropping publish from disconnected {}", sender);
            return;
        }

        for endpoint in endpoints.values() {
            if !endpoint.connected || !endpoint.subscriptions.lock().contains(topic) {
                continue;
            }

            let message = InboundMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
                sender: sender.to_string(),
            };
            for delay in self.delivery_plan() {
                deliver(endpoint.inbound.clone(), message.clone(), delay);
            }
        }
    }

    /// Decide how many copies of one delivery happen, and when
    fn delivery_plan(&self) -> Vec<Duration> {
        let config = &self.hub.config;
        let mut rng = self.hub.rng.lock();

        if config.drop_probability > 0.0 && rng.gen_bool(config.drop_probability.min(1.0)) {
            return Vec::new();
        }
        let copies = if config.duplicate_probability > 0.0
            && rng.gen_bool(config.duplicate_probability.min(1.0))
        {
            2
        } else {
            1
        };

        (0..copies)
            .map(|_| {
                if config.max_delay_ms == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rng.gen_range(0..=config.max_delay_ms))
                }
            })
            .collect()
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(inbound: broadcast::Sender<InboundMessage>, message: InboundMessage, delay: Duration) {
    if delay.is_zero() {
        let _ = inbound.send(message);
        return;
    }
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = inbound.send(message);
    });
}

impl ConnectionTest for MemoryNetwork {
    fn is_connected(&self, id: &InstanceId) -> bool {
        let live = self.connected_identities();
        is_live_or_composite(id, live.iter().map(String::as_str))
    }
}

/// One participant's view of a [`MemoryNetwork`]
pub struct MemoryTransport {
    identity: String,
    network: MemoryNetwork,
    inbound: broadcast::Sender<InboundMessage>,
    subscriptions: Arc<Mutex<SubscriptionTable>>,
}

impl MemoryTransport {
    /// The network this transport is attached to
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    /// Number of distinct topics currently subscribed
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.lock().contains(topic)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_identity(&self) -> String {
        self.identity.clone()
    }

    async fn subscribe(&self, topic: &str) -> BatonResult<()> {
        if topic.is_empty() {
            return Err(BatonError::Subscription {
                topic: topic.to_string(),
                reason: "empty topic".into(),
            });
        }
        self.subscriptions.lock().acquire(topic);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> BatonResult<()> {
        self.subscriptions.lock().release(topic);
        Ok(())
    }

    async fn send(&self, topic: &str, payload: Vec<u8>) -> BatonResult<()> {
        self.network.publish(&self.identity, topic, payload);
        Ok(())
    }

    fn incoming(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }
}
