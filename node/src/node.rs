//! Full node implementation

use crate::api::start_api_server;
use crate::runtime::NodeRuntime;
use baton_consensus::Baton;
use baton_core::NodeConfig;
use baton_p2p::NetworkService;
use libp2p::identity::Keypair;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

/// Baton node: one gossip network, one baton instance, an optional HTTP API
pub struct BatonNode {
    config: NodeConfig,
    keypair: Keypair,
}

impl BatonNode {
    pub fn new(config: NodeConfig, keypair: Keypair) -> Self {
        Self { config, keypair }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Run the node until Ctrl-C, then unload the baton
    pub async fn start(self) -> anyhow::Result<()> {
        info!("Starting baton node {}...", self.config.name);

        let (service, transport) = NetworkService::new(self.keypair, &self.config.network)?;
        let peer_manager = service.peer_manager();
        info!("Peer ID: {}", service.local_peer_id());
        let network_handle = tokio::spawn(service.run());

        let baton = Baton::spawn(
            self.config.baton.clone(),
            Arc::new(transport),
            peer_manager.clone(),
        )
        .await?;
        info!("Baton {} loaded as instance {}", baton.name(), baton.instance_id());

        let runtime = NodeRuntime::new(self.config.clone(), baton.handle(), peer_manager);
        if self.config.claim_on_start {
            runtime.claim();
        }

        let api_handle = if self.config.api.enabled {
            let api_runtime = runtime.clone();
            let api_addr = self.config.api.listen_addr.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = start_api_server(api_runtime, &api_addr).await {
                    error!("API server error: {}", e);
                }
            }))
        } else {
            None
        };

        info!("Node started successfully");

        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, stopping node...");
            }
            Err(e) => {
                error!("Error waiting for shutdown signal: {}", e);
            }
        }

        if let Some(handle) = api_handle {
            handle.abort();
        }
        baton.unload().await;
        network_handle.abort();

        info!("Node stopped");

        Ok(())
    }
}

/// Node builder for easier configuration
pub struct NodeBuilder {
    config: NodeConfig,
    keypair: Option<Keypair>,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            keypair: None,
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn keypair(mut self, keypair: Keypair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    /// Name the baton, keeping the rest of its configuration
    pub fn baton(mut self, name: &str) -> Self {
        self.config.baton.baton_name = name.to_string();
        self
    }

    pub fn instance_id(mut self, id: &str) -> Self {
        self.config.baton.instance_id = Some(id.to_string());
        self
    }

    pub fn claim_on_start(mut self) -> Self {
        self.config.claim_on_start = true;
        self
    }

    pub fn hold_for(mut self, hold: Duration) -> Self {
        self.config.hold_ms = Some(hold.as_millis() as u64);
        self
    }

    pub fn api_addr(mut self, addr: &str) -> Self {
        self.config.api.listen_addr = addr.to_string();
        self
    }

    pub fn disable_api(mut self) -> Self {
        self.config.api.enabled = false;
        self
    }

    pub fn p2p_addr(mut self, addr: &str) -> Self {
        self.config.network.listen_addr = addr.to_string();
        self
    }

    pub fn bootstrap(mut self, addr: &str) -> Self {
        self.config.network.bootstrap_nodes.push(addr.to_string());
        self
    }

    pub fn build(self) -> BatonNode {
        let keypair = self.keypair.unwrap_or_else(Keypair::generate_ed25519);
        BatonNode::new(self.config, keypair)
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
