//! Node runtime around one baton instance

use baton_consensus::{BatonHandle, BatonStatus};
use baton_core::{BatonName, BatonResult, NodeConfig};
use baton_p2p::SharedPeerManager;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Node status report
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub name: String,
    pub peer_id: String,
    pub peer_count: usize,
    pub times_elected: u64,
    pub times_released: u64,
    pub baton: BatonStatus,
}

/// Node runtime driving the baton on behalf of the operator
pub struct NodeRuntime {
    config: NodeConfig,
    baton: BatonHandle,
    peer_manager: SharedPeerManager,
    times_elected: AtomicU64,
    times_released: AtomicU64,
}

impl NodeRuntime {
    pub fn new(config: NodeConfig, baton: BatonHandle, peer_manager: SharedPeerManager) -> Arc<Self> {
        Arc::new(Self {
            config,
            baton,
            peer_manager,
            times_elected: AtomicU64::new(0),
            times_released: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn baton(&self) -> &BatonHandle {
        &self.baton
    }

    pub fn peer_count(&self) -> usize {
        self.peer_manager.peer_count()
    }

    pub fn times_elected(&self) -> u64 {
        self.times_elected.load(Ordering::Relaxed)
    }

    pub fn times_released(&self) -> u64 {
        self.times_released.load(Ordering::Relaxed)
    }

    fn hold_period(&self) -> Option<Duration> {
        self.config.hold_ms.map(Duration::from_millis)
    }

    /// Claim the baton.
    ///
    /// With a hold period configured, the node releases the baton once it
    /// has held it that long and claims it again a hold period later.
    pub fn claim(self: &Arc<Self>) {
        let elected = self.clone();
        let released = self.clone();
        self.baton.claim(
            move |name| elected.on_elected(name),
            move |name| released.on_released(name),
        );
    }

    pub fn release(&self) {
        self.baton.release();
    }

    pub async fn status(&self) -> BatonResult<NodeStatus> {
        Ok(NodeStatus {
            name: self.config.name.clone(),
            peer_id: self.peer_manager.local_identity().to_string(),
            peer_count: self.peer_count(),
            times_elected: self.times_elected(),
            times_released: self.times_released(),
            baton: self.baton.status().await?,
        })
    }

    fn on_elected(self: &Arc<Self>, name: &BatonName) {
        let count = self.times_elected.fetch_add(1, Ordering::Relaxed) + 1;
        info!("{} now holds baton {} (election #{})", self.config.name, name, count);

        if let Some(hold) = self.hold_period() {
            let runtime = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(hold).await;
                runtime.release_tenure(count);
            });
        }
    }

    /// Release only if the baton is still held from election number `tenure`
    fn release_tenure(&self, tenure: u64) {
        if self.times_elected() != tenure {
            debug!("{}: hold period of election #{} expired after re-election", self.config.name, tenure);
            return;
        }
        self.release();
    }

    fn on_released(self: &Arc<Self>, name: &BatonName) {
        self.times_released.fetch_add(1, Ordering::Relaxed);
        info!("{} released baton {}", self.config.name, name);

        if let Some(hold) = self.hold_period() {
            let runtime = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(hold).await;
                runtime.claim();
            });
        }
    }
}
