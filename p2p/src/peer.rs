//! Peer management
//!
//! Tracks which session identities are currently connected. This is the
//! default identity oracle for batons running over the gossip network.

use baton_core::{is_live_or_composite, ConnectionTest, InstanceId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Peer information
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub identity: String,
    pub connected_at: Instant,
    pub last_seen: Instant,
}

impl PeerInfo {
    pub fn new(identity: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            identity: identity.into(),
            connected_at: now,
            last_seen: now,
        }
    }

    pub fn update_last_seen(&mut self) {
        self.last_seen = Instant::now();
    }
}

/// Peer manager for tracking connected peers
pub struct PeerManager {
    local_identity: String,
    peers: RwLock<HashMap<String, PeerInfo>>,
}

impl PeerManager {
    pub fn new(local_identity: impl Into<String>) -> Self {
        Self {
            local_identity: local_identity.into(),
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Session identity of this process
    pub fn local_identity(&self) -> &str {
        &self.local_identity
    }

    /// Add or refresh a peer
    pub fn add_peer(&self, info: PeerInfo) {
        self.peers.write().insert(info.identity.clone(), info);
    }

    /// Remove a peer
    pub fn remove_peer(&self, identity: &str) {
        self.peers.write().remove(identity);
    }

    /// Get peer info
    pub fn get_peer(&self, identity: &str) -> Option<PeerInfo> {
        self.peers.read().get(identity).cloned()
    }

    /// Update peer's last seen time
    pub fn update_last_seen(&self, identity: &str) {
        if let Some(peer) = self.peers.write().get_mut(identity) {
            peer.update_last_seen();
        }
    }

    /// Get all peers
    pub fn all_peers(&self) -> Vec<PeerInfo> {
        self.peers.read().values().cloned().collect()
    }

    /// Number of connected peers
    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Local identity plus every connected peer identity
    pub fn live_identities(&self) -> Vec<String> {
        let mut live: Vec<String> = self.peers.read().keys().cloned().collect();
        live.push(self.local_identity.clone());
        live
    }
}

impl ConnectionTest for PeerManager {
    fn is_connected(&self, id: &InstanceId) -> bool {
        let live = self.live_identities();
        is_live_or_composite(id, live.iter().map(String::as_str))
    }
}

/// Shared peer manager
pub type SharedPeerManager = Arc<PeerManager>;

/// Create a shared peer manager
pub fn create_peer_manager(local_identity: impl Into<String>) -> SharedPeerManager {
    Arc::new(PeerManager::new(local_identity))
}
