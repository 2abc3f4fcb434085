//! Configuration types for the virtual baton

use crate::error::BatonError;
use crate::traits::BatonResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Nominal election timeout and recheck period in milliseconds
pub const DEFAULT_PERIOD_MS: u64 = 500;

/// Per-instance deviation applied to unset periods
pub const DEFAULT_PERIOD_VARIABILITY: f64 = 0.2;

/// Configuration of one baton instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatonConfig {
    /// Name of the resource being arbitrated
    pub baton_name: String,

    /// Identity of this instance; defaults to the transport session identity
    pub instance_id: Option<String>,

    /// Election timeout in milliseconds; jittered around 500 when unset
    pub election_timeout_ms: Option<u64>,

    /// Holder liveness check period in milliseconds; jittered around 500 when unset
    pub recheck_interval_ms: Option<u64>,

    /// Send `accepted` straight to the proposer and update the local learner
    /// in place instead of broadcasting
    pub use_optimizations: bool,
}

impl Default for BatonConfig {
    fn default() -> Self {
        Self {
            baton_name: String::new(),
            instance_id: None,
            election_timeout_ms: None,
            recheck_interval_ms: None,
            use_optimizations: true,
        }
    }
}

impl BatonConfig {
    pub fn new(baton_name: impl Into<String>) -> Self {
        Self {
            baton_name: baton_name.into(),
            ..Default::default()
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Periods are kept in whole milliseconds; a nonzero fraction rounds up
    pub fn with_election_timeout(mut self, timeout: Duration) -> Self {
        self.election_timeout_ms = Some(millis_ceil(timeout));
        self
    }

    pub fn with_recheck_interval(mut self, interval: Duration) -> Self {
        self.recheck_interval_ms = Some(millis_ceil(interval));
        self
    }

    pub fn with_optimizations(mut self, enabled: bool) -> Self {
        self.use_optimizations = enabled;
        self
    }

    /// Check the configuration before an instance is built from it
    pub fn validate(&self) -> BatonResult<()> {
        if self.baton_name.is_empty() {
            return Err(BatonError::MissingBatonName);
        }
        if matches!(self.instance_id.as_deref(), Some("")) {
            return Err(BatonError::InvalidConfig("instance id must not be empty".into()));
        }
        if self.election_timeout_ms == Some(0) {
            return Err(BatonError::InvalidConfig("election timeout must be positive".into()));
        }
        if self.recheck_interval_ms == Some(0) {
            return Err(BatonError::InvalidConfig("recheck interval must be positive".into()));
        }
        Ok(())
    }
}

fn millis_ceil(duration: Duration) -> u64 {
    let millis = duration.as_millis() as u64;
    if Duration::from_millis(millis) < duration {
        millis + 1
    } else {
        millis
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listen address for P2P
    pub listen_addr: String,

    /// Bootstrap nodes
    pub bootstrap_nodes: Vec<String>,

    /// Enable mDNS for local discovery
    pub enable_mdns: bool,

    /// Idle connection timeout in seconds
    pub idle_connection_timeout_secs: u64,

    /// Gossipsub heartbeat in milliseconds
    pub heartbeat_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/30433".to_string(),
            bootstrap_nodes: vec![],
            enable_mdns: true,
            idle_connection_timeout_secs: 60,
            heartbeat_interval_ms: 1000,
        }
    }
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Enable HTTP API
    pub enabled: bool,

    /// API listen address
    pub listen_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:8480".to_string(),
        }
    }
}

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// Logging level
    pub log_level: String,

    /// Network configuration
    pub network: NetworkConfig,

    /// Baton configuration
    pub baton: BatonConfig,

    /// API configuration
    pub api: ApiConfig,

    /// Claim the baton as soon as the node starts
    pub claim_on_start: bool,

    /// Release after holding this long, then claim again
    pub hold_ms: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "baton-node".to_string(),
            log_level: "info".to_string(),
            network: NetworkConfig::default(),
            baton: BatonConfig::default(),
            api: ApiConfig::default(),
            claim_on_start: false,
            hold_ms: None,
        }
    }
}

impl NodeConfig {
    /// Load a node configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> BatonResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> BatonResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| BatonError::InvalidConfig(format!("invalid node config: {}", e)))
    }

    pub fn to_json(&self) -> BatonResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
