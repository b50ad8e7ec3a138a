//! Node configuration with TOML file support.

use crate::NodeError;
use onyx_types::NetworkId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the Onyx daemon's service-node subsystem.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Which network to connect to.
    #[serde(default = "default_network")]
    pub network: NetworkId,

    /// Data directory for registry/payment snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Port to listen on for P2P connections.
    #[serde(default = "default_p2p_port")]
    pub port: u16,

    /// Maximum number of peer connections.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    /// Whether this daemon operates a service node.
    #[serde(default)]
    pub service_node: bool,

    /// External `ip:port` the service node is reachable at.
    #[serde(default)]
    pub service_node_address: Option<String>,

    /// Hex-encoded 32-byte service key seed.
    #[serde(default)]
    pub service_node_privkey: Option<String>,

    /// Collateral `txid:vout` to use; any suitable wallet output when unset.
    #[serde(default)]
    pub collateral_outpoint: Option<String>,

    /// Remote service nodes controlled from this wallet, for the
    /// `start-alias`/`start-all` commands.
    #[serde(default, rename = "service_nodes")]
    pub aliases: Vec<ServiceNodeAlias>,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// One `[[service_nodes]]` entry: a remote node this wallet controls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceNodeAlias {
    pub alias: String,
    /// Remote `ip:port`.
    pub address: String,
    /// Hex-encoded 32-byte service key seed.
    pub privkey: String,
    /// Collateral `txid:vout`.
    pub collateral: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_network() -> NetworkId {
    NetworkId::Main
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./onyx_data")
}

fn default_p2p_port() -> u16 {
    NetworkId::Main.default_port()
}

fn default_max_peers() -> usize {
    50
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn alias(&self, name: &str) -> Option<&ServiceNodeAlias> {
        self.aliases.iter().find(|a| a.alias == name)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            data_dir: default_data_dir(),
            port: default_p2p_port(),
            max_peers: default_max_peers(),
            service_node: false,
            service_node_address: None,
            service_node_privkey: None,
            collateral_outpoint: None,
            aliases: Vec::new(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}
