//! Network selection and per-network policy.

use serde::{Deserialize, Serialize};

/// Which Onyx network the daemon runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    Main,
    Testnet,
    Regtest,
}

impl NetworkId {
    /// Default P2P port for this network.
    ///
    /// Port discipline: on mainnet a service node must use exactly this
    /// port; on any other network it must NOT use the mainnet port.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Main => 8585,
            Self::Testnet => 18585,
            Self::Regtest => 28585,
        }
    }

    /// Minimum confirmations required on the collateral UTXO.
    pub fn min_collateral_confirmations(&self) -> u32 {
        match self {
            Self::Main | Self::Testnet => 15,
            Self::Regtest => 1,
        }
    }

    /// Whether a service-node address passes network-level validation.
    ///
    /// Mainnet/testnet require a routable public IPv4 address; regtest
    /// accepts anything so component tests can use loopback.
    pub fn valid_node_port(&self, port: u16) -> bool {
        let mainnet_port = NetworkId::Main.default_port();
        match self {
            Self::Main => port == mainnet_port,
            _ => port != mainnet_port,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }
}
