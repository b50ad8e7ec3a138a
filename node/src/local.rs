//! The local node's activation state machine.
//!
//! Walks the operator's own service node from collateral discovery through
//! announce broadcast and the periodic heart-beat. A node can start two
//! ways: *remote* (a controller wallet broadcast our announce and we find
//! ourselves in the registry) or *local* (this wallet holds the collateral
//! and builds the announce itself).

use crate::wallet::Wallet;
use crate::{NodeConfig, NodeError};
use onyx_chain::ChainView;
use onyx_crypto::keypair_from_seed;
use onyx_messages::{Announce, Inv, InvKind, Ping};
use onyx_net::Transport;
use onyx_registry::{GossipContext, LocalSigner, Registry};
use onyx_sync::SyncState;
use onyx_types::params::{MIN_PING_SECONDS, PING_CHAIN_DEPTH, PROTOCOL_VERSION};
use onyx_types::{ActivationState, Amount, KeyPair, NetworkId, Outpoint, Signature};
use std::net::SocketAddr;

/// How this daemon's service node is operated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Unknown,
    /// A controller wallet elsewhere announced us.
    Remote,
    /// This wallet holds the collateral and announces itself.
    Local,
}

/// The local service node.
pub struct LocalNode {
    pub state: ActivationState,
    pub kind: NodeKind,
    enabled: bool,
    network: NetworkId,
    service_keys: Option<KeyPair>,
    configured_collateral: Option<Outpoint>,
    /// Our collateral once activation resolves it.
    pub outpoint: Outpoint,
    /// External service address.
    pub addr: Option<SocketAddr>,
    pub pinger_enabled: bool,
    not_capable_reason: String,
}

impl LocalNode {
    pub fn from_config(config: &NodeConfig) -> Result<Self, NodeError> {
        let service_keys = match &config.service_node_privkey {
            None => None,
            Some(hex_seed) => {
                let raw = hex::decode(hex_seed)
                    .map_err(|_| NodeError::Config("invalid service_node_privkey".into()))?;
                let seed: [u8; 32] = raw
                    .try_into()
                    .map_err(|_| NodeError::Config("service_node_privkey must be 32 bytes".into()))?;
                Some(keypair_from_seed(&seed))
            }
        };
        if config.service_node && service_keys.is_none() {
            return Err(NodeError::Config(
                "service_node = true requires service_node_privkey".into(),
            ));
        }
        let addr = match &config.service_node_address {
            None => None,
            Some(s) => Some(
                s.parse()
                    .map_err(|_| NodeError::Config(format!("invalid service_node_address {s}")))?,
            ),
        };
        let configured_collateral = match &config.collateral_outpoint {
            None => None,
            Some(s) => Some(s.parse()?),
        };

        Ok(Self {
            state: ActivationState::Initial,
            kind: NodeKind::Unknown,
            enabled: config.service_node,
            network: config.network,
            service_keys,
            configured_collateral,
            outpoint: Outpoint::ZERO,
            addr,
            pinger_enabled: false,
            not_capable_reason: String::new(),
        })
    }

    pub fn is_started(&self) -> bool {
        self.state == ActivationState::Started
    }

    pub fn service_pubkey(&self) -> Option<onyx_types::PublicKey> {
        self.service_keys.as_ref().map(|kp| kp.public)
    }

    /// Signing identity for verify exchanges and payment votes; present
    /// once started.
    pub fn signer(&self) -> Option<LocalSigner<'_>> {
        if !self.is_started() {
            return None;
        }
        let keys = self.service_keys.as_ref()?;
        Some(LocalSigner {
            outpoint: self.outpoint,
            addr: self.addr?,
            service_pubkey: keys.public,
            service_key: &keys.private,
        })
    }

    /// Operator-facing status line.
    pub fn status(&self) -> String {
        match self.state {
            ActivationState::Initial => "Node just started, not yet activated".to_string(),
            ActivationState::SyncInProcess => {
                "Sync in progress. Must wait until sync is complete to start service node"
                    .to_string()
            }
            ActivationState::InputTooNew => format!(
                "Service node input must have at least {} confirmations",
                self.network.min_collateral_confirmations()
            ),
            ActivationState::NotCapable => {
                format!("Not capable service node: {}", self.not_capable_reason)
            }
            ActivationState::Started => "Service node successfully started".to_string(),
        }
    }

    fn not_capable(&mut self, reason: String) {
        tracing::warn!(reason = %reason, "service node not capable");
        self.not_capable_reason = reason;
        self.state = ActivationState::NotCapable;
    }

    /// Run one activation pass. Called on every maintenance tick.
    pub fn manage(
        &mut self,
        registry: &mut Registry,
        chain: &dyn ChainView,
        ctx: &GossipContext,
        sync: &SyncState,
        transport: &mut dyn Transport,
        wallet: &mut dyn Wallet,
        now: i64,
    ) {
        if !self.enabled {
            return;
        }

        if self.network != NetworkId::Regtest && !sync.is_chain_synced() {
            self.state = ActivationState::SyncInProcess;
            tracing::debug!(status = %self.status(), "waiting for chain sync");
            return;
        }
        if self.state == ActivationState::SyncInProcess {
            self.state = ActivationState::Initial;
        }

        if self.kind == NodeKind::Unknown {
            self.manage_initial(transport, wallet);
        }

        match self.kind {
            NodeKind::Remote => self.manage_remote(registry, chain, ctx, sync),
            NodeKind::Local => {
                // Try the remote path first so a restarted local node picks
                // its registry entry back up without a fresh broadcast.
                self.manage_remote(registry, chain, ctx, sync);
                if self.state != ActivationState::Started {
                    self.manage_local(registry, chain, sync, transport, wallet, now);
                }
            }
            NodeKind::Unknown => {}
        }

        self.send_ping(registry, chain, transport, now);
    }

    /// Resolve the external address, verify port discipline, test
    /// reachability, and decide remote vs local operation.
    fn manage_initial(&mut self, transport: &mut dyn Transport, wallet: &mut dyn Wallet) {
        let Some(addr) = self.addr else {
            self.not_capable(
                "Can't detect valid external address. Set service_node_address in the config."
                    .to_string(),
            );
            return;
        };

        if self.network != NetworkId::Regtest && !addr.is_ipv4() {
            self.not_capable("Service nodes must use an IPv4 address".to_string());
            return;
        }
        if !self.network.valid_node_port(addr.port()) {
            self.not_capable(format!(
                "Invalid port {} for the {} network",
                addr.port(),
                self.network.as_str()
            ));
            return;
        }

        tracing::debug!(addr = %addr, "checking inbound connection to ourselves");
        if !transport.connect(addr) {
            self.not_capable(format!("Could not connect to {addr}"));
            return;
        }

        // Default to remote operation.
        self.kind = NodeKind::Remote;

        // A local collateral switches us to local operation.
        if wallet.is_locked() {
            tracing::info!("wallet is locked; staying in remote mode");
            return;
        }
        if wallet.balance() < Amount::collateral() {
            tracing::info!(balance = %wallet.balance(), "wallet below collateral; staying in remote mode");
            return;
        }
        if wallet.collateral_output(self.configured_collateral).is_some() {
            self.kind = NodeKind::Local;
        }
    }

    /// Look for our own entry in the registry and adopt it.
    fn manage_remote(
        &mut self,
        registry: &mut Registry,
        chain: &dyn ChainView,
        ctx: &GossipContext,
        sync: &SyncState,
    ) {
        let Some(keys) = &self.service_keys else {
            self.not_capable("No service key configured".to_string());
            return;
        };
        let service_pubkey = keys.public;
        registry.force_check_by_service_key(&service_pubkey, chain, ctx, sync);

        let Some(info) = registry.find_by_service_key(&service_pubkey) else {
            self.not_capable("Service node not in the registry".to_string());
            return;
        };
        if info.protocol_version != PROTOCOL_VERSION {
            self.not_capable("Invalid protocol version".to_string());
            return;
        }
        if Some(info.addr) != self.addr {
            self.not_capable(
                "Broadcast IP doesn't match our external address. Issue a new broadcast if \
                 this node's IP changed recently."
                    .to_string(),
            );
            return;
        }
        if !info.state.valid_for_auto_start() {
            self.not_capable(format!("Service node in {} state", info.state.as_str()));
            return;
        }

        if self.state != ActivationState::Started {
            tracing::info!(node = %info.outpoint.to_short_string(), "service node started");
            self.outpoint = info.outpoint;
            self.addr = Some(info.addr);
            self.pinger_enabled = true;
            self.state = ActivationState::Started;
        }
    }

    /// Build, sign, and register our own announce from the wallet's
    /// collateral.
    fn manage_local(
        &mut self,
        registry: &mut Registry,
        chain: &dyn ChainView,
        sync: &SyncState,
        transport: &mut dyn Transport,
        wallet: &mut dyn Wallet,
        now: i64,
    ) {
        if self.state == ActivationState::Started {
            return;
        }
        let Some(output) = wallet.collateral_output(self.configured_collateral) else {
            return;
        };
        let Some(tip) = chain.tip_height() else {
            return;
        };
        let Some(utxo) = chain.utxo(&output.outpoint) else {
            return;
        };

        let confirmations = tip.saturating_sub(utxo.height) + 1;
        let required = self.network.min_collateral_confirmations();
        if confirmations < required {
            self.state = ActivationState::InputTooNew;
            self.not_capable_reason =
                format!("{} - {confirmations} confirmations", self.status());
            tracing::warn!(confirmations, required, "collateral too young");
            return;
        }

        // Never spend the collateral by accident.
        wallet.lock_coin(output.outpoint);

        let Some(keys) = &self.service_keys else {
            self.not_capable("No service key configured".to_string());
            return;
        };
        let Some(addr) = self.addr else {
            return;
        };
        let Some(announce) =
            build_announce(output.outpoint, addr, &output.keypair, keys, chain, now)
        else {
            self.not_capable("Error creating service node broadcast".to_string());
            return;
        };

        self.outpoint = output.outpoint;
        self.pinger_enabled = true;
        self.state = ActivationState::Started;

        tracing::info!(node = %output.outpoint.to_short_string(), "registering local service node");
        registry.register_local_announce(&announce, now, sync);
        transport.relay(Inv::new(InvKind::Announce, announce.hash()));
    }

    /// Emit a heart-beat, at most once per ping cadence.
    pub fn send_ping(
        &mut self,
        registry: &mut Registry,
        chain: &dyn ChainView,
        transport: &mut dyn Transport,
        now: i64,
    ) -> bool {
        if !self.pinger_enabled {
            return false;
        }
        let Some(keys) = &self.service_keys else {
            return false;
        };

        if !registry.has(&self.outpoint) {
            self.not_capable("Service node not in the registry".to_string());
            return false;
        }

        let Some(tip) = chain.tip_height() else {
            return false;
        };
        if tip < PING_CHAIN_DEPTH {
            return false;
        }
        let Some(block_hash) = chain.block_hash_at(tip - PING_CHAIN_DEPTH) else {
            return false;
        };

        let mut ping = Ping::new(self.outpoint, block_hash, now);
        ping.sign(&keys.private);

        if registry.is_pinged_within(&self.outpoint, MIN_PING_SECONDS, ping.sig_time) {
            tracing::debug!("too early to send a ping");
            return false;
        }

        tracing::info!(node = %self.outpoint.to_short_string(), "relaying ping");
        let hash = ping.hash();
        registry.set_local_ping(ping);
        transport.relay(Inv::new(InvKind::Ping, hash));
        true
    }
}

/// Build and sign a complete announce for a collateral we control.
pub fn build_announce(
    outpoint: Outpoint,
    addr: SocketAddr,
    collateral: &KeyPair,
    service: &KeyPair,
    chain: &dyn ChainView,
    now: i64,
) -> Option<Announce> {
    let tip = chain.tip_height()?;
    if tip < PING_CHAIN_DEPTH {
        return None;
    }
    let block_hash = chain.block_hash_at(tip - PING_CHAIN_DEPTH)?;

    let mut ping = Ping::new(outpoint, block_hash, now);
    ping.sign(&service.private);

    let mut ann = Announce {
        outpoint,
        addr,
        collateral_pubkey: collateral.public,
        service_pubkey: service.public,
        sig: Signature::ZERO,
        sig_time: now,
        protocol_version: PROTOCOL_VERSION,
        last_ping: Some(ping),
        recovery: false,
    };
    ann.sign(&collateral.private, now);
    Some(ann)
}
