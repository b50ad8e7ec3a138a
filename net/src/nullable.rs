//! Recording transport for deterministic tests.
//!
//! Never touches the network: every call is appended to a public log that
//! tests inspect. Connectivity and the peer list are controlled
//! programmatically.

use crate::transport::{PeerInfo, Transport};
use onyx_messages::{Inv, WireMessage};
use std::collections::HashSet;
use std::net::SocketAddr;

/// A [`Transport`] that records everything and sends nothing.
#[derive(Default)]
pub struct NullTransport {
    pub peers: Vec<PeerInfo>,
    pub sent: Vec<(SocketAddr, WireMessage)>,
    pub inventory: Vec<(SocketAddr, Inv)>,
    pub get_data: Vec<(SocketAddr, Vec<Inv>)>,
    pub relayed: Vec<Inv>,
    pub misbehavior: Vec<(SocketAddr, u8)>,
    pub disconnected: Vec<SocketAddr>,
    pub connect_attempts: Vec<SocketAddr>,
    /// Addresses for which `connect` should fail.
    pub unreachable: HashSet<SocketAddr>,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connected outbound peer at the given address and version.
    pub fn add_peer(&mut self, addr: SocketAddr, version: u32) {
        self.peers.push(PeerInfo {
            addr,
            version,
            inbound: false,
            servicenode_conn: false,
        });
    }

    pub fn mark_unreachable(&mut self, addr: SocketAddr) {
        self.unreachable.insert(addr);
    }

    /// Messages sent to one peer, for assertions.
    pub fn sent_to(&self, peer: SocketAddr) -> Vec<&WireMessage> {
        self.sent
            .iter()
            .filter(|(addr, _)| *addr == peer)
            .map(|(_, msg)| msg)
            .collect()
    }

    pub fn clear(&mut self) {
        self.sent.clear();
        self.inventory.clear();
        self.get_data.clear();
        self.relayed.clear();
        self.misbehavior.clear();
        self.disconnected.clear();
        self.connect_attempts.clear();
    }
}

impl Transport for NullTransport {
    fn send(&mut self, peer: SocketAddr, msg: WireMessage) {
        self.sent.push((peer, msg));
    }

    fn push_inventory(&mut self, peer: SocketAddr, inv: Inv) {
        self.inventory.push((peer, inv));
    }

    fn push_get_data(&mut self, peer: SocketAddr, invs: Vec<Inv>) {
        self.get_data.push((peer, invs));
    }

    fn relay(&mut self, inv: Inv) {
        self.relayed.push(inv);
    }

    fn misbehave(&mut self, peer: SocketAddr, score: u8) {
        self.misbehavior.push((peer, score));
    }

    fn disconnect(&mut self, peer: SocketAddr) {
        self.disconnected.push(peer);
    }

    fn connect(&mut self, addr: SocketAddr) -> bool {
        self.connect_attempts.push(addr);
        !self.unreachable.contains(&addr)
    }

    fn connected_peers(&self) -> Vec<PeerInfo> {
        self.peers.clone()
    }
}
