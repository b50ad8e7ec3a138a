//! The transport trait consumed by every gossip path.

use onyx_messages::{Inv, WireMessage};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// What the subsystem knows about a connected peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    /// Peer protocol version from its handshake.
    pub version: u32,
    /// Whether the peer connected to us.
    pub inbound: bool,
    /// Temporary service-node-only connections (verify exchanges and the
    /// like); never used for sync.
    pub servicenode_conn: bool,
}

/// The network operations the subsystem performs.
///
/// Implemented by the daemon's connection manager; all calls are
/// fire-and-forget from the subsystem's point of view. Implementations may
/// block on I/O, so callers avoid holding the registry lock across calls
/// where feasible.
pub trait Transport {
    /// Unicast a message to a connected peer.
    fn send(&mut self, peer: SocketAddr, msg: WireMessage);

    /// Announce an inventory item to one peer.
    fn push_inventory(&mut self, peer: SocketAddr, inv: Inv);

    /// Request inventory items from one peer.
    fn push_get_data(&mut self, peer: SocketAddr, invs: Vec<Inv>);

    /// Announce an inventory item to every connected peer.
    fn relay(&mut self, inv: Inv);

    /// Report misbehavior; the transport bans peers that accumulate enough.
    fn misbehave(&mut self, peer: SocketAddr, score: u8);

    /// Drop the connection to free the slot.
    fn disconnect(&mut self, peer: SocketAddr);

    /// Open (or confirm) a connection to an address. Returns `false` when
    /// the address is unreachable.
    fn connect(&mut self, addr: SocketAddr) -> bool;

    /// Snapshot of currently connected peers.
    fn connected_peers(&self) -> Vec<PeerInfo>;
}
