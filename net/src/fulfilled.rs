//! Per-(peer, request-kind) rate limiting.
//!
//! Gossip requests are expensive to serve, so each kind is answered or
//! issued at most once per peer within its cool-down. Keys are free-form
//! strings ("spork-sync", "list-sync", "verify-request", ...).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FulfilledRequests {
    /// (peer, key) → expiry time.
    entries: HashMap<(SocketAddr, String), i64>,
}

impl FulfilledRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `peer` has an unexpired fulfilled entry for `key`.
    pub fn has(&self, peer: SocketAddr, key: &str, now: i64) -> bool {
        self.entries
            .get(&(peer, key.to_string()))
            .is_some_and(|expiry| now < *expiry)
    }

    /// Record a fulfilled request expiring after `ttl` seconds.
    pub fn add(&mut self, peer: SocketAddr, key: &str, now: i64, ttl: i64) {
        self.entries.insert((peer, key.to_string()), now + ttl);
    }

    /// Forget one entry (used when a sync stage restarts).
    pub fn remove(&mut self, peer: SocketAddr, key: &str) {
        self.entries.remove(&(peer, key.to_string()));
    }

    /// Forget every entry for the given key across all peers.
    pub fn remove_all_for_key(&mut self, key: &str) {
        self.entries.retain(|(_, k), _| k != key);
    }

    /// Drop expired entries.
    pub fn prune(&mut self, now: i64) {
        self.entries.retain(|_, expiry| now < *expiry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
