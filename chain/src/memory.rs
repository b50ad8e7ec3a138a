//! Deterministic in-memory chain for component tests.
//!
//! Returns programmatically controlled values and never touches disk or
//! network. Blocks get synthetic hashes derived from their height so every
//! test run sees the same chain.

use crate::view::{ChainView, Tx, Utxo};
use onyx_types::{BlockHash, Outpoint};
use std::collections::HashMap;

/// An in-memory [`ChainView`] implementation.
pub struct MemoryChain {
    tip: Option<u32>,
    block_times: HashMap<u32, i64>,
    utxos: HashMap<Outpoint, Utxo>,
    coinbases: HashMap<u32, Tx>,
    /// Base timestamp for blocks without an explicit time.
    genesis_time: i64,
    /// Seconds between consecutive blocks without explicit times.
    block_interval: i64,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self {
            tip: None,
            block_times: HashMap::new(),
            utxos: HashMap::new(),
            coinbases: HashMap::new(),
            genesis_time: 1_000_000,
            block_interval: 150,
        }
    }

    /// Create a chain with `tip + 1` blocks (heights `0..=tip`).
    pub fn with_tip(tip: u32) -> Self {
        let mut chain = Self::new();
        chain.tip = Some(tip);
        chain
    }

    pub fn set_tip(&mut self, tip: u32) {
        self.tip = Some(tip);
    }

    pub fn set_genesis_time(&mut self, time: i64) {
        self.genesis_time = time;
    }

    pub fn set_block_time(&mut self, height: u32, time: i64) {
        self.block_times.insert(height, time);
    }

    pub fn add_utxo(&mut self, outpoint: Outpoint, utxo: Utxo) {
        self.utxos.insert(outpoint, utxo);
    }

    pub fn spend_utxo(&mut self, outpoint: &Outpoint) {
        self.utxos.remove(outpoint);
    }

    pub fn set_coinbase(&mut self, height: u32, tx: Tx) {
        self.coinbases.insert(height, tx);
    }
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainView for MemoryChain {
    fn tip_height(&self) -> Option<u32> {
        self.tip
    }

    fn block_hash_at(&self, height: u32) -> Option<BlockHash> {
        if height > self.tip? {
            return None;
        }
        // Synthetic but unique per height: the height spread across the
        // first bytes, nonzero everywhere else.
        let mut bytes = [0xcdu8; 32];
        bytes[..4].copy_from_slice(&height.to_le_bytes());
        Some(BlockHash::new(bytes))
    }

    fn height_of(&self, hash: &BlockHash) -> Option<u32> {
        let mut height_bytes = [0u8; 4];
        height_bytes.copy_from_slice(&hash.as_bytes()[..4]);
        let height = u32::from_le_bytes(height_bytes);
        // Only hashes this chain could have produced are known.
        if hash.as_bytes()[4..] == [0xcdu8; 28] && height <= self.tip? {
            Some(height)
        } else {
            None
        }
    }

    fn block_time_at(&self, height: u32) -> Option<i64> {
        if height > self.tip? {
            return None;
        }
        Some(
            self.block_times
                .get(&height)
                .copied()
                .unwrap_or(self.genesis_time + height as i64 * self.block_interval),
        )
    }

    fn utxo(&self, outpoint: &Outpoint) -> Option<Utxo> {
        self.utxos.get(outpoint).cloned()
    }

    fn coinbase_at(&self, height: u32) -> Option<Tx> {
        self.coinbases.get(&height).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onyx_types::{Amount, Script, TxHash};

    #[test]
    fn empty_chain_has_no_tip() {
        let chain = MemoryChain::new();
        assert_eq!(chain.tip_height(), None);
        assert_eq!(chain.block_hash_at(0), None);
    }

    #[test]
    fn block_hashes_are_deterministic_and_unique() {
        let chain = MemoryChain::with_tip(100);
        assert_eq!(chain.block_hash_at(5), chain.block_hash_at(5));
        assert_ne!(chain.block_hash_at(5), chain.block_hash_at(6));
        assert_eq!(chain.block_hash_at(101), None);
    }

    #[test]
    fn block_times_follow_interval() {
        let chain = MemoryChain::with_tip(10);
        let t0 = chain.block_time_at(0).unwrap();
        let t1 = chain.block_time_at(1).unwrap();
        assert_eq!(t1 - t0, 150);
    }

    #[test]
    fn explicit_block_time_overrides() {
        let mut chain = MemoryChain::with_tip(10);
        chain.set_block_time(3, 999);
        assert_eq!(chain.block_time_at(3), Some(999));
    }

    #[test]
    fn utxo_add_and_spend() {
        let mut chain = MemoryChain::with_tip(10);
        let op = Outpoint::new(TxHash::new([1u8; 32]), 0);
        chain.add_utxo(
            op,
            Utxo {
                value: Amount::collateral(),
                script: Script::from_bytes(vec![1]),
                height: 2,
            },
        );
        assert!(chain.utxo(&op).is_some());
        chain.spend_utxo(&op);
        assert!(chain.utxo(&op).is_none());
    }
}
