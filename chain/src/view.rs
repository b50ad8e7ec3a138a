//! The chain oracle trait and the transaction types it serves.

use onyx_types::{Amount, BlockHash, Outpoint, Script};
use serde::{Deserialize, Serialize};

/// An unspent transaction output as reported by the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub value: Amount,
    pub script: Script,
    /// Height of the block that created this output.
    pub height: u32,
}

/// A transaction output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Amount,
    pub script: Script,
}

/// A transaction, reduced to what payment validation needs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub outputs: Vec<TxOut>,
}

impl Tx {
    pub fn total_out(&self) -> Amount {
        self.outputs
            .iter()
            .fold(Amount::ZERO, |acc, out| acc + out.value)
    }
}

/// Read-only view of the active chain.
///
/// Every method may return `None` to mean "not available right now" —
/// unknown heights, missing UTXOs, or the underlying store being busy.
/// Callers treat `None` as transient: no peer is penalized and cached
/// messages are dropped so redelivery retries the lookup.
pub trait ChainView {
    /// Height of the chain tip, if a tip exists.
    fn tip_height(&self) -> Option<u32>;

    /// Hash of the block at `height`.
    fn block_hash_at(&self, height: u32) -> Option<BlockHash>;

    /// Height of a known block hash on the active chain.
    fn height_of(&self, hash: &BlockHash) -> Option<u32>;

    /// Timestamp of the block at `height`.
    fn block_time_at(&self, height: u32) -> Option<i64>;

    /// Look up an unspent output. `None` means missing or spent.
    fn utxo(&self, outpoint: &Outpoint) -> Option<Utxo>;

    /// The coinbase transaction of the block at `height`.
    fn coinbase_at(&self, height: u32) -> Option<Tx>;
}

impl ChainView for Box<dyn ChainView> {
    fn tip_height(&self) -> Option<u32> {
        (**self).tip_height()
    }
    fn block_hash_at(&self, height: u32) -> Option<BlockHash> {
        (**self).block_hash_at(height)
    }
    fn height_of(&self, hash: &BlockHash) -> Option<u32> {
        (**self).height_of(hash)
    }
    fn block_time_at(&self, height: u32) -> Option<i64> {
        (**self).block_time_at(height)
    }
    fn utxo(&self, outpoint: &Outpoint) -> Option<Utxo> {
        (**self).utxo(outpoint)
    }
    fn coinbase_at(&self, height: u32) -> Option<Tx> {
        (**self).coinbase_at(height)
    }
}
