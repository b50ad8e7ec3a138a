//! Collateral outpoint — the canonical identity of a service node.

use crate::hash::TxHash;
use crate::TypesError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A transaction output reference `(txid, vout)`.
///
/// The outpoint of the locked collateral UTXO identifies a service node
/// everywhere in the subsystem: registry keys, vote attribution, rank
/// calculation, and signing preimages all use it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Outpoint {
    pub txid: TxHash,
    pub vout: u32,
}

impl Outpoint {
    pub const ZERO: Self = Self {
        txid: TxHash::ZERO,
        vout: 0,
    };

    pub fn new(txid: TxHash, vout: u32) -> Self {
        Self { txid, vout }
    }

    pub fn is_zero(&self) -> bool {
        self.txid.is_zero() && self.vout == 0
    }

    /// Abbreviated form used in signing preimages and logs: the first
    /// 16 hex chars of the txid plus the output index.
    ///
    /// Every peer must produce the same string for the same outpoint, so
    /// this format is part of the signature scheme and must not change.
    pub fn to_short_string(&self) -> String {
        let full = self.txid.to_string();
        format!("{}-{}", &full[..16], self.vout)
    }

    /// Canonical wire encoding: `txid(32) || vout(u32 LE)`.
    pub fn canonical_bytes(&self) -> [u8; 36] {
        let mut out = [0u8; 36];
        out[..32].copy_from_slice(self.txid.as_bytes());
        out[32..].copy_from_slice(&self.vout.to_le_bytes());
        out
    }
}

impl fmt::Debug for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Outpoint({})", self.to_short_string())
    }
}

impl fmt::Display for Outpoint {
    /// Full `txid:vout` form used by config files.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl FromStr for Outpoint {
    type Err = TypesError;

    /// Parse the `txid:vout` form used by config files.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid_hex, vout_str) = s
            .rsplit_once(':')
            .ok_or_else(|| TypesError::InvalidOutpoint(s.to_string()))?;
        let raw = hex::decode(txid_hex).map_err(|_| TypesError::InvalidOutpoint(s.to_string()))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| TypesError::InvalidOutpoint(s.to_string()))?;
        let vout = vout_str
            .parse()
            .map_err(|_| TypesError::InvalidOutpoint(s.to_string()))?;
        Ok(Self::new(TxHash::new(bytes), vout))
    }
}
