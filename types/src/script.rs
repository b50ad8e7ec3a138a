//! Payee scripts.
//!
//! The coinbase pays service nodes through a standard pay-to-pubkey-hash
//! output. A script is opaque bytes to this subsystem; the only structure we
//! rely on is the 25-byte P2PKH template derived from a collateral key.

use crate::keys::PublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a standard P2PKH script.
pub const P2PKH_SCRIPT_LEN: usize = 25;

/// An output script identifying a payee.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script(Vec<u8>);

impl Script {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Standard pay-to-pubkey-hash script for a collateral key:
    /// `OP_DUP OP_HASH160 <20-byte key id> OP_EQUALVERIFY OP_CHECKSIG`.
    pub fn p2pkh(key: &PublicKey) -> Self {
        let mut bytes = Vec::with_capacity(P2PKH_SCRIPT_LEN);
        bytes.push(0x76); // OP_DUP
        bytes.push(0xa9); // OP_HASH160
        bytes.push(20);
        bytes.extend_from_slice(&key.as_bytes()[..20]);
        bytes.push(0x88); // OP_EQUALVERIFY
        bytes.push(0xac); // OP_CHECKSIG
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Hex form used in vote signing preimages; identical on every peer.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p2pkh_has_standard_length() {
        let script = Script::p2pkh(&PublicKey([7u8; 32]));
        assert_eq!(script.len(), P2PKH_SCRIPT_LEN);
    }

    #[test]
    fn p2pkh_is_deterministic_per_key() {
        let a = Script::p2pkh(&PublicKey([1u8; 32]));
        let b = Script::p2pkh(&PublicKey([1u8; 32]));
        let c = Script::p2pkh(&PublicKey([2u8; 32]));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn p2pkh_template_bytes() {
        let script = Script::p2pkh(&PublicKey([9u8; 32]));
        let bytes = script.as_bytes();
        assert_eq!(bytes[0], 0x76);
        assert_eq!(bytes[1], 0xa9);
        assert_eq!(bytes[2], 20);
        assert_eq!(bytes[23], 0x88);
        assert_eq!(bytes[24], 0xac);
    }
}
