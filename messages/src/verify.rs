//! The proof-of-service challenge message.
//!
//! One struct, three roles distinguished by which signatures are present:
//! an unsigned *request*, a *reply* carrying `sig1`, and a relayed
//! *broadcast* carrying both signatures plus the two outpoints involved.

use crate::{push_var_bytes, MsgHash};
use onyx_crypto::sha256d;
use onyx_types::{BlockHash, Outpoint, Signature};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verify {
    /// Outpoint of the node being verified (filled at broadcast).
    pub vin1: Outpoint,
    /// Outpoint of the auditing node (filled at broadcast).
    pub vin2: Outpoint,
    /// Address under audit.
    pub addr: SocketAddr,
    pub nonce: u32,
    pub block_height: u32,
    /// Replier's signature over `addr || nonce || block hash`.
    pub sig1: Signature,
    /// Auditor's signature over the broadcast preimage.
    pub sig2: Signature,
}

impl Verify {
    /// A fresh unsigned request for `addr` at the given height.
    pub fn request(addr: SocketAddr, nonce: u32, block_height: u32) -> Self {
        Self {
            vin1: Outpoint::ZERO,
            vin2: Outpoint::ZERO,
            addr,
            nonce,
            block_height,
            sig1: Signature::ZERO,
            sig2: Signature::ZERO,
        }
    }

    pub fn is_request(&self) -> bool {
        self.sig1.is_empty()
    }

    pub fn is_reply(&self) -> bool {
        !self.sig1.is_empty() && self.sig2.is_empty()
    }

    pub fn is_broadcast(&self) -> bool {
        !self.sig1.is_empty() && !self.sig2.is_empty()
    }

    /// Identity hash over every field.
    pub fn hash(&self) -> MsgHash {
        MsgHash::new(sha256d(&self.canonical_bytes()))
    }

    /// Full canonical wire encoding.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(240);
        buf.extend_from_slice(&self.vin1.canonical_bytes());
        buf.extend_from_slice(&self.vin2.canonical_bytes());
        push_var_bytes(&mut buf, self.addr.to_string().as_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.block_height.to_le_bytes());
        push_var_bytes(&mut buf, self.sig1.as_bytes());
        push_var_bytes(&mut buf, self.sig2.as_bytes());
        buf
    }

    /// Preimage signed by the replier (the node proving it owns `addr`).
    pub fn reply_message(&self, block_hash: &BlockHash) -> String {
        format!("{}{}{}", self.addr, self.nonce, block_hash.to_hex())
    }

    /// Preimage signed by the auditor when relaying the verified result.
    pub fn broadcast_message(&self, block_hash: &BlockHash) -> String {
        format!(
            "{}{}{}{}{}",
            self.addr,
            self.nonce,
            block_hash.to_hex(),
            self.vin1.to_short_string(),
            self.vin2.to_short_string()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onyx_types::TxHash;

    fn verify() -> Verify {
        Verify::request("1.2.3.4:8585".parse().unwrap(), 12345, 500)
    }

    #[test]
    fn role_detection() {
        let mut v = verify();
        assert!(v.is_request());
        assert!(!v.is_reply());

        v.sig1 = Signature([1u8; 64]);
        assert!(v.is_reply());
        assert!(!v.is_request());
        assert!(!v.is_broadcast());

        v.sig2 = Signature([2u8; 64]);
        assert!(v.is_broadcast());
        assert!(!v.is_reply());
    }

    #[test]
    fn hash_covers_signatures() {
        let a = verify();
        let mut b = verify();
        b.sig1 = Signature([1u8; 64]);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn broadcast_message_includes_outpoints() {
        let mut v = verify();
        v.vin1 = Outpoint::new(TxHash::new([1u8; 32]), 0);
        v.vin2 = Outpoint::new(TxHash::new([2u8; 32]), 1);
        let hash = BlockHash::new([3u8; 32]);
        let msg = v.broadcast_message(&hash);
        assert!(msg.starts_with(&v.reply_message(&hash)));
        assert!(msg.contains(&v.vin1.to_short_string()));
        assert!(msg.contains(&v.vin2.to_short_string()));
    }
}
