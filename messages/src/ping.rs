//! The service-node heart-beat.

use crate::{push_var_bytes, MsgHash};
use onyx_crypto::{sha256d, sign_message, verify_signature};
use onyx_types::{BlockHash, Outpoint, PrivateKey, PublicKey, Signature};
use serde::{Deserialize, Serialize};

/// A signed liveness proof.
///
/// The block hash must reference `tip - 12` at the signer's view of the
/// chain; receivers reject pings whose referenced block has fallen more
/// than 24 blocks behind their own tip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub outpoint: Outpoint,
    pub block_hash: BlockHash,
    pub sig_time: i64,
    pub sig: Signature,
}

impl Ping {
    /// Build an unsigned ping for the given collateral at the given chain view.
    pub fn new(outpoint: Outpoint, block_hash: BlockHash, sig_time: i64) -> Self {
        Self {
            outpoint,
            block_hash,
            sig_time,
            sig: Signature::ZERO,
        }
    }

    /// Identity hash: outpoint and sig time, so a re-signed ping at a new
    /// time is a new inventory item.
    pub fn hash(&self) -> MsgHash {
        let mut buf = Vec::with_capacity(44);
        buf.extend_from_slice(&self.outpoint.canonical_bytes());
        buf.extend_from_slice(&self.sig_time.to_le_bytes());
        MsgHash::new(sha256d(&buf))
    }

    /// Full canonical wire encoding.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(150);
        buf.extend_from_slice(&self.outpoint.canonical_bytes());
        buf.extend_from_slice(self.block_hash.as_bytes());
        buf.extend_from_slice(&self.sig_time.to_le_bytes());
        push_var_bytes(&mut buf, self.sig.as_bytes());
        buf
    }

    /// Preimage for the service-key signature.
    pub fn signing_message(&self) -> String {
        format!(
            "{}{}{}",
            self.outpoint.to_short_string(),
            self.block_hash.to_hex(),
            self.sig_time
        )
    }

    /// Sign under the node's service key.
    pub fn sign(&mut self, service_key: &PrivateKey) {
        self.sig = sign_message(self.signing_message().as_bytes(), service_key);
    }

    pub fn verify_sig(&self, service_pubkey: &PublicKey) -> bool {
        verify_signature(self.signing_message().as_bytes(), &self.sig, service_pubkey)
    }
}
