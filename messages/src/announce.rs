//! The announce (broadcast) message that introduces or refreshes a node.

use crate::ping::Ping;
use crate::{push_var_bytes, MsgHash};
use onyx_crypto::{sha256d, sign_message, verify_signature};
use onyx_types::{Outpoint, PrivateKey, PublicKey, Signature};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// A signed self-description of a service node.
///
/// Carries the full key material plus the freshest ping. Accepting one
/// either creates a registry entry or refreshes an existing entry when its
/// `sig_time` is strictly newer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Announce {
    pub outpoint: Outpoint,
    pub addr: SocketAddr,
    pub collateral_pubkey: PublicKey,
    pub service_pubkey: PublicKey,
    pub sig: Signature,
    pub sig_time: i64,
    pub protocol_version: u32,
    pub last_ping: Option<Ping>,
    /// Set on announces replayed through the recovery path; bypasses the
    /// monotone sig-time rule. Never sent on the wire.
    #[serde(skip)]
    pub recovery: bool,
}

impl Announce {
    /// Identity hash: outpoint, collateral key, and sig time. A node
    /// re-announcing at a later time produces a fresh inventory item; the
    /// embedded ping does not change identity.
    pub fn hash(&self) -> MsgHash {
        let mut buf = Vec::with_capacity(76);
        buf.extend_from_slice(&self.outpoint.canonical_bytes());
        buf.extend_from_slice(self.collateral_pubkey.as_bytes());
        buf.extend_from_slice(&self.sig_time.to_le_bytes());
        MsgHash::new(sha256d(&buf))
    }

    /// Full canonical wire encoding.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(300);
        buf.extend_from_slice(&self.outpoint.canonical_bytes());
        push_var_bytes(&mut buf, self.addr.to_string().as_bytes());
        buf.extend_from_slice(self.collateral_pubkey.as_bytes());
        buf.extend_from_slice(self.service_pubkey.as_bytes());
        push_var_bytes(&mut buf, self.sig.as_bytes());
        buf.extend_from_slice(&self.sig_time.to_le_bytes());
        buf.extend_from_slice(&self.protocol_version.to_le_bytes());
        match &self.last_ping {
            Some(ping) => {
                buf.push(1);
                buf.extend_from_slice(&ping.canonical_bytes());
            }
            None => buf.push(0),
        }
        buf
    }

    /// Preimage for the collateral-key signature.
    pub fn signing_message(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.addr,
            self.sig_time,
            self.collateral_pubkey.short_id(),
            self.service_pubkey.short_id(),
            self.protocol_version
        )
    }

    /// Sign under the collateral key, stamping `sig_time`.
    pub fn sign(&mut self, collateral_key: &PrivateKey, now: i64) {
        self.sig_time = now;
        self.sig = sign_message(self.signing_message().as_bytes(), collateral_key);
    }

    pub fn verify_sig(&self) -> bool {
        verify_signature(
            self.signing_message().as_bytes(),
            &self.sig,
            &self.collateral_pubkey,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onyx_crypto::keypair_from_seed;
    use onyx_types::{BlockHash, TxHash};

    fn announce() -> Announce {
        let collateral = keypair_from_seed(&[1u8; 32]);
        let service = keypair_from_seed(&[2u8; 32]);
        Announce {
            outpoint: Outpoint::new(TxHash::new([7u8; 32]), 0),
            addr: "1.2.3.4:8585".parse().unwrap(),
            collateral_pubkey: collateral.public,
            service_pubkey: service.public,
            sig: Signature::ZERO,
            sig_time: 0,
            protocol_version: 90025,
            last_ping: Some(Ping::new(
                Outpoint::new(TxHash::new([7u8; 32]), 0),
                BlockHash::new([8u8; 32]),
                1_000_000,
            )),
            recovery: false,
        }
    }

    #[test]
    fn sign_stamps_time_and_verifies() {
        let collateral = keypair_from_seed(&[1u8; 32]);
        let mut ann = announce();
        ann.sign(&collateral.private, 1_000_000);
        assert_eq!(ann.sig_time, 1_000_000);
        assert!(ann.verify_sig());
    }

    #[test]
    fn tampered_addr_breaks_signature() {
        let collateral = keypair_from_seed(&[1u8; 32]);
        let mut ann = announce();
        ann.sign(&collateral.private, 1_000_000);
        ann.addr = "5.6.7.8:8585".parse().unwrap();
        assert!(!ann.verify_sig());
    }

    #[test]
    fn hash_changes_with_sig_time() {
        let mut a = announce();
        a.sig_time = 1_000_000;
        let mut b = announce();
        b.sig_time = 1_000_001;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn hash_ignores_embedded_ping() {
        let mut a = announce();
        a.sig_time = 1_000_000;
        let mut b = announce();
        b.sig_time = 1_000_000;
        b.last_ping = None;
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn recovery_flag_not_serialized() {
        let mut ann = announce();
        ann.recovery = true;
        let bytes = bincode::serialize(&ann).unwrap();
        let decoded: Announce = bincode::deserialize(&bytes).unwrap();
        assert!(!decoded.recovery);
    }
}
