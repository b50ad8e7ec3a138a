//! Payment-election votes.

use crate::{push_var_bytes, MsgHash};
use onyx_crypto::{sha256d, sign_message, verify_signature};
use onyx_types::{Outpoint, PrivateKey, PublicKey, Script, Signature};
use serde::{Deserialize, Serialize};

/// A top-10 node's signed nomination of the payee for a future block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentVote {
    pub voter: Outpoint,
    pub block_height: u32,
    pub payee: Script,
    pub sig: Signature,
}

impl PaymentVote {
    pub fn new(voter: Outpoint, block_height: u32, payee: Script) -> Self {
        Self {
            voter,
            block_height,
            payee,
            sig: Signature::ZERO,
        }
    }

    /// Identity hash over voter, height, and payee.
    pub fn hash(&self) -> MsgHash {
        MsgHash::new(sha256d(&self.hash_preimage()))
    }

    /// Full canonical wire encoding.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = self.hash_preimage();
        push_var_bytes(&mut buf, self.sig.as_bytes());
        buf
    }

    fn hash_preimage(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(80);
        buf.extend_from_slice(&self.voter.canonical_bytes());
        buf.extend_from_slice(&self.block_height.to_le_bytes());
        push_var_bytes(&mut buf, self.payee.as_bytes());
        buf
    }

    /// Preimage for the voter's service-key signature.
    pub fn signing_message(&self) -> String {
        format!(
            "{}{}{}",
            self.voter.to_short_string(),
            self.block_height,
            self.payee.to_hex()
        )
    }

    pub fn sign(&mut self, service_key: &PrivateKey) {
        self.sig = sign_message(self.signing_message().as_bytes(), service_key);
    }

    pub fn verify_sig(&self, service_pubkey: &PublicKey) -> bool {
        verify_signature(self.signing_message().as_bytes(), &self.sig, service_pubkey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onyx_crypto::keypair_from_seed;
    use onyx_types::TxHash;

    fn vote() -> PaymentVote {
        PaymentVote::new(
            Outpoint::new(TxHash::new([4u8; 32]), 2),
            120_000,
            Script::from_bytes(vec![0x76, 0xa9, 0x14]),
        )
    }

    #[test]
    fn sign_and_verify() {
        let kp = keypair_from_seed(&[8u8; 32]);
        let mut v = vote();
        v.sign(&kp.private);
        assert!(v.verify_sig(&kp.public));
    }

    #[test]
    fn payee_is_covered_by_signature() {
        let kp = keypair_from_seed(&[8u8; 32]);
        let mut v = vote();
        v.sign(&kp.private);
        v.payee = Script::from_bytes(vec![0x51]);
        assert!(!v.verify_sig(&kp.public));
    }

    #[test]
    fn hash_distinguishes_heights_and_payees() {
        let a = vote();
        let mut b = vote();
        b.block_height += 1;
        assert_ne!(a.hash(), b.hash());

        let mut c = vote();
        c.payee = Script::from_bytes(vec![0x52]);
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn hash_ignores_signature() {
        let kp = keypair_from_seed(&[8u8; 32]);
        let unsigned = vote();
        let mut signed = vote();
        signed.sign(&kp.private);
        assert_eq!(unsigned.hash(), signed.hash());
    }
}
