//! Top-level wire envelope and inventory vectors.

use crate::{Announce, MsgHash, PaymentVote, Ping, Verify};
use onyx_types::Outpoint;
use serde::{Deserialize, Serialize};

/// Every subsystem message sent between peers is wrapped in this enum.
/// The variant names correspond to the protocol strings in the legacy
/// network format (`MNANNOUNCE`, `MNPING`, `DSEG`, ...).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WireMessage {
    /// Introduce or refresh a service node.
    Announce(Announce),
    /// Heart-beat.
    Ping(Ping),
    /// Request the full node list (`None`) or a single entry.
    DsegRequest(Option<Outpoint>),
    /// Proof-of-service challenge (request / reply / broadcast).
    Verify(Verify),
    /// Request payment votes; the count is the requester's storage window.
    PaymentSync(i32),
    /// A payment-election vote.
    PaymentVote(PaymentVote),
    /// Terminator telling the requester how many items a sync stage sent.
    SyncStatusCount { stage: i32, count: i32 },
    /// Request the current feature flags.
    GetSporks,
}

/// Inventory item kinds announced between peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvKind {
    Announce,
    Ping,
    PaymentVote,
    PaymentBlock,
    Verify,
}

/// An inventory vector: "I have this item, ask me for it".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Inv {
    pub kind: InvKind,
    pub hash: MsgHash,
}

impl Inv {
    pub fn new(kind: InvKind, hash: MsgHash) -> Self {
        Self { kind, hash }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_bincode() {
        let msg = WireMessage::PaymentSync(5000);
        let bytes = bincode::serialize(&msg).unwrap();
        let decoded: WireMessage = bincode::deserialize(&bytes).unwrap();
        match decoded {
            WireMessage::PaymentSync(n) => assert_eq!(n, 5000),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn reserialization_is_byte_identical() {
        let msg = WireMessage::SyncStatusCount { stage: 2, count: 17 };
        let first = bincode::serialize(&msg).unwrap();
        let decoded: WireMessage = bincode::deserialize(&first).unwrap();
        let second = bincode::serialize(&decoded).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn dseg_full_list_uses_none() {
        let msg = WireMessage::DsegRequest(None);
        let bytes = bincode::serialize(&msg).unwrap();
        let decoded: WireMessage = bincode::deserialize(&bytes).unwrap();
        assert!(matches!(decoded, WireMessage::DsegRequest(None)));
    }
}
