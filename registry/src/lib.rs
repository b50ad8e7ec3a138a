//! The gossiped directory of service nodes.
//!
//! [`Registry`] holds every known node, ingests announces, pings, and
//! verify messages, answers list requests, runs the per-node lifecycle
//! checks, and drives the proof-of-service audit. All mutation is
//! serialized by the caller holding one lock around the registry value;
//! the chain oracle and transport are passed into each call.

pub mod audit;
pub mod election;
pub mod entry;
pub mod registry;
pub mod store;

mod error;

pub use audit::LocalSigner;
pub use election::DisqualifyReason;
pub use entry::{NodeInfo, ServiceNodeEntry};
pub use error::RegistryError;
pub use registry::Registry;
pub use store::{load_registry, save_registry};

use onyx_types::{NetworkId, Outpoint, PublicKey, Script};

/// Outcome of ingesting one gossip message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestResult {
    /// Applied; the message changed our state and was relayed.
    Accepted,
    /// A duplicate we already hold; nothing to do.
    AcceptedSeen,
    /// Not applied. `dos > 0` asks the transport to raise the source
    /// peer's misbehavior score by that many points.
    Rejected { dos: u8, reason: RejectReason },
}

impl IngestResult {
    pub fn rejected(dos: u8, reason: RejectReason) -> Self {
        Self::Rejected { dos, reason }
    }

    pub fn dos(&self) -> u8 {
        match self {
            Self::Rejected { dos, .. } => *dos,
            _ => 0,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted | Self::AcceptedSeen)
    }
}

/// Why a message was rejected. Protocol errors never surface to the
/// operator; these feed logs and DoS scoring only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    InvalidAddress,
    FutureTime,
    OutdatedProtocol,
    MalformedKeys,
    BadSignature,
    /// Older than what we already hold; silent drop.
    Stale,
    PoseBanned,
    CollateralKeyMismatch,
    /// Transient: the UTXO (or a block) is not visible yet.
    CollateralUnavailable,
    CollateralWrongValue,
    CollateralImmature,
    SigTimePredatesCollateral,
    UnknownNode,
    UnknownBlock,
    PingTooOld,
    PingTooEarly,
    NodeNotRunning,
    OwnAnnounce,
    WrongLocalVersion,
    /// Messages of this class are ignored until the relevant sync stage
    /// completes.
    NotSynced,
    /// Vote height outside the accepted window around the tip.
    OutOfWindow,
    /// The voter already voted for this height.
    AlreadyVoted,
    /// The voter does not rank high enough to vote.
    NotInTopRanks,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidAddress => "invalid address",
            Self::FutureTime => "timestamp too far in the future",
            Self::OutdatedProtocol => "outdated protocol",
            Self::MalformedKeys => "malformed key material",
            Self::BadSignature => "bad signature",
            Self::Stale => "stale",
            Self::PoseBanned => "pose banned",
            Self::CollateralKeyMismatch => "collateral key mismatch",
            Self::CollateralUnavailable => "collateral unavailable",
            Self::CollateralWrongValue => "collateral wrong value",
            Self::CollateralImmature => "collateral immature",
            Self::SigTimePredatesCollateral => "signed before collateral matured",
            Self::UnknownNode => "unknown node",
            Self::UnknownBlock => "unknown block",
            Self::PingTooOld => "ping references a block too far back",
            Self::PingTooEarly => "pinged again too early",
            Self::NodeNotRunning => "node needs a new announce",
            Self::OwnAnnounce => "own announce",
            Self::WrongLocalVersion => "local node runs a different protocol version",
            Self::NotSynced => "not synced",
            Self::OutOfWindow => "outside the vote window",
            Self::AlreadyVoted => "already voted at this height",
            Self::NotInTopRanks => "voter not in the top ranks",
        }
    }
}

/// Per-call environment for the gossip paths.
#[derive(Clone, Debug)]
pub struct GossipContext {
    pub now: i64,
    pub network: NetworkId,
    /// Minimum protocol for payment participation (spork dependent).
    pub min_payment_proto: u32,
    /// The local service node's collateral, when the operator runs one.
    pub our_outpoint: Option<Outpoint>,
    /// The local service node's service key.
    pub our_service_pubkey: Option<PublicKey>,
}

impl GossipContext {
    pub fn is_our_service_key(&self, key: &PublicKey) -> bool {
        self.our_service_pubkey.as_ref() == Some(key)
    }
}

/// Seam to the vote-derived payment schedule, implemented by the payments
/// component. A trait keeps the crates from depending on each other; the
/// original resolved the same cycle with global singletons.
pub trait PaymentsView {
    /// Whether the recorded payee set for `height` contains `payee` with
    /// at least `min_votes` votes.
    fn block_has_payee(&self, height: u32, payee: &Script, min_votes: usize) -> bool;

    /// Whether `payee` already won a vote round within the scheduling
    /// look-ahead above `tip` (excluding `not_height`).
    fn is_scheduled(&self, payee: &Script, not_height: u32, tip: u32) -> bool;
}

/// A payments view that knows nothing (used before votes sync).
pub struct NoPayments;

impl PaymentsView for NoPayments {
    fn block_has_payee(&self, _height: u32, _payee: &Script, _min_votes: usize) -> bool {
        false
    }
    fn is_scheduled(&self, _payee: &Script, _not_height: u32, _tip: u32) -> bool {
        false
    }
}
