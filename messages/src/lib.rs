//! Wire messages for service-node gossip.
//!
//! Every message sent between Onyx peers for this subsystem is one of the
//! payloads here, wrapped in [`WireMessage`]. Transport framing (bincode)
//! is byte-stable, so serialize → deserialize → re-serialize round-trips
//! identically; message *identity* (inventory hashes, seen caches) instead
//! uses hand-written canonical little-endian encodings fed to SHA-256d, so
//! a hash never depends on the framing layer.

pub mod announce;
pub mod envelope;
pub mod ping;
pub mod verify;
pub mod vote;

pub use announce::Announce;
pub use envelope::{Inv, InvKind, WireMessage};
pub use ping::Ping;
pub use verify::Verify;
pub use vote::PaymentVote;

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte message identity hash (SHA-256d over canonical bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MsgHash([u8; 32]);

impl MsgHash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for MsgHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MsgHash(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for MsgHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Append `bytes` to `buf` with a little-endian u32 length prefix.
pub(crate) fn push_var_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}
