//! Network seam for the service-node subsystem.
//!
//! The peer-to-peer transport itself is out of scope; this crate defines
//! the narrow interface the subsystem consumes — unicast sends, inventory
//! relay, misbehavior reporting, peer enumeration — plus the fulfilled-
//! request rate limiter and the consumed feature flags. [`NullTransport`]
//! is a recording implementation for deterministic tests.

pub mod fulfilled;
pub mod nullable;
pub mod sporks;
pub mod transport;

pub use fulfilled::FulfilledRequests;
pub use nullable::NullTransport;
pub use sporks::SporkFlags;
pub use transport::{PeerInfo, Transport};
