//! Fundamental types for the Onyx service-node subsystem.
//!
//! This crate defines the core types shared across every other crate in the
//! workspace: outpoints, hashes, keys, amounts, payee scripts, network
//! parameters, lifecycle states, and the protocol constants.

pub mod amount;
pub mod error;
pub mod hash;
pub mod keys;
pub mod network;
pub mod outpoint;
pub mod params;
pub mod script;
pub mod state;
pub mod time;

pub use amount::Amount;
pub use error::TypesError;
pub use hash::{BlockHash, TxHash};
pub use keys::{KeyPair, PrivateKey, PublicKey, Signature};
pub use network::NetworkId;
pub use outpoint::Outpoint;
pub use script::Script;
pub use state::{ActivationState, LifecycleState};
pub use time::unix_now;
