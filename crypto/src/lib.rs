//! Cryptographic primitives for the Onyx service-node subsystem:
//! SHA-256d hashing, 256-bit score arithmetic, and Ed25519 signing.

pub mod hash;
pub mod keys;
pub mod score;
pub mod sign;

pub use hash::{sha256d, sha256d_multi};
pub use keys::{generate_keypair, keypair_from_seed, public_from_private};
pub use score::U256;
pub use sign::{sign_message, verify_signature};
