//! Ed25519 key generation.

use ed25519_dalek::SigningKey;
use onyx_types::{KeyPair, PrivateKey, PublicKey};

/// Generate a new Ed25519 key pair from the OS random source.
pub fn generate_keypair() -> KeyPair {
    let seed: [u8; 32] = rand::random();
    keypair_from_seed(&seed)
}

/// Derive a key pair deterministically from a 32-byte seed.
pub fn keypair_from_seed(seed: &[u8; 32]) -> KeyPair {
    let signing = SigningKey::from_bytes(seed);
    KeyPair {
        public: PublicKey(signing.verifying_key().to_bytes()),
        private: PrivateKey(*seed),
    }
}

/// Derive the public key from a private key.
pub fn public_from_private(private: &PrivateKey) -> PublicKey {
    let signing = SigningKey::from_bytes(&private.0);
    PublicKey(signing.verifying_key().to_bytes())
}
