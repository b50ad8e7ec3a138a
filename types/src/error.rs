use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("invalid outpoint: {0}")]
    InvalidOutpoint(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid network name: {0}")]
    InvalidNetwork(String),
}
