use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("persisted registry has incompatible version: {0}")]
    IncompatibleVersion(String),

    #[error("persisted registry is corrupt: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
