use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentsError {
    #[error("persisted payment data has incompatible version: {0}")]
    IncompatibleVersion(String),

    #[error("persisted payment data is corrupt: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
