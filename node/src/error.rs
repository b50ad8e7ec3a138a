use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("registry error: {0}")]
    Registry(#[from] onyx_registry::RegistryError),

    #[error("payments error: {0}")]
    Payments(#[from] onyx_payments::PaymentsError),

    #[error("type error: {0}")]
    Types(#[from] onyx_types::TypesError),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
