use thiserror::Error;

/// Errors that can occur in the makroq communication layer.
#[derive(Debug, Error)]
pub enum CommError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timeout after {0:?}")]
    Timeout(std::time::Duration),
}
