use thiserror::Error;

/// Failures surfaced by the identity layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key error: {0}")]
    Key(String),

    #[error("signing error: {0}")]
    Sign(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
