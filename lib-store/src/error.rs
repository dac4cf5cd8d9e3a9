use thiserror::Error;

/// Failures surfaced by the store client.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport to the store failed.
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// The store rejected the query (missing key, bad path, type mismatch).
    #[error("store error: {0}")]
    Rejected(String),

    /// The store answered with something the client cannot parse.
    #[error("store protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
