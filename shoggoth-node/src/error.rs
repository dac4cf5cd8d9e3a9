use lib_pins::PinError;
use lib_store::StoreError;
use thiserror::Error;

/// Error taxonomy at the node core boundary.
///
/// Background loops catch every recoverable variant, log it and continue;
/// HTTP handlers convert them into 406 responses. Only `Internal` aborts
/// the process.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("store unreachable: {0}")]
    StoreUnreachable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Validation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;

impl From<StoreError> for NodeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unreachable(msg) => NodeError::StoreUnreachable(msg),
            StoreError::Rejected(msg) => NodeError::Store(msg),
            StoreError::Protocol(msg) => NodeError::Protocol(msg),
        }
    }
}

impl From<PinError> for NodeError {
    fn from(e: PinError) -> Self {
        match e {
            PinError::Io(inner) => NodeError::Io(inner),
            PinError::ScratchBusy(path) => NodeError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("scratch path busy: {path}"),
            )),
            PinError::Validation(msg) => NodeError::Validation(msg),
        }
    }
}

impl From<reqwest::Error> for NodeError {
    fn from(e: reqwest::Error) -> Self {
        NodeError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::Protocol(e.to_string())
    }
}
