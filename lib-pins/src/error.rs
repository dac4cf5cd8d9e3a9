use thiserror::Error;

/// Failures surfaced by the pin storage layer.
#[derive(Debug, Error)]
pub enum PinError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Another request holds the lock on this scratch path.
    #[error("scratch path busy: {0}")]
    ScratchBusy(String),

    /// Hash mismatch, bad signature, invalid layout or an out-of-window
    /// timestamp.
    #[error("{0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, PinError>;
