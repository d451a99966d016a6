//! Error types for the shallot wire protocol

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding or decoding the tunnel stream
#[derive(Debug, Error)]
pub enum Error {
    #[error("payload too large: {len} bytes exceeds the frame limit")]
    PayloadTooLarge { len: usize },

    #[error("end of stream")]
    EndOfStream,

    #[error("truncated frame: needed {expected} bytes, stream ended after {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid address payload: {0}")]
    Address(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
