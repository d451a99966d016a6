//! Error types for TUN device management

use thiserror::Error;

/// Result type alias for TUN operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur managing the tunnel interface and its OS state
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create TUN device: {0}")]
    DeviceCreation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid prefix: {0}")]
    InvalidPrefix(String),

    #[error("route error: {0}")]
    Route(String),

    #[error("NAT error: {0}")]
    Nat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
