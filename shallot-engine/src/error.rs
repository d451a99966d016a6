//! Error types for the VPN engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur running the VPN
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] shallot_protocol::Error),

    /// TUN device error
    #[error("TUN error: {0}")]
    Tun(#[from] shallot_tun::Error),

    /// TLS setup error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Address pool error
    #[error("address pool error: {0}")]
    Pool(String),

    /// Handshake protocol violation
    #[error("handshake error: {0}")]
    Handshake(String),
}
