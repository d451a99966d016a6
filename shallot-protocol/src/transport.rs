//! Packet-device abstraction
//!
//! The tunnel data plane couples a framed byte stream with a packet-atomic
//! L3 interface. This module defines the interface half as an async trait
//! so the pump and the exit-node demultiplexer run unchanged against a
//! real TUN device or the [`mock`] implementation used in tests.

pub mod mock;

use async_trait::async_trait;

use crate::Result;

/// Information about a tunnel interface
#[derive(Debug, Clone)]
pub struct TunInfo {
    /// Interface name (e.g. "tun0")
    pub name: String,
    /// Maximum transmission unit size
    pub mtu: u16,
}

/// Async transport trait for tunnel interface operations
///
/// The interface operates at layer 3: every `recv` returns exactly one
/// IPv4 packet and every `send` submits exactly one. Implementations must
/// keep reads packet-atomic; a packet is never split across calls.
#[async_trait]
pub trait TunTransport: Send + Sync {
    /// Receive one IP packet from the interface
    ///
    /// Blocks until a packet is available or the interface fails. The
    /// buffer should be at least MTU-sized.
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Send one IP packet to the interface
    async fn send(&self, buf: &[u8]) -> Result<usize>;

    /// Get information about the interface
    fn info(&self) -> &TunInfo;

    /// Get the MTU of the interface
    fn mtu(&self) -> u16 {
        self.info().mtu
    }

    /// Get the interface name
    fn name(&self) -> &str {
        &self.info().name
    }
}
