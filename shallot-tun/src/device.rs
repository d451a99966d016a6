//! TUN device wrapper
//!
//! Wraps `tun-rs` behind the [`TunTransport`] trait the data plane is
//! written against. Reads and writes are packet-atomic: one call, one
//! IPv4 packet.

use async_trait::async_trait;

use shallot_protocol::transport::{TunInfo, TunTransport};

use crate::config::TunConfig;
use crate::error::{Error, Result};

/// An open tunnel interface
///
/// Creating the device assigns the configured address, sets the MTU, and
/// brings the interface up. Dropping it closes the handle; route and
/// address cleanup is the OS's job once the interface disappears.
pub struct TunDevice {
    inner: tun_rs::AsyncDevice,
    info: TunInfo,
}

impl TunDevice {
    /// Create a new TUN device with the given configuration
    ///
    /// Requires root or `CAP_NET_ADMIN`.
    pub async fn create(config: TunConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = tun_rs::DeviceBuilder::new();

        if let Some(ref name) = config.name {
            builder = builder.name(name);
        }

        if let Some(ref ipv4) = config.ipv4 {
            builder = builder.ipv4(ipv4.address, ipv4.prefix_len, ipv4.destination);
        }

        builder = builder.mtu(config.mtu);

        let device = builder
            .build_async()
            .map_err(|e| Error::DeviceCreation(e.to_string()))?;

        let name = device
            .name()
            .map_err(|e| Error::DeviceCreation(e.to_string()))?;

        log::info!("Created TUN device {} (MTU {})", name, config.mtu);

        Ok(Self {
            inner: device,
            info: TunInfo {
                name,
                mtu: config.mtu,
            },
        })
    }

    /// Get the interface name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Get the MTU
    pub fn mtu(&self) -> u16 {
        self.info.mtu
    }
}

#[async_trait]
impl TunTransport for TunDevice {
    async fn recv(&self, buf: &mut [u8]) -> shallot_protocol::Result<usize> {
        self.inner
            .recv(buf)
            .await
            .map_err(shallot_protocol::Error::Io)
    }

    async fn send(&self, buf: &[u8]) -> shallot_protocol::Result<usize> {
        self.inner
            .send(buf)
            .await
            .map_err(shallot_protocol::Error::Io)
    }

    fn info(&self) -> &TunInfo {
        &self.info
    }
}

impl std::fmt::Debug for TunDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunDevice")
            .field("name", &self.info.name)
            .field("mtu", &self.info.mtu)
            .finish()
    }
}
