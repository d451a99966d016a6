//! TUN device management for the shallot VPN
//!
//! A thin layer over the `tun-rs` crate for creating and configuring the
//! virtual L3 interface, plus the two OS collaborators the VPN needs
//! around it: route table manipulation (`net-route`) and IPv4
//! forwarding / masquerade setup (iptables).
//!
//! Creating devices, adding routes, and installing NAT rules all require
//! root or `CAP_NET_ADMIN`.
//!
//! # Example
//!
//! ```ignore
//! use shallot_tun::{TunConfig, TunDevice};
//!
//! let config = TunConfig::builder()
//!     .name("tun0")
//!     .ipv4("10.8.0.1".parse()?, 24)
//!     .mtu(1300)
//!     .build()?;
//!
//! let device = TunDevice::create(config).await?;
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod nat;
pub mod route;

pub use config::{TunConfig, TunConfigBuilder};
pub use device::TunDevice;
pub use error::{Error, Result};
pub use nat::{NatManager, NatRule};
pub use route::{Route, RouteManager};

/// Default MTU for tunnel devices
pub const DEFAULT_MTU: u16 = shallot_protocol::TUNNEL_MTU;
