//! Shallot VPN engine
//!
//! The tunnel data plane and the drivers around it. A client couples its
//! private TUN device to one framed TLS stream through the session pump;
//! the server either terminates tunnels as an exit node (shared TUN,
//! per-destination demultiplexer, NAT) or splices the encrypted stream
//! onward as a relay hop.

pub mod client;
pub mod config;
pub mod demux;
pub mod error;
pub mod pool;
pub mod pump;
pub mod registry;
pub mod relay;
pub mod server;
pub mod tls;

pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use error::{Error, Result};
pub use pool::Ipv4Pool;
pub use registry::{ClientHandle, ClientRegistry};
pub use server::Server;
