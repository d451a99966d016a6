//! Engine configuration
//!
//! Server and client configuration filled from CLI flags, plus the
//! constants of the virtual network.

use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use crate::{Error, Result};

/// The virtual network all tunnels live in
pub const VIRTUAL_NETWORK: &str = "10.8.0.0/24";

/// The server's own address on the virtual network
pub const SERVER_VIRTUAL_IP: Ipv4Addr = Ipv4Addr::new(10, 8, 0, 1);

/// First address handed out to clients
pub const FIRST_CLIENT_IP: Ipv4Addr = Ipv4Addr::new(10, 8, 0, 2);

/// Prefix length sent in handshake assignments
pub const VIRTUAL_PREFIX_LEN: u8 = 24;

/// Tunnel interface name on both sides
pub const TUN_NAME: &str = "tun0";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on; a bare `:port` means all interfaces
    pub listen: String,
    /// Next hop address. `None` means this server is an exit node
    pub forward: Option<String>,
    /// Path to the TLS certificate (PEM)
    pub cert_path: PathBuf,
    /// Path to the TLS private key (PEM)
    pub key_path: PathBuf,
    /// Skip certificate verification when dialing the next hop
    pub insecure_next_hop: bool,
}

impl ServerConfig {
    /// Whether this server decapsulates traffic itself
    pub fn is_exit_node(&self) -> bool {
        self.forward.is_none()
    }

    /// Resolve the listen address, accepting the bare `:443` form
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        resolve_addr(&normalize_listen(&self.listen))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        if let Some(ref forward) = self.forward {
            host_of(forward)?;
            resolve_addr(forward)?;
        }

        Ok(())
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// VPN server address (host:port)
    pub server_addr: String,
}

impl ClientConfig {
    /// Resolve the server address, keeping the hostname for SNI
    pub fn resolve(&self) -> Result<(SocketAddr, String)> {
        let host = host_of(&self.server_addr)?;
        let addr = resolve_addr(&self.server_addr)?;
        Ok((addr, host))
    }
}

fn normalize_listen(listen: &str) -> String {
    if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    }
}

fn resolve_addr(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .map_err(|e| Error::Config(format!("cannot resolve {:?}: {}", addr, e)))?
        .next()
        .ok_or_else(|| Error::Config(format!("{:?} resolved to no addresses", addr)))
}

/// Split the host out of a `host:port` string
pub fn host_of(addr: &str) -> Result<String> {
    let (host, _port) = addr
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("expected host:port, got {:?}", addr)))?;

    if host.is_empty() {
        return Err(Error::Config(format!("empty host in {:?}", addr)));
    }

    Ok(host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_port_listen() {
        let config = ServerConfig {
            listen: ":443".to_string(),
            forward: None,
            cert_path: "server.crt".into(),
            key_path: "server.key".into(),
            insecure_next_hop: false,
        };

        let addr = config.listen_addr().unwrap();
        assert_eq!(addr.port(), 443);
        assert!(addr.ip().is_unspecified());
    }

    #[test]
    fn test_explicit_listen() {
        let config = ServerConfig {
            listen: "127.0.0.1:8443".to_string(),
            forward: None,
            cert_path: "server.crt".into(),
            key_path: "server.key".into(),
            insecure_next_hop: false,
        };

        assert_eq!(config.listen_addr().unwrap(), "127.0.0.1:8443".parse().unwrap());
        assert!(config.is_exit_node());
    }

    #[test]
    fn test_forward_makes_relay() {
        let config = ServerConfig {
            listen: ":443".to_string(),
            forward: Some("127.0.0.1:9443".to_string()),
            cert_path: "server.crt".into(),
            key_path: "server.key".into(),
            insecure_next_hop: false,
        };

        assert!(!config.is_exit_node());
        config.validate().unwrap();
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("example.com:443").unwrap(), "example.com");
        assert_eq!(host_of("1.2.3.4:443").unwrap(), "1.2.3.4");
        assert!(host_of("no-port").is_err());
        assert!(host_of(":443").is_err());
    }

    #[test]
    fn test_client_resolve() {
        let config = ClientConfig {
            server_addr: "127.0.0.1:443".to_string(),
        };

        let (addr, host) = config.resolve().unwrap();
        assert_eq!(addr, "127.0.0.1:443".parse().unwrap());
        assert_eq!(host, "127.0.0.1");
    }
}
