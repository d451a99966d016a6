//! VPN client
//!
//! Connects to the server over TLS, receives exactly one HANDSHAKE frame
//! carrying the assigned virtual address, brings up the tunnel interface,
//! rewires the routing table (host route to the server via the old
//! gateway, def1 default override, virtual subnet route), and then pumps
//! packets until the tunnel dies or shutdown is requested.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use ipnet::{IpNet, Ipv4Net};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};

use shallot_protocol::{read_frame, AssignedAddress, TUNNEL_MTU};
use shallot_tun::{Route, RouteManager, TunConfig, TunDevice};

use crate::config::{ClientConfig, TUN_NAME, VIRTUAL_NETWORK};
use crate::{pump, tls, Error, Result};

/// The VPN client
pub struct Client {
    config: ClientConfig,
}

impl Client {
    /// Create a client
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Run the tunnel until it terminates or the shutdown channel fires
    ///
    /// Certificate verification is off: the documented deployment runs
    /// against self-signed server certificates.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let (server_addr, sni_host) = self.config.resolve()?;

        log::info!("Connecting to server at {}...", self.config.server_addr);
        let tcp = TcpStream::connect(server_addr).await?;
        tls::configure_socket(&tcp)?;

        let connector = tls::connector(true);
        let tls_stream = connector
            .connect(tls::server_name(&sni_host)?, tcp)
            .await
            .map_err(|e| Error::Tls(format!("TLS handshake failed: {}", e)))?;

        log::info!("Connected. Waiting for handshake...");
        let (mut reader, writer) = tokio::io::split(tls_stream);

        // Exactly one frame, and it must be the handshake; anything else
        // means we are not talking to a shallot server.
        let frame = read_frame(&mut reader).await?;
        if !frame.frame_type.is_handshake() {
            return Err(Error::Handshake(format!(
                "expected HANDSHAKE frame, got {}",
                frame.frame_type
            )));
        }
        let assignment = AssignedAddress::from_payload(&frame.payload)?;
        log::info!("Assigned address: {}", assignment);

        let tun_config = TunConfig::builder()
            .name(TUN_NAME)
            .ipv4(assignment.ip, assignment.prefix_len)
            .mtu(TUNNEL_MTU)
            .build()?;
        let tun = Arc::new(TunDevice::create(tun_config).await?);

        let routes = RouteManager::new().await?;
        let server_route = apply_vpn_routes(&routes, server_addr.ip()).await?;

        let writer = Arc::new(Mutex::new(writer));
        tokio::select! {
            _ = pump::run(reader, writer, tun) => {
                log::info!("Tunnel connection lost");
            }
            _ = shutdown_rx.recv() => {
                log::info!("Shutdown requested");
            }
        }

        cleanup_routes(&routes, server_route).await;
        Ok(())
    }
}

/// Install the tunnel routing state
///
/// Returns the server host route so it can be removed on shutdown; the
/// def1 and subnet routes die with the interface.
async fn apply_vpn_routes(routes: &RouteManager, server_ip: IpAddr) -> Result<Option<Route>> {
    // Pin the server behind the pre-existing default gateway so the
    // tunnel's own traffic does not loop into the tunnel.
    let server_route = match routes.default_gateway().await {
        Ok(Some((gateway, ifindex))) => {
            log::info!("Current gateway: {}", gateway);
            let host_prefix = if server_ip.is_ipv4() { 32 } else { 128 };
            let host_net = IpNet::new(server_ip, host_prefix)
                .map_err(|e| Error::Config(format!("invalid server address: {}", e)))?;
            let mut route = Route::new(host_net, gateway);
            if let Some(ifindex) = ifindex {
                route = route.with_ifindex(ifindex);
            }
            if let Err(e) = routes.add(&route).await {
                log::warn!("Could not add server host route (may exist): {}", e);
            }
            Some(route)
        }
        Ok(None) | Err(_) => {
            log::warn!("Could not detect default gateway; routing might fail");
            None
        }
    };

    // The def1 split overrides the default route without deleting it.
    let def1_low = IpNet::V4(Ipv4Net::new(Ipv4Addr::new(0, 0, 0, 0), 1).unwrap());
    let def1_high = IpNet::V4(Ipv4Net::new(Ipv4Addr::new(128, 0, 0, 0), 1).unwrap());
    routes.add(&Route::interface_route(def1_low, TUN_NAME)).await?;
    routes.add(&Route::interface_route(def1_high, TUN_NAME)).await?;

    // Traffic for other tunnel peers also belongs on the interface. This
    // overlaps the def1 pair; explicit is fine.
    let vpn_net: IpNet = VIRTUAL_NETWORK
        .parse()
        .map_err(|e| Error::Config(format!("invalid virtual network: {}", e)))?;
    if let Err(e) = routes.add(&Route::interface_route(vpn_net, TUN_NAME)).await {
        log::debug!("Virtual subnet route: {}", e);
    }

    log::info!("Routes applied. Traffic is now tunneling.");
    Ok(server_route)
}

async fn cleanup_routes(routes: &RouteManager, server_route: Option<Route>) {
    log::info!("Cleaning up routes...");
    if let Some(route) = server_route {
        if let Err(e) = routes.delete(&route).await {
            log::warn!("Failed to remove server host route: {}", e);
        }
    }
}
