//! VPN server
//!
//! The accept loop spawns one task per connection. As an exit node the
//! server owns the shared TUN device, the address pool, and the client
//! registry: each session is handshaken, registered, and then drained
//! into the TUN while the demultiplexer routes return traffic. As a relay
//! node no frame is ever parsed; sessions are spliced to the next hop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use shallot_protocol::transport::TunTransport;
use shallot_protocol::{AssignedAddress, Frame, TUNNEL_MTU};
use shallot_tun::{NatManager, NatRule, TunConfig, TunDevice};

use crate::config::{
    ServerConfig, FIRST_CLIENT_IP, SERVER_VIRTUAL_IP, TUN_NAME, VIRTUAL_NETWORK,
    VIRTUAL_PREFIX_LEN,
};
use crate::pool::Ipv4Pool;
use crate::registry::{ClientHandle, ClientRegistry};
use crate::{demux, pump, relay, tls, Error, Result};

type TlsServerStream = tokio_rustls::server::TlsStream<TcpStream>;
type SessionWriter = WriteHalf<TlsServerStream>;

/// The VPN server
pub struct Server {
    config: ServerConfig,
}

impl Server {
    /// Create a server from a validated configuration
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run the server until the shutdown channel fires
    ///
    /// Setup failures (key pair, bind, TUN, NAT) abort with an error;
    /// per-session failures never reach this level.
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let acceptor = tls::acceptor(&self.config.cert_path, &self.config.key_path)?;
        let listen = self.config.listen_addr()?;

        match self.config.forward.clone() {
            None => self.run_exit_node(acceptor, listen, shutdown_rx).await,
            Some(forward) => self.run_relay(acceptor, listen, forward, shutdown_rx).await,
        }
    }

    async fn run_exit_node(
        &self,
        acceptor: TlsAcceptor,
        listen: SocketAddr,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        log::info!("Mode: exit node (NAT enabled)");

        let mut nat = NatManager::new();
        nat.enable_ip_forwarding()?;

        let tun_config = TunConfig::builder()
            .name(TUN_NAME)
            .ipv4(SERVER_VIRTUAL_IP, VIRTUAL_PREFIX_LEN)
            .mtu(TUNNEL_MTU)
            .build()?;
        let tun = Arc::new(TunDevice::create(tun_config).await?);

        nat.add_rule(&NatRule::masquerade(VIRTUAL_NETWORK))?;

        let registry: ClientRegistry<SessionWriter> = ClientRegistry::new();
        let pool = Arc::new(Mutex::new(Ipv4Pool::new(FIRST_CLIENT_IP)));

        let demux_task = tokio::spawn({
            let tun = tun.clone();
            let registry = registry.clone();
            async move {
                if let Err(e) = demux::run(tun, registry).await {
                    log::error!("Demultiplexer terminated: {}", e);
                }
            }
        });

        let listener = TcpListener::bind(listen).await?;
        log::info!("VPN server listening on {}", listen);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    log::info!("New client connected: {}", peer_addr);
                    tokio::spawn(handle_exit_connection(
                        stream,
                        peer_addr,
                        acceptor.clone(),
                        tun.clone(),
                        registry.clone(),
                        pool.clone(),
                    ));
                }
            }
        }

        log::info!("Shutting down");
        demux_task.abort();
        nat.cleanup();
        Ok(())
    }

    async fn run_relay(
        &self,
        acceptor: TlsAcceptor,
        listen: SocketAddr,
        forward: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        log::info!("Mode: relay node (forwarding to {})", forward);

        let connector = tls::connector(self.config.insecure_next_hop);
        if self.config.insecure_next_hop {
            log::warn!("Next-hop certificate verification is disabled");
        }

        let listener = TcpListener::bind(listen).await?;
        log::info!("VPN server listening on {}", listen);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    log::info!("New client connected: {}", peer_addr);
                    tokio::spawn(handle_relay_connection(
                        stream,
                        peer_addr,
                        acceptor.clone(),
                        forward.clone(),
                        connector.clone(),
                    ));
                }
            }
        }

        log::info!("Shutting down");
        Ok(())
    }
}

async fn handle_exit_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    tun: Arc<TunDevice>,
    registry: ClientRegistry<SessionWriter>,
    pool: Arc<Mutex<Ipv4Pool>>,
) {
    if let Err(e) = tls::configure_socket(&stream) {
        log::warn!("Socket options for {}: {}", peer_addr, e);
    }

    let tls_stream = match acceptor.accept(stream).await {
        Ok(stream) => stream,
        Err(e) => {
            log::warn!("TLS handshake with {} failed: {}", peer_addr, e);
            return;
        }
    };

    let (reader, writer) = tokio::io::split(tls_stream);
    if let Err(e) = serve_exit_session(reader, writer, peer_addr, tun, registry, pool).await {
        log::warn!("Session for {} failed: {}", peer_addr, e);
    }
}

async fn handle_relay_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    forward: String,
    connector: TlsConnector,
) {
    if let Err(e) = tls::configure_socket(&stream) {
        log::warn!("Socket options for {}: {}", peer_addr, e);
    }

    let tls_stream = match acceptor.accept(stream).await {
        Ok(stream) => stream,
        Err(e) => {
            log::warn!("TLS handshake with {} failed: {}", peer_addr, e);
            return;
        }
    };

    if let Err(e) = relay::run(tls_stream, &forward, &connector).await {
        log::warn!("Relay session for {} failed: {}", peer_addr, e);
    }

    log::info!("Relay session for {} finished", peer_addr);
}

/// Drive one exit-node session from address assignment to teardown
///
/// Allocates a virtual address, registers the session, sends the
/// HANDSHAKE frame, then drains the client's DATA frames into the shared
/// TUN until the stream dies. Teardown removes the session from the
/// registry before closing its stream and releasing its address.
pub async fn serve_exit_session<R, W, T>(
    reader: R,
    writer: W,
    peer_addr: SocketAddr,
    tun: Arc<T>,
    registry: ClientRegistry<W>,
    pool: Arc<Mutex<Ipv4Pool>>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send,
    T: TunTransport + ?Sized,
{
    let virtual_ip = pool.lock().await.allocate()?;
    let handle = ClientHandle::new(virtual_ip, peer_addr, writer);

    if !registry.insert(handle.clone()).await {
        pool.lock().await.release(virtual_ip);
        return Err(Error::Pool(format!(
            "{} is already registered to another session",
            virtual_ip
        )));
    }

    log::info!("Assigned {} to {}", virtual_ip, peer_addr);

    let assignment = AssignedAddress::new(virtual_ip, VIRTUAL_PREFIX_LEN);
    let result = match handle.send_frame(&Frame::handshake(assignment.to_payload())).await {
        Ok(()) => pump::net_to_tun(reader, tun).await,
        Err(e) => Err(e),
    };

    // Teardown order matters: the session leaves the registry before its
    // stream closes and its address is released.
    registry.remove(virtual_ip).await;
    handle.shutdown().await;
    pool.lock().await.release(virtual_ip);

    match result {
        Ok(()) => log::info!("Client {} disconnected", virtual_ip),
        Err(e) => log::info!("Client {} disconnected: {}", virtual_ip, e),
    }

    Ok(())
}
