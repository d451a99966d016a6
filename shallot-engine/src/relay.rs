//! Relay splicer
//!
//! In relay mode the server never parses tunnel frames. Each accepted
//! stream is spliced byte-for-byte onto a fresh TLS session with the next
//! hop: the inbound TLS layer has already decrypted this hop's traffic,
//! and the outbound session re-encrypts it for the next one. Either
//! direction ending terminates the splice and closes both streams.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::config::host_of;
use crate::{tls, Error, Result};

/// Copy bytes in both directions until either side closes
///
/// Returns the bytes moved inbound→outbound and outbound→inbound.
pub async fn splice<A, B>(mut inbound: A, mut outbound: B) -> std::io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await
}

/// Splice one accepted session onto the configured next hop
pub async fn run<S>(inbound: S, forward: &str, connector: &TlsConnector) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let host = host_of(forward)?;

    let tcp = TcpStream::connect(forward)
        .await
        .map_err(|e| Error::Tls(format!("failed to dial next hop {}: {}", forward, e)))?;
    tls::configure_socket(&tcp)?;

    let outbound = connector
        .connect(tls::server_name(&host)?, tcp)
        .await
        .map_err(|e| Error::Tls(format!("TLS handshake with next hop {} failed: {}", forward, e)))?;

    log::info!("Relaying to {}", forward);

    match splice(inbound, outbound).await {
        Ok((up, down)) => {
            log::info!("Relay session finished ({} bytes up, {} bytes down)", up, down);
        }
        Err(e) => {
            log::info!("Relay session ended: {}", e);
        }
    }

    Ok(())
}
