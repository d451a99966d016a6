//! Exit-node demultiplexer
//!
//! One long-lived task drains the server's shared TUN device and routes
//! each packet to the session owning its destination address. The IPv4
//! destination is the routing key; packets too short to carry an IPv4
//! header and packets for unregistered destinations are dropped without
//! logging (the kernel happily produces both).

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::io::AsyncWrite;

use shallot_protocol::transport::TunTransport;
use shallot_protocol::{encode_into, FrameType, IFACE_BUFSIZE};

use crate::registry::ClientRegistry;
use crate::Result;

/// Minimum length of a buffer that can hold an IPv4 header
const IPV4_HEADER_LEN: usize = 20;

/// Extract the destination address from an IPv4 packet
///
/// Bytes 16–19 of the header. Returns `None` for buffers too short to be
/// an IPv4 packet.
pub fn extract_dst_ipv4(packet: &[u8]) -> Option<Ipv4Addr> {
    if packet.len() < IPV4_HEADER_LEN {
        return None;
    }
    Some(Ipv4Addr::new(
        packet[16], packet[17], packet[18], packet[19],
    ))
}

/// Drain the shared TUN device and dispatch packets to their sessions
///
/// Runs until the device read fails. A failed write to a client is logged
/// and skipped; the owning session notices its dead stream and cleans up
/// on its own.
pub async fn run<T, W>(tun: Arc<T>, registry: ClientRegistry<W>) -> Result<()>
where
    T: TunTransport + ?Sized,
    W: AsyncWrite + Unpin,
{
    let mut packet_buf = vec![0u8; IFACE_BUFSIZE];
    let mut frame_buf = Vec::with_capacity(IFACE_BUFSIZE);

    loop {
        let n = tun.recv(&mut packet_buf).await?;

        let Some(dst) = extract_dst_ipv4(&packet_buf[..n]) else {
            continue;
        };

        let Some(handle) = registry.lookup(dst).await else {
            continue;
        };

        encode_into(FrameType::DATA, &packet_buf[..n], &mut frame_buf)?;
        if let Err(e) = handle.send_encoded(&frame_buf).await {
            // Transient write to a dying session; it cleans up after itself
            log::warn!("Write to client {} failed: {}", dst, e);
        }
    }
}
