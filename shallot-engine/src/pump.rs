//! Session pump
//!
//! Couples one framed stream with one packet device using two independent
//! loops: net→tun decapsulates DATA frames onto the device, tun→net
//! encapsulates device packets into DATA frames. The stream and the
//! device are independent full-duplex endpoints, so the directions run as
//! separate tasks; when either exits, the other is cancelled and the
//! stream's write half is shut down so any peer blocked on it fails over.
//!
//! Non-DATA frames on the data path (KEEPALIVE, a stray HANDSHAKE, or an
//! unknown type) are discarded and the pump keeps running.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use shallot_protocol::transport::TunTransport;
use shallot_protocol::{encode_into, read_frame, Error as ProtocolError, FrameType, IFACE_BUFSIZE};

use crate::Result;

/// Decapsulate frames from the stream onto the packet device
///
/// Runs until the peer closes the stream (returns `Ok`), a frame fails to
/// decode, or the device write fails. Every error terminates only this
/// session.
pub async fn net_to_tun<R, T>(mut reader: R, tun: Arc<T>) -> Result<()>
where
    R: AsyncRead + Unpin,
    T: TunTransport + ?Sized,
{
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(ProtocolError::EndOfStream) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if frame.frame_type.is_data() {
            tun.send(&frame.payload).await?;
        } else {
            log::debug!("Discarding {} frame on the data path", frame.frame_type);
        }
    }
}

/// Encapsulate packets from the device into DATA frames on the stream
///
/// Runs until the device read or the stream write fails.
pub async fn tun_to_net<T, W>(tun: Arc<T>, writer: Arc<Mutex<W>>) -> Result<()>
where
    T: TunTransport + ?Sized,
    W: AsyncWrite + Unpin,
{
    let mut packet_buf = vec![0u8; IFACE_BUFSIZE];
    let mut frame_buf = Vec::with_capacity(IFACE_BUFSIZE);

    loop {
        let n = tun.recv(&mut packet_buf).await?;
        encode_into(FrameType::DATA, &packet_buf[..n], &mut frame_buf)?;

        let mut writer = writer.lock().await;
        writer.write_all(&frame_buf).await?;
        writer.flush().await?;
    }
}

/// Run both directions of a session until one of them terminates
///
/// The surviving direction is aborted and the stream's write half shut
/// down, which unblocks the peer's next read. Returns once teardown is
/// complete; the cause of termination is logged, not propagated, because
/// a finished tunnel is the expected end state of every session.
pub async fn run<R, W, T>(reader: R, writer: Arc<Mutex<W>>, tun: Arc<T>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    T: TunTransport + Send + Sync + 'static,
{
    let mut inbound = tokio::spawn(net_to_tun(reader, tun.clone()));
    let mut outbound = tokio::spawn(tun_to_net(tun, writer.clone()));

    tokio::select! {
        result = &mut inbound => {
            log_direction("net->tun", result);
            outbound.abort();
        }
        result = &mut outbound => {
            log_direction("tun->net", result);
            inbound.abort();
        }
    }

    // Closing the stream is the cancellation primitive: any task still
    // blocked on it gets an I/O error and exits.
    let mut writer = writer.lock().await;
    let _ = writer.shutdown().await;
}

fn log_direction(direction: &str, result: std::result::Result<Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => log::info!("Tunnel {} closed by peer", direction),
        Ok(Err(e)) => log::info!("Tunnel {} terminated: {}", direction, e),
        Err(e) => log::warn!("Tunnel {} task failed: {}", direction, e),
    }
}
