//! Relay opacity tests
//!
//! The relay must move bytes between its two streams without parsing
//! them: even a frame type the protocol never defined transits intact and
//! is only judged at the exit node's pump.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, Duration};

use shallot_engine::{pump, relay};
use shallot_protocol::transport::mock::{IpPacketBuilder, MockTunDevice};
use shallot_protocol::{encode, read_frame, FrameType};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_unknown_frame_transits_relay_byte_identical() {
    // client <-> relay <-> exit, as in-memory streams
    let (mut client_stream, relay_inbound) = duplex(64 * 1024);
    let (relay_outbound, mut exit_stream) = duplex(64 * 1024);

    let _splice = tokio::spawn(relay::splice(relay_inbound, relay_outbound));

    let unknown = encode(FrameType(0x42), b"opaque to the relay").unwrap();
    client_stream.write_all(&unknown).await.unwrap();

    // The exit node's decode stage sees exactly what the client encoded
    let frame = timeout(WAIT, read_frame(&mut exit_stream))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.frame_type, FrameType(0x42));
    assert_eq!(frame.payload, b"opaque to the relay");
    assert_eq!(frame.encode().unwrap(), unknown);
}

#[tokio::test]
async fn test_unknown_frame_dropped_at_exit_pump_after_relay() {
    let (mut client_stream, relay_inbound) = duplex(64 * 1024);
    let (relay_outbound, exit_stream) = duplex(64 * 1024);

    let _splice = tokio::spawn(relay::splice(relay_inbound, relay_outbound));

    // The exit node end: uplink pump draining frames onto its TUN
    let exit_tun = Arc::new(MockTunDevice::new("tun-exit", 1300));
    let (exit_reader, _exit_writer) = split(exit_stream);
    let uplink = tokio::spawn(pump::net_to_tun(exit_reader, exit_tun.clone()));

    // An undefined type followed by a real packet
    client_stream
        .write_all(&encode(FrameType(0x42), b"not a packet").unwrap())
        .await
        .unwrap();

    let packet = IpPacketBuilder::ipv4()
        .src(Ipv4Addr::new(10, 8, 0, 2))
        .dst(Ipv4Addr::new(8, 8, 8, 8))
        .with_udp(12345, 53, b"real traffic")
        .build();
    client_stream
        .write_all(&encode(FrameType::DATA, &packet).unwrap())
        .await
        .unwrap();

    // Only the DATA payload reaches the TUN; the unknown frame was
    // dropped at the pump, not by the relay, and the session survived
    timeout(WAIT, exit_tun.wait_for_sent(1)).await.unwrap();
    assert_eq!(exit_tun.sent_packets(), vec![packet]);
    assert!(!uplink.is_finished());
}

#[tokio::test]
async fn test_splice_moves_bytes_both_directions() {
    let (mut client_stream, relay_inbound) = duplex(64 * 1024);
    let (relay_outbound, mut exit_stream) = duplex(64 * 1024);

    let splice = tokio::spawn(relay::splice(relay_inbound, relay_outbound));

    client_stream.write_all(b"up the tunnel").await.unwrap();
    exit_stream.write_all(b"down the tunnel").await.unwrap();

    let mut buf = vec![0u8; 32];
    let n = timeout(WAIT, exit_stream.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"up the tunnel");
    let n = timeout(WAIT, client_stream.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"down the tunnel");

    // Either side closing terminates the splice
    drop(client_stream);
    drop(exit_stream);
    let _ = timeout(WAIT, splice).await.unwrap();
}
