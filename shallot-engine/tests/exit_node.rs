//! Exit-node integration tests
//!
//! Drives the per-session driver, the shared-TUN demultiplexer, and the
//! client pump as real tasks over in-memory duplex streams and mock TUN
//! devices, covering address assignment, bidirectional dispatch, drop
//! rules, and disconnect cleanup.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::{duplex, split, AsyncWriteExt, DuplexStream, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

use shallot_engine::server::serve_exit_session;
use shallot_engine::{demux, pump, ClientRegistry, Ipv4Pool};
use shallot_protocol::transport::mock::{IpPacketBuilder, MockTunDevice};
use shallot_protocol::{encode, read_frame, Frame, FrameType};

type TestWriter = WriteHalf<DuplexStream>;

const TICK: Duration = Duration::from_millis(50);
const WAIT: Duration = Duration::from_secs(5);

fn peer(n: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40000 + n))
}

/// An exit node reduced to its data plane: shared mock TUN, registry,
/// pool, and a running demultiplexer.
struct TestExitNode {
    tun: Arc<MockTunDevice>,
    registry: ClientRegistry<TestWriter>,
    pool: Arc<Mutex<Ipv4Pool>>,
    demux_task: JoinHandle<()>,
}

impl TestExitNode {
    fn start() -> Self {
        let tun = Arc::new(MockTunDevice::new("tun-server", 1300));
        let registry: ClientRegistry<TestWriter> = ClientRegistry::new();
        let pool = Arc::new(Mutex::new(Ipv4Pool::new(Ipv4Addr::new(10, 8, 0, 2))));

        let demux_task = tokio::spawn({
            let tun = tun.clone();
            let registry = registry.clone();
            async move {
                let _ = demux::run(tun, registry).await;
            }
        });

        Self {
            tun,
            registry,
            pool,
            demux_task,
        }
    }

    /// Accept one "connection", returning the client's end of the stream
    /// and the running session task.
    fn accept(&self, n: u16) -> (DuplexStream, JoinHandle<()>) {
        let (client_side, server_side) = duplex(64 * 1024);
        let (reader, writer) = split(server_side);

        let task = tokio::spawn({
            let tun = self.tun.clone();
            let registry = self.registry.clone();
            let pool = self.pool.clone();
            async move {
                let _ = serve_exit_session(reader, writer, peer(n), tun, registry, pool).await;
            }
        });

        (client_side, task)
    }
}

async fn read_handshake(stream: &mut DuplexStream) -> Frame {
    let frame = timeout(WAIT, read_frame(stream))
        .await
        .expect("timed out waiting for handshake")
        .expect("handshake read failed");
    assert!(frame.frame_type.is_handshake());
    frame
}

#[tokio::test]
async fn test_allocation_sequence_over_handshakes() {
    let node = TestExitNode::start();
    let mut sessions = Vec::new();

    for expected in ["10.8.0.2/24", "10.8.0.3/24", "10.8.0.4/24"] {
        let (mut client, task) = node.accept(sessions.len() as u16);
        let frame = read_handshake(&mut client).await;
        assert_eq!(frame.payload, expected.as_bytes());
        sessions.push((client, task));
    }

    assert_eq!(node.registry.len().await, 3);
}

#[tokio::test]
async fn test_small_packet_dispatch_both_directions() {
    let node = TestExitNode::start();
    let (mut client_stream, _session) = node.accept(1);
    read_handshake(&mut client_stream).await;

    // Client side: private mock TUN coupled to the stream by the pump
    let client_tun = Arc::new(MockTunDevice::new("tun-client", 1300));
    let (reader, writer) = split(client_stream);
    let _pump = tokio::spawn(pump::run(
        reader,
        Arc::new(Mutex::new(writer)),
        client_tun.clone(),
    ));

    // Egress: a packet leaving the client surfaces byte-identical on the
    // exit node's shared TUN
    let egress = IpPacketBuilder::ipv4()
        .src(Ipv4Addr::new(10, 8, 0, 2))
        .dst(Ipv4Addr::new(8, 8, 8, 8))
        .with_udp(12345, 53, b"query")
        .build();
    client_tun.inject_recv_packet(egress.clone());

    timeout(WAIT, node.tun.wait_for_sent(1)).await.unwrap();
    assert_eq!(node.tun.sent_packets(), vec![egress]);

    // Ingress: a packet for the client's virtual address injected at the
    // server TUN is delivered byte-identical to the client's TUN
    let ingress = IpPacketBuilder::ipv4()
        .src(Ipv4Addr::new(8, 8, 8, 8))
        .dst(Ipv4Addr::new(10, 8, 0, 2))
        .with_udp(53, 12345, b"answer")
        .build();
    node.tun.inject_recv_packet(ingress.clone());

    timeout(WAIT, client_tun.wait_for_sent(1)).await.unwrap();
    assert_eq!(client_tun.sent_packets(), vec![ingress]);
}

#[tokio::test]
async fn test_mtu_sized_packet_integrity() {
    let node = TestExitNode::start();
    let (mut client_stream, _session) = node.accept(1);
    read_handshake(&mut client_stream).await;

    let client_tun = Arc::new(MockTunDevice::new("tun-client", 1300));
    let (reader, writer) = split(client_stream);
    let _pump = tokio::spawn(pump::run(
        reader,
        Arc::new(Mutex::new(writer)),
        client_tun.clone(),
    ));

    // 20 byte IPv4 header + 8 byte UDP header + 1272 bytes of data = MTU
    let data: Vec<u8> = (0..1272u32).map(|i| (i % 251) as u8).collect();
    let packet = IpPacketBuilder::ipv4()
        .src(Ipv4Addr::new(10, 8, 0, 2))
        .dst(Ipv4Addr::new(1, 1, 1, 1))
        .with_udp(40000, 443, &data)
        .build();
    assert_eq!(packet.len(), 1300);

    client_tun.inject_recv_packet(packet.clone());

    timeout(WAIT, node.tun.wait_for_sent(1)).await.unwrap();
    assert_eq!(node.tun.sent_packets(), vec![packet]);
}

#[tokio::test]
async fn test_undersized_buffer_dropped() {
    let node = TestExitNode::start();
    let (mut client_stream, _session) = node.accept(1);
    read_handshake(&mut client_stream).await;

    // 19 bytes cannot carry an IPv4 header; the demultiplexer must skip
    // it without touching any stream
    node.tun.inject_recv_packet(vec![0u8; 19]);

    // A valid packet afterwards proves the loop survived the runt
    let valid = IpPacketBuilder::ipv4()
        .src(Ipv4Addr::new(8, 8, 8, 8))
        .dst(Ipv4Addr::new(10, 8, 0, 2))
        .with_udp(53, 12345, b"after")
        .build();
    node.tun.inject_recv_packet(valid.clone());

    let frame = timeout(WAIT, read_frame(&mut client_stream))
        .await
        .unwrap()
        .unwrap();
    assert!(frame.frame_type.is_data());
    assert_eq!(frame.payload, valid);

    assert_eq!(node.registry.len().await, 1);
}

#[tokio::test]
async fn test_unknown_destination_dropped() {
    let node = TestExitNode::start();
    let (mut client_stream, _session) = node.accept(1);
    read_handshake(&mut client_stream).await;

    // 10.8.0.99 was never assigned; nothing may be written anywhere
    let stray = IpPacketBuilder::ipv4()
        .src(Ipv4Addr::new(8, 8, 8, 8))
        .dst(Ipv4Addr::new(10, 8, 0, 99))
        .with_udp(53, 12345, b"stray")
        .build();
    node.tun.inject_recv_packet(stray);

    let valid = IpPacketBuilder::ipv4()
        .src(Ipv4Addr::new(8, 8, 8, 8))
        .dst(Ipv4Addr::new(10, 8, 0, 2))
        .with_udp(53, 12345, b"valid")
        .build();
    node.tun.inject_recv_packet(valid.clone());

    // The first (and only) frame on the stream is the valid packet
    let frame = timeout(WAIT, read_frame(&mut client_stream))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.payload, valid);
}

#[tokio::test]
async fn test_disconnect_cleanup() {
    let node = TestExitNode::start();
    let (mut client_stream, session) = node.accept(1);
    read_handshake(&mut client_stream).await;

    // Active transfer, then the client goes away mid-session
    let packet = IpPacketBuilder::ipv4()
        .src(Ipv4Addr::new(10, 8, 0, 2))
        .dst(Ipv4Addr::new(8, 8, 8, 8))
        .with_udp(12345, 53, b"last words")
        .build();
    client_stream
        .write_all(&encode(FrameType::DATA, &packet).unwrap())
        .await
        .unwrap();
    timeout(WAIT, node.tun.wait_for_sent(1)).await.unwrap();

    drop(client_stream);

    // The session pump terminates and tears the session down
    timeout(WAIT, session).await.unwrap().unwrap();
    assert!(node.registry.lookup(Ipv4Addr::new(10, 8, 0, 2)).await.is_none());
    assert!(node.registry.is_empty().await);
    assert!(!node.pool.lock().await.is_active(Ipv4Addr::new(10, 8, 0, 2)));

    // A late packet for the released address is dropped silently and the
    // demultiplexer keeps running
    let late = IpPacketBuilder::ipv4()
        .src(Ipv4Addr::new(8, 8, 8, 8))
        .dst(Ipv4Addr::new(10, 8, 0, 2))
        .with_udp(53, 12345, b"too late")
        .build();
    node.tun.inject_recv_packet(late);

    sleep(TICK).await;
    assert!(!node.demux_task.is_finished());
}

#[tokio::test]
async fn test_non_data_frames_discarded_by_uplink() {
    let node = TestExitNode::start();
    let (mut client_stream, session) = node.accept(1);
    read_handshake(&mut client_stream).await;

    // KEEPALIVE, a stray HANDSHAKE, and an undefined type must all be
    // ignored without ending the session
    for frame_type in [FrameType::KEEPALIVE, FrameType::HANDSHAKE, FrameType(0x7F)] {
        client_stream
            .write_all(&encode(frame_type, b"ignored").unwrap())
            .await
            .unwrap();
    }

    let packet = IpPacketBuilder::ipv4()
        .src(Ipv4Addr::new(10, 8, 0, 2))
        .dst(Ipv4Addr::new(8, 8, 8, 8))
        .with_udp(12345, 53, b"real")
        .build();
    client_stream
        .write_all(&encode(FrameType::DATA, &packet).unwrap())
        .await
        .unwrap();

    timeout(WAIT, node.tun.wait_for_sent(1)).await.unwrap();
    assert_eq!(node.tun.sent_packets(), vec![packet]);
    assert!(!session.is_finished());
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let node = TestExitNode::start();

    let (mut first_stream, _first_task) = node.accept(1);
    read_handshake(&mut first_stream).await;
    let (mut second_stream, _second_task) = node.accept(2);
    read_handshake(&mut second_stream).await;

    // One packet per client, interleaved on the shared TUN
    let for_first = IpPacketBuilder::ipv4()
        .src(Ipv4Addr::new(8, 8, 8, 8))
        .dst(Ipv4Addr::new(10, 8, 0, 2))
        .with_udp(53, 1111, b"first")
        .build();
    let for_second = IpPacketBuilder::ipv4()
        .src(Ipv4Addr::new(8, 8, 8, 8))
        .dst(Ipv4Addr::new(10, 8, 0, 3))
        .with_udp(53, 2222, b"second")
        .build();

    node.tun.inject_recv_packet(for_second.clone());
    node.tun.inject_recv_packet(for_first.clone());

    let first_frame = timeout(WAIT, read_frame(&mut first_stream))
        .await
        .unwrap()
        .unwrap();
    let second_frame = timeout(WAIT, read_frame(&mut second_stream))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first_frame.payload, for_first);
    assert_eq!(second_frame.payload, for_second);
}
