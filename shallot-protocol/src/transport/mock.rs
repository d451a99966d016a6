//! Mock transport implementation for testing
//!
//! Simulates a TUN interface with packet injection and capture so the
//! pump and demultiplexer loops can run as real tasks without a device or
//! root privileges. `recv` blocks until a packet has been injected, like
//! a real interface read.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{TunInfo, TunTransport};
use crate::{Error, Result};

/// Mock TUN device for testing
pub struct MockTunDevice {
    info: TunInfo,
    /// Packets injected by the test, waiting to be received
    recv_queue: Mutex<VecDeque<Vec<u8>>>,
    recv_notify: Notify,
    /// Packets the code under test has sent to the "OS"
    sent: Mutex<Vec<Vec<u8>>>,
    sent_notify: Notify,
}

impl MockTunDevice {
    /// Create a new mock device
    pub fn new(name: &str, mtu: u16) -> Self {
        Self {
            info: TunInfo {
                name: name.to_string(),
                mtu,
            },
            recv_queue: Mutex::new(VecDeque::new()),
            recv_notify: Notify::new(),
            sent: Mutex::new(Vec::new()),
            sent_notify: Notify::new(),
        }
    }

    /// Inject a packet to be received (simulates the OS routing a packet
    /// into the interface)
    pub fn inject_recv_packet(&self, data: Vec<u8>) {
        self.recv_queue.lock().unwrap().push_back(data);
        self.recv_notify.notify_one();
    }

    /// Number of injected packets not yet received
    pub fn pending_recv_count(&self) -> usize {
        self.recv_queue.lock().unwrap().len()
    }

    /// Snapshot of everything sent to the interface so far
    pub fn sent_packets(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of packets sent to the interface so far
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Wait until at least `count` packets have been sent to the interface
    pub async fn wait_for_sent(&self, count: usize) {
        loop {
            let notified = self.sent_notify.notified();
            if self.sent_count() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl TunTransport for MockTunDevice {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let notified = self.recv_notify.notified();
            if let Some(packet) = self.recv_queue.lock().unwrap().pop_front() {
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                return Ok(len);
            }
            notified.await;
        }
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        if buf.len() > self.info.mtu as usize {
            return Err(Error::Transport(format!(
                "packet size {} exceeds MTU {}",
                buf.len(),
                self.info.mtu
            )));
        }

        self.sent.lock().unwrap().push(buf.to_vec());
        self.sent_notify.notify_waiters();
        Ok(buf.len())
    }

    fn info(&self) -> &TunInfo {
        &self.info
    }
}

/// Builder for test IPv4 packets
///
/// Produces a minimal but structurally valid IPv4 header (version, IHL,
/// total length, TTL, protocol, source, destination) followed by the
/// payload. Checksums are left zero.
pub struct IpPacketBuilder {
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: u8,
    ttl: u8,
    payload: Vec<u8>,
}

impl IpPacketBuilder {
    /// Create an IPv4 packet builder
    pub fn ipv4() -> Self {
        Self {
            src: Ipv4Addr::new(10, 8, 0, 2),
            dst: Ipv4Addr::new(10, 8, 0, 1),
            protocol: 17, // UDP
            ttl: 64,
            payload: Vec::new(),
        }
    }

    /// Set the source address
    pub fn src(mut self, addr: Ipv4Addr) -> Self {
        self.src = addr;
        self
    }

    /// Set the destination address
    pub fn dst(mut self, addr: Ipv4Addr) -> Self {
        self.dst = addr;
        self
    }

    /// Set the protocol number (6=TCP, 17=UDP, 1=ICMP)
    pub fn protocol(mut self, proto: u8) -> Self {
        self.protocol = proto;
        self
    }

    /// Set the payload bytes
    pub fn payload(mut self, data: Vec<u8>) -> Self {
        self.payload = data;
        self
    }

    /// Add a UDP header with the given ports and data
    pub fn with_udp(self, src_port: u16, dst_port: u16, data: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(8 + data.len());
        payload.extend_from_slice(&src_port.to_be_bytes());
        payload.extend_from_slice(&dst_port.to_be_bytes());
        payload.extend_from_slice(&((8 + data.len()) as u16).to_be_bytes());
        payload.extend_from_slice(&[0, 0]); // checksum left zero
        payload.extend_from_slice(data);
        self.protocol(17).payload(payload)
    }

    /// Build the packet bytes
    pub fn build(self) -> Vec<u8> {
        let total_length = 20 + self.payload.len();
        let mut packet = Vec::with_capacity(total_length);

        packet.push(0x45); // version 4, IHL 5
        packet.push(0x00);
        packet.extend_from_slice(&(total_length as u16).to_be_bytes());
        packet.extend_from_slice(&[0x00, 0x00]); // identification
        packet.extend_from_slice(&[0x40, 0x00]); // don't fragment
        packet.push(self.ttl);
        packet.push(self.protocol);
        packet.extend_from_slice(&[0x00, 0x00]); // checksum left zero
        packet.extend_from_slice(&self.src.octets());
        packet.extend_from_slice(&self.dst.octets());
        packet.extend_from_slice(&self.payload);

        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_packet_builder_layout() {
        let packet = IpPacketBuilder::ipv4()
            .src(Ipv4Addr::new(10, 8, 0, 2))
            .dst(Ipv4Addr::new(8, 8, 8, 8))
            .with_udp(12345, 53, b"query")
            .build();

        assert_eq!(packet[0], 0x45);
        assert_eq!(packet[9], 17);
        assert_eq!(&packet[12..16], &[10, 8, 0, 2]);
        assert_eq!(&packet[16..20], &[8, 8, 8, 8]);
        assert_eq!(packet.len(), 20 + 8 + 5);
    }

    #[tokio::test]
    async fn test_mock_recv_blocks_until_injected() {
        let device = MockTunDevice::new("tun0", 1300);

        let packet = IpPacketBuilder::ipv4().build();
        device.inject_recv_packet(packet.clone());

        let mut buf = vec![0u8; 2000];
        let n = device.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &packet[..]);
        assert_eq!(device.pending_recv_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_send_captures_and_enforces_mtu() {
        let device = MockTunDevice::new("tun0", 100);

        assert!(device.send(&[0u8; 200]).await.is_err());
        device.send(&[1, 2, 3]).await.unwrap();

        assert_eq!(device.sent_packets(), vec![vec![1, 2, 3]]);
        device.wait_for_sent(1).await;
    }

    #[tokio::test]
    async fn test_mock_recv_wakes_pending_reader() {
        let device = std::sync::Arc::new(MockTunDevice::new("tun0", 1300));

        let reader = device.clone();
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 2000];
            reader.recv(&mut buf).await.unwrap()
        });

        tokio::task::yield_now().await;
        device.inject_recv_packet(vec![0x45, 0x00]);

        assert_eq!(task.await.unwrap(), 2);
    }
}
