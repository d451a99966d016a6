//! Client session registry
//!
//! Maps each assigned virtual IPv4 address to a handle for the owning
//! session. The demultiplexer looks up on every packet while inserts and
//! removals happen only on connect and disconnect, so the map sits behind
//! an `RwLock`; lookups clone a cheap handle out of the read guard and
//! never serialize against each other.
//!
//! A lookup may race a removal: the cloned handle stays valid, and a
//! write through it to a session that is tearing down surfaces as an I/O
//! error on that session's stream, never as a frame delivered to some
//! other session.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};

use shallot_protocol::Frame;

use crate::Result;

/// Write side of one client session
///
/// Every outbound frame for a client goes through this handle, which
/// holds the writer lock for the whole frame. Frames from different tasks
/// cannot interleave on the wire.
pub struct ClientHandle<W> {
    /// The session's assigned virtual address
    pub virtual_ip: Ipv4Addr,
    /// The peer's transport address
    pub peer_addr: SocketAddr,
    writer: Arc<Mutex<W>>,
}

impl<W> Clone for ClientHandle<W> {
    fn clone(&self) -> Self {
        Self {
            virtual_ip: self.virtual_ip,
            peer_addr: self.peer_addr,
            writer: self.writer.clone(),
        }
    }
}

impl<W> ClientHandle<W>
where
    W: AsyncWrite + Unpin,
{
    /// Create a handle owning the session's write half
    pub fn new(virtual_ip: Ipv4Addr, peer_addr: SocketAddr, writer: W) -> Self {
        Self {
            virtual_ip,
            peer_addr,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Send one frame to this client
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let encoded = frame.encode()?;
        self.send_encoded(&encoded).await
    }

    /// Send pre-encoded frame bytes to this client
    pub(crate) async fn send_encoded(&self, encoded: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut down the write half, closing the stream for the peer
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Mapping from virtual IPv4 address to the owning session's handle
pub struct ClientRegistry<W> {
    inner: Arc<RwLock<HashMap<Ipv4Addr, ClientHandle<W>>>>,
}

impl<W> Clone for ClientRegistry<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W> Default for ClientRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> ClientRegistry<W> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a session under its virtual address
    ///
    /// Returns `false` if the address is already registered; the existing
    /// entry is left untouched. Two live sessions never share an address,
    /// so a collision means the caller's allocation went wrong.
    pub async fn insert(&self, handle: ClientHandle<W>) -> bool {
        let mut map = self.inner.write().await;
        match map.entry(handle.virtual_ip) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(handle);
                true
            }
        }
    }

    /// Remove a session by its virtual address
    pub async fn remove(&self, ip: Ipv4Addr) -> Option<ClientHandle<W>> {
        self.inner.write().await.remove(&ip)
    }

    /// Look up the session owning a virtual address
    pub async fn lookup(&self, ip: Ipv4Addr) -> Option<ClientHandle<W>> {
        self.inner.read().await.get(&ip).cloned()
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_handle(last_octet: u8) -> (ClientHandle<tokio::io::DuplexStream>, tokio::io::DuplexStream) {
        let (near, far) = tokio::io::duplex(4096);
        let handle = ClientHandle::new(
            Ipv4Addr::new(10, 8, 0, last_octet),
            "127.0.0.1:55555".parse().unwrap(),
            near,
        );
        (handle, far)
    }

    #[tokio::test]
    async fn test_insert_lookup_remove() {
        let registry = ClientRegistry::new();
        let (handle, _far) = test_handle(2);
        let ip = handle.virtual_ip;

        assert!(registry.insert(handle).await);
        assert_eq!(registry.len().await, 1);
        assert!(registry.lookup(ip).await.is_some());

        assert!(registry.remove(ip).await.is_some());
        assert!(registry.lookup(ip).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let registry = ClientRegistry::new();
        let (first, _far_a) = test_handle(2);
        let (second, _far_b) = test_handle(2);

        assert!(registry.insert(first).await);
        assert!(!registry.insert(second).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_lookup_survives_concurrent_remove() {
        use shallot_protocol::{read_frame, Frame};

        let registry = ClientRegistry::new();
        let (handle, mut far) = test_handle(2);
        let ip = handle.virtual_ip;
        registry.insert(handle).await;

        // A dispatcher picked up the handle...
        let looked_up = registry.lookup(ip).await.unwrap();

        // ...and the session got removed in between
        registry.remove(ip).await;

        // The write still goes to the session the lookup named, never to
        // anything else registered under that address later
        let (replacement, _far_c) = test_handle(2);
        registry.insert(replacement).await;

        looked_up
            .send_frame(&Frame::data(vec![1, 2, 3]))
            .await
            .unwrap();

        let frame = read_frame(&mut far).await.unwrap();
        assert_eq!(frame.payload, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_send_frame_serializes_writers() {
        let registry: ClientRegistry<tokio::io::DuplexStream> = ClientRegistry::new();
        let (handle, mut far) = test_handle(2);
        registry.insert(handle.clone()).await;

        // Two tasks write through the same handle; frames must not
        // interleave on the wire
        let a = handle.clone();
        let b = handle.clone();
        let t1 = tokio::spawn(async move {
            for _ in 0..50 {
                a.send_frame(&Frame::data(vec![0xAA; 100])).await.unwrap();
            }
        });
        let t2 = tokio::spawn(async move {
            for _ in 0..50 {
                b.send_frame(&Frame::data(vec![0xBB; 100])).await.unwrap();
            }
        });

        let reader = tokio::spawn(async move {
            let mut frames = Vec::new();
            for _ in 0..100 {
                frames.push(shallot_protocol::read_frame(&mut far).await.unwrap());
            }
            frames
        });

        t1.await.unwrap();
        t2.await.unwrap();
        let frames = reader.await.unwrap();

        for frame in frames {
            assert_eq!(frame.payload.len(), 100);
            assert!(frame.payload.iter().all(|&b| b == 0xAA) || frame.payload.iter().all(|&b| b == 0xBB));
        }
    }
}
