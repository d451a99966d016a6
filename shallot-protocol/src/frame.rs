//! Frame structure and stream codec
//!
//! ```text
//! +--------+--------+--------+----------------------+
//! | Byte 0 | Byte 1 | Byte 2 | Bytes 3..3+length    |
//! +--------+--------+--------+----------------------+
//! |  Type  | Length (uint16, big-endian) | Payload  |
//! +--------+--------+--------+----------------------+
//! ```
//!
//! The length prefix is authoritative: a frame is either read in full or
//! the stream is considered failed. There is no magic, version, or
//! checksum; TLS provides integrity underneath.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Error, Result};

/// Frame header length in bytes: type (1) + payload length (2).
pub const FRAME_HEADER_LEN: usize = 3;

/// Maximum frame payload in bytes (the length field is a u16).
pub const MAX_PAYLOAD: usize = 65_535;

/// Frame type byte.
///
/// Unknown values survive decoding so forward-compatible peers can discard
/// them on the data path instead of failing the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameType(pub u8);

impl FrameType {
    /// An encapsulated IPv4 packet, exactly as read from a tunnel device.
    pub const DATA: FrameType = FrameType(0x01);
    /// Reserved liveness probe. Defined in the type space, never sent.
    pub const KEEPALIVE: FrameType = FrameType(0x02);
    /// Server-to-client virtual address assignment.
    pub const HANDSHAKE: FrameType = FrameType(0x03);

    /// Get the raw type byte
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    pub const fn is_data(self) -> bool {
        self.0 == Self::DATA.0
    }

    pub const fn is_keepalive(self) -> bool {
        self.0 == Self::KEEPALIVE.0
    }

    pub const fn is_handshake(self) -> bool {
        self.0 == Self::HANDSHAKE.0
    }

    /// Whether this is one of the defined protocol types
    pub const fn is_known(self) -> bool {
        self.is_data() || self.is_keepalive() || self.is_handshake()
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::DATA => write!(f, "DATA"),
            Self::KEEPALIVE => write!(f, "KEEPALIVE"),
            Self::HANDSHAKE => write!(f, "HANDSHAKE"),
            Self(other) => write!(f, "0x{:02X}", other),
        }
    }
}

/// A complete frame: type plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type
    pub frame_type: FrameType,
    /// Frame payload
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    /// Create a data frame carrying one IPv4 packet
    pub fn data(payload: Vec<u8>) -> Self {
        Self::new(FrameType::DATA, payload)
    }

    /// Create a handshake frame carrying an address assignment payload
    pub fn handshake(payload: Vec<u8>) -> Self {
        Self::new(FrameType::HANDSHAKE, payload)
    }

    /// Encode this frame to bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self.frame_type, &self.payload)
    }
}

/// Encode a frame to a freshly allocated buffer
///
/// Fails with [`Error::PayloadTooLarge`] if the payload exceeds
/// [`MAX_PAYLOAD`].
pub fn encode(frame_type: FrameType, payload: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    encode_into(frame_type, payload, &mut buf)?;
    Ok(buf)
}

/// Encode a frame into an existing buffer
///
/// The buffer is cleared before writing. Returns the number of bytes
/// written. This is the efficient path for per-packet encoding loops that
/// reuse one buffer.
pub fn encode_into(frame_type: FrameType, payload: &[u8], buf: &mut Vec<u8>) -> Result<usize> {
    if payload.len() > MAX_PAYLOAD {
        return Err(Error::PayloadTooLarge { len: payload.len() });
    }

    buf.clear();
    buf.reserve(FRAME_HEADER_LEN + payload.len());
    buf.push(frame_type.as_u8());
    buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf.len())
}

/// Read exactly one frame from the stream
///
/// Full-read semantics: retries until the header and payload are filled.
/// Fails with [`Error::EndOfStream`] when the stream terminates cleanly
/// before the first header byte and with [`Error::Truncated`] when it
/// terminates mid-header or mid-payload.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    read_full(reader, &mut header, true).await?;

    let frame_type = FrameType(header[0]);
    let length = u16::from_be_bytes([header[1], header[2]]) as usize;

    let mut payload = vec![0u8; length];
    read_full(reader, &mut payload, false).await?;

    Ok(Frame {
        frame_type,
        payload,
    })
}

/// Fill `buf` completely, retrying short reads.
///
/// `frame_start` marks the read that begins a frame: end-of-stream before
/// any of its bytes arrive is a clean close, not a truncation.
async fn read_full<R>(reader: &mut R, buf: &mut [u8], frame_start: bool) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(if frame_start && filled == 0 {
                Error::EndOfStream
            } else {
                Error::Truncated {
                    expected: buf.len(),
                    actual: filled,
                }
            });
        }
        filled += n;
    }
    Ok(())
}
