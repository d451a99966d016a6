//! Shallot VPN wire protocol
//!
//! Everything on a tunnel stream is a length-prefixed typed frame carried
//! over TLS. This crate owns the frame codec, the handshake address
//! payload, and the packet-device abstraction shared by the engine and the
//! test suite.

mod address;
mod error;
mod frame;
pub mod transport;

pub use address::AssignedAddress;
pub use error::{Error, Result};
pub use frame::{encode, encode_into, read_frame, Frame, FrameType, FRAME_HEADER_LEN, MAX_PAYLOAD};

/// MTU configured on tunnel interfaces.
///
/// Leaves room for the 3-byte frame header plus TLS record overhead inside
/// a 1500-byte path.
pub const TUNNEL_MTU: u16 = 1300;

/// Interface read buffer size.
pub const IFACE_BUFSIZE: usize = 2000;
