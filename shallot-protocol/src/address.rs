//! Handshake address payload
//!
//! The server assigns each client a virtual IPv4 address by sending one
//! HANDSHAKE frame whose payload is the ASCII CIDR form `"A.B.C.D/N"`.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::{Error, Result};

/// A virtual address assignment: IPv4 address plus prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssignedAddress {
    /// The assigned virtual IPv4 address
    pub ip: Ipv4Addr,
    /// Network prefix length (e.g. 24 for /24)
    pub prefix_len: u8,
}

impl AssignedAddress {
    /// Create a new assignment
    pub fn new(ip: Ipv4Addr, prefix_len: u8) -> Self {
        Self { ip, prefix_len }
    }

    /// Encode as the handshake frame payload
    pub fn to_payload(self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parse from a handshake frame payload
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::Address("payload is not valid ASCII".to_string()))?;
        text.parse()
    }
}

impl fmt::Display for AssignedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len)
    }
}

impl FromStr for AssignedAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (ip_part, prefix_part) = s
            .split_once('/')
            .ok_or_else(|| Error::Address(format!("missing prefix length in {:?}", s)))?;

        let ip: Ipv4Addr = ip_part
            .parse()
            .map_err(|_| Error::Address(format!("invalid IPv4 address: {:?}", ip_part)))?;

        let prefix_len: u8 = prefix_part
            .parse()
            .map_err(|_| Error::Address(format!("invalid prefix length: {:?}", prefix_part)))?;

        if prefix_len > 32 {
            return Err(Error::Address(format!(
                "prefix length {} out of range (max 32)",
                prefix_len
            )));
        }

        Ok(Self { ip, prefix_len })
    }
}
