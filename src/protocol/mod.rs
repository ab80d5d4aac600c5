//! # Overlay Packets
//!
//! Packet tags understood by the topology layer and builders/parsers for the
//! packets it broadcasts.
//!
//! ## Components
//! - **KHL**: known-hub-list, a timestamp plus the compact addresses of the
//!   hubs this node is connected to
//! - **LNI**: local node info, the topology advertisement sent to hub peers
//! - **Compact addresses**: 6-byte IPv4 endpoints (4 address octets, then the
//!   port little-endian)

pub mod khl;
pub mod lni;

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::{constants, ProtocolError, Result};

/// Packet tags
pub mod tags {
    /// Known-hub-list
    pub const KHL: &str = "KHL";
    /// Timestamp child of KHL
    pub const TS: &str = "TS";
    /// Neighbouring hub child of KHL
    pub const NH: &str = "NH";
    /// Local node info
    pub const LNI: &str = "LNI";
    /// Node address child of LNI
    pub const NA: &str = "NA";
    /// GUID child of LNI
    pub const GU: &str = "GU";
    /// Vendor code child of LNI
    pub const V: &str = "V";
    /// Hub status child of LNI
    pub const HS: &str = "HS";
    /// Destination GUID child of an addressed packet
    pub const TO: &str = "TO";
}

/// Size of a compact IPv4 endpoint
pub const COMPACT_ADDR_LEN: usize = 6;

/// Encode an endpoint as 4 address octets followed by the port, little-endian.
pub fn encode_compact(addr: &SocketAddrV4) -> [u8; COMPACT_ADDR_LEN] {
    let mut out = [0u8; COMPACT_ADDR_LEN];
    out[..4].copy_from_slice(&addr.ip().octets());
    out[4..].copy_from_slice(&addr.port().to_le_bytes());
    out
}

/// Decode a compact endpoint from the first six bytes of `bytes`.
pub fn decode_compact(bytes: &[u8]) -> Result<SocketAddrV4> {
    if bytes.len() < COMPACT_ADDR_LEN {
        return Err(ProtocolError::MalformedPacket(constants::ERR_SHORT_READ));
    }
    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_le_bytes([bytes[4], bytes[5]]);
    Ok(SocketAddrV4::new(ip, port))
}
