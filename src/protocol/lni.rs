//! Local-node-info packet, the topology advertisement sent to hub peers.
//!
//! ```text
//! LNI (compound)
//!   NA  6-byte compact address
//!   GU  16-byte GUID
//!   V   4-byte vendor code
//!   HS  leaf count u16 LE, leaf quota u16 LE   (hub mode only)
//! ```

use std::net::SocketAddrV4;

use uuid::Uuid;

use crate::core::packet::{Packet, Seek};
use crate::core::pool::{PacketId, PacketPool};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::{decode_compact, encode_compact, tags};

/// Leaf occupancy advertised by a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStatus {
    pub leaves: u16,
    pub max_leaves: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNodeInfo {
    pub address: SocketAddrV4,
    pub guid: Uuid,
    pub vendor: [u8; 4],
    pub hub_status: Option<HubStatus>,
}

impl LocalNodeInfo {
    /// Build the packet in `pool`; the caller holds the returned reference.
    pub fn build(&self, pool: &mut PacketPool) -> Result<PacketId> {
        let id = pool.acquire(tags::LNI, true)?;
        if let Err(e) = self.write_children(pool.packet_mut(id)?) {
            pool.release(id)?;
            return Err(e);
        }
        Ok(id)
    }

    fn write_children(&self, packet: &mut Packet) -> Result<()> {
        packet.write_child(tags::NA, &encode_compact(&self.address))?;
        packet.write_child(tags::GU, self.guid.as_bytes())?;
        packet.write_child(tags::V, &self.vendor)?;
        if let Some(hs) = self.hub_status {
            let mut status = [0u8; 4];
            status[..2].copy_from_slice(&hs.leaves.to_le_bytes());
            status[2..].copy_from_slice(&hs.max_leaves.to_le_bytes());
            packet.write_child(tags::HS, &status)?;
        }
        Ok(())
    }

    /// Read an LNI packet. `NA` and `GU` are required; unknown children are
    /// skipped.
    pub fn parse(packet: &mut Packet) -> Result<Self> {
        packet.seek(Seek::Start(0));

        let mut address = None;
        let mut guid = None;
        let mut vendor = [0u8; 4];
        let mut hub_status = None;

        if packet.is_compound() {
            while let Some(child) = packet.next_child()? {
                let payload = packet.read(child.length)?;
                let tag = child.packet_type;
                if tag == tags::NA {
                    address = Some(decode_compact(payload)?);
                } else if tag == tags::GU {
                    let bytes: [u8; 16] = payload
                        .get(..16)
                        .and_then(|b| b.try_into().ok())
                        .ok_or(ProtocolError::MalformedPacket(constants::ERR_SHORT_READ))?;
                    guid = Some(Uuid::from_bytes(bytes));
                } else if tag == tags::V && payload.len() >= 4 {
                    vendor.copy_from_slice(&payload[..4]);
                } else if tag == tags::HS && payload.len() >= 4 {
                    hub_status = Some(HubStatus {
                        leaves: u16::from_le_bytes([payload[0], payload[1]]),
                        max_leaves: u16::from_le_bytes([payload[2], payload[3]]),
                    });
                }
            }
        }

        match (address, guid) {
            (Some(address), Some(guid)) => Ok(Self {
                address,
                guid,
                vendor,
                hub_status,
            }),
            _ => Err(ProtocolError::MalformedPacket(constants::ERR_MISSING_CHILD)),
        }
    }
}
