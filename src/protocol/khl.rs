//! Known-hub-list packet.
//!
//! ```text
//! KHL (compound)
//!   TS  u32 LE unix timestamp
//!   NH  6-byte compact address     (zero or more)
//! ```

use std::net::SocketAddrV4;

use crate::core::packet::{Packet, Seek};
use crate::core::pool::{PacketId, PacketPool};
use crate::error::Result;
use crate::protocol::{decode_compact, encode_compact, tags};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownHubList {
    pub timestamp: Option<u32>,
    pub hubs: Vec<SocketAddrV4>,
}

impl KnownHubList {
    pub fn new(timestamp: u32, hubs: Vec<SocketAddrV4>) -> Self {
        Self {
            timestamp: Some(timestamp),
            hubs,
        }
    }

    /// Build the packet in `pool`; the caller holds the returned reference.
    pub fn build(&self, pool: &mut PacketPool) -> Result<PacketId> {
        let id = pool.acquire(tags::KHL, true)?;
        if let Err(e) = self.write_children(pool.packet_mut(id)?) {
            pool.release(id)?;
            return Err(e);
        }
        Ok(id)
    }

    fn write_children(&self, packet: &mut Packet) -> Result<()> {
        if let Some(ts) = self.timestamp {
            packet.write_child(tags::TS, &ts.to_le_bytes())?;
        }
        for hub in &self.hubs {
            packet.write_child(tags::NH, &encode_compact(hub))?;
        }
        Ok(())
    }

    /// Read a KHL packet's children. Unknown children are skipped.
    pub fn parse(packet: &mut Packet) -> Result<Self> {
        packet.seek(Seek::Start(0));
        let mut out = Self::default();
        if !packet.is_compound() {
            return Ok(out);
        }

        while let Some(child) = packet.next_child()? {
            let payload = packet.read(child.length)?;
            if child.packet_type == tags::TS && payload.len() >= 4 {
                out.timestamp = Some(u32::from_le_bytes([
                    payload[0], payload[1], payload[2], payload[3],
                ]));
            } else if child.packet_type == tags::NH {
                out.hubs.push(decode_compact(payload)?);
            }
        }
        Ok(out)
    }
}
