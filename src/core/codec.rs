//! # Stream Codec
//!
//! Incremental decoding of packets from a byte stream.
//!
//! [`parse_from_stream`] is the pooled path used on the network worker: it is
//! resumable and never consumes bytes unless a whole packet (or a single end
//! marker) is available. [`PacketCodec`] is the same logic behind
//! `tokio_util::codec` for owned packets, suitable for `Framed` transports.
//!
//! ## Outcomes
//! - fewer than two bytes, or a partial packet: "need more", nothing consumed
//! - a leading zero byte: consumed, "no packet, try next"
//! - a complete packet: consumed exactly, returned
//! - malformed input: format error; the source must be closed

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::core::packet::Packet;
use crate::core::pool::{PacketId, PacketPool};
use crate::core::reader::{peek_packet, Peek};
use crate::error::{ProtocolError, Result};

/// Result of one [`parse_from_stream`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRead {
    /// Call again once more bytes have arrived
    NeedMore,
    /// An end marker was consumed; call again
    Terminator,
    /// A packet was decoded into the pool with one holder
    Packet(PacketId),
}

/// Decode the next packet from `buffer` into `pool`.
pub fn parse_from_stream(pool: &mut PacketPool, buffer: &mut BytesMut) -> Result<StreamRead> {
    match peek_packet(&buffer[..])? {
        Peek::NeedMore => Ok(StreamRead::NeedMore),
        Peek::Terminator => {
            buffer.advance(1);
            Ok(StreamRead::Terminator)
        }
        Peek::Packet(header) => {
            let id = pool.acquire_typed(header.packet_type, header.compound)?;
            let packet = pool.packet_mut(id)?;
            packet.fill_from(&buffer[header.header_len..header.wire_len()]);
            buffer.advance(header.wire_len());
            trace!(
                packet_type = %header.packet_type,
                length = header.length,
                compound = header.compound,
                "Decoded packet from stream"
            );
            Ok(StreamRead::Packet(id))
        }
    }
}

/// Framing codec producing owned [`Packet`]s.
///
/// End markers between packets are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match peek_packet(&src[..])? {
                Peek::NeedMore => return Ok(None),
                Peek::Terminator => src.advance(1),
                Peek::Packet(header) => {
                    let frame = src.split_to(header.wire_len());
                    let mut packet = Packet::with_type(header.packet_type, header.compound);
                    packet.fill_from(&frame[header.header_len..]);
                    return Ok(Some(packet));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(packet) = self.decode(src)? {
            return Ok(Some(packet));
        }
        // A lone trailing end marker is a clean close
        if src.len() == 1 && src[0] == 0 {
            src.advance(1);
        }
        if src.is_empty() {
            Ok(None)
        } else {
            debug!(remaining = src.len(), "Stream closed mid-packet");
            Err(ProtocolError::Incomplete)
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        item.write_to(dst)
    }
}
