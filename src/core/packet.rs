//! # Packet
//!
//! In-memory form of one wire packet: type tag, compound flag, payload buffer,
//! a read/write cursor and a holder count used by the [`PacketPool`].
//!
//! Packets are built by appending (or positionally inserting) child packets
//! and raw fields, and read back through the bounds-checked
//! [`Reader`](crate::core::reader::Reader). Parsing never trusts a declared
//! length until it has been checked against the bytes actually present.
//!
//! [`PacketPool`]: crate::core::pool::PacketPool

use std::borrow::Cow;
use std::fmt;

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use crate::core::reader::{encode_header, peek_packet, Header, Peek, Reader, MAX_TYPE_LEN};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::tags;

/// Packet type tag: 1 to 8 bytes, no embedded null.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PacketType {
    bytes: [u8; MAX_TYPE_LEN],
    len: u8,
}

impl PacketType {
    /// Build a tag from a string such as `"KHL"`.
    pub fn new(tag: &str) -> Result<Self> {
        Self::from_bytes(tag.as_bytes())
    }

    /// Build a tag from raw bytes, rejecting empty, overlong or null-bearing tags.
    pub fn from_bytes(tag: &[u8]) -> Result<Self> {
        if tag.is_empty() {
            return Err(ProtocolError::InvalidPacketType(
                constants::ERR_EMPTY_TYPE.to_string(),
            ));
        }
        if tag.len() > MAX_TYPE_LEN {
            return Err(ProtocolError::InvalidPacketType(
                constants::ERR_LONG_TYPE.to_string(),
            ));
        }
        if tag.contains(&0) {
            return Err(ProtocolError::InvalidPacketType(
                constants::ERR_NULL_IN_TYPE.to_string(),
            ));
        }
        let mut bytes = [0u8; MAX_TYPE_LEN];
        bytes[..tag.len()].copy_from_slice(tag);
        Ok(Self {
            bytes,
            len: tag.len() as u8,
        })
    }

    /// Tag bytes read off the wire; a null byte here is malformed input.
    pub(crate) fn from_wire(tag: &[u8]) -> Result<Self> {
        if tag.contains(&0) {
            return Err(ProtocolError::MalformedPacket(constants::ERR_NULL_IN_TYPE));
        }
        Self::from_bytes(tag)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl PartialEq<str> for PacketType {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for PacketType {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl fmt::Debug for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketType({:?})", self.as_str())
    }
}

/// Cursor origin for [`Packet::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seek {
    Start(usize),
    /// Offset back from the end of the buffer
    End(usize),
}

/// A child header as seen by [`Packet::next_child`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Child {
    pub packet_type: PacketType,
    /// Bytes of the child's own payload, after any nested children
    pub length: usize,
    pub compound: bool,
}

/// One packet of the overlay wire format.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    packet_type: PacketType,
    compound: bool,
    body: Vec<u8>,
    position: usize,
    ref_count: u32,
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.packet_type == other.packet_type
            && self.compound == other.compound
            && self.body == other.body
    }
}

impl Eq for Packet {}

impl Packet {
    /// Create a standalone (unpooled) packet.
    pub fn new(tag: &str, compound: bool) -> Result<Self> {
        Ok(Self::with_type(PacketType::new(tag)?, compound))
    }

    pub fn with_type(packet_type: PacketType, compound: bool) -> Self {
        Self {
            packet_type,
            compound,
            ..Self::default()
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn set_type(&mut self, packet_type: PacketType) {
        self.packet_type = packet_type;
    }

    pub fn is_compound(&self) -> bool {
        self.compound
    }

    pub fn set_compound(&mut self, compound: bool) {
        self.compound = compound;
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.body.len() - self.position
    }

    /// Number of outstanding holders while the packet lives in a pool.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub(crate) fn set_ref_count(&mut self, count: u32) {
        self.ref_count = count;
    }

    /// Clear contents for reuse; capacity is kept.
    pub(crate) fn reset(&mut self) {
        debug_assert_eq!(self.ref_count, 0, "reset of a referenced packet");
        self.body.clear();
        self.position = 0;
        self.packet_type = PacketType::default();
        self.compound = false;
    }

    /// Move the cursor, clamped to the buffer.
    pub fn seek(&mut self, to: Seek) {
        self.position = match to {
            Seek::Start(n) => n.min(self.body.len()),
            Seek::End(n) => self.body.len().saturating_sub(n),
        };
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Append raw bytes.
    pub fn write(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    /// Insert raw bytes at `offset`, shifting the tail. Offsets past the end append.
    pub fn insert(&mut self, offset: usize, bytes: &[u8]) {
        let offset = offset.min(self.body.len());
        self.body.splice(offset..offset, bytes.iter().copied());
        if self.position > offset {
            self.position += bytes.len();
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.body.push(v);
    }

    pub fn write_u16_le(&mut self, v: u16) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32_le(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    /// Append a child header; the caller appends `length` payload bytes after it.
    ///
    /// Writing any child marks this packet compound.
    pub fn write_packet_header(
        &mut self,
        packet_type: &PacketType,
        length: usize,
        compound: bool,
    ) -> Result<()> {
        let header = encode_header(packet_type, length, compound)?;
        self.write(header.as_slice());
        self.compound = true;
        Ok(())
    }

    /// Append a leaf child with an opaque payload.
    pub fn write_child(&mut self, tag: &str, payload: &[u8]) -> Result<()> {
        let packet_type = PacketType::new(tag)?;
        self.write_packet_header(&packet_type, payload.len(), false)?;
        self.write(payload);
        Ok(())
    }

    /// Append an already built packet as a child, including its children.
    pub fn write_packet(&mut self, child: &Packet) -> Result<()> {
        self.write_packet_header(&child.packet_type, child.body.len(), child.compound)?;
        self.write(&child.body);
        Ok(())
    }

    /// Insert an already built packet as a child at `offset`, which must be a
    /// child boundary.
    ///
    /// A plain packet with a payload has no boundary other than offset 0;
    /// there the child is followed by an end marker so the result still
    /// parses as children followed by payload.
    pub fn insert_packet(&mut self, offset: usize, child: &Packet) -> Result<()> {
        let header = encode_header(&child.packet_type, child.body.len(), child.compound)?;
        let mut encoded = Vec::with_capacity(header.len() + child.body.len() + 1);
        encoded.extend_from_slice(header.as_slice());
        encoded.extend_from_slice(&child.body);
        if !self.compound && !self.body.is_empty() {
            if offset != 0 {
                return Err(ProtocolError::MalformedPacket(constants::ERR_CHILD_OFFSET));
            }
            encoded.push(0);
        }
        self.insert(offset, &encoded);
        self.compound = true;
        Ok(())
    }

    /// Append a UTF-8 string, optionally null-terminated.
    pub fn write_string(&mut self, s: &str, terminate: bool) {
        self.write(s.as_bytes());
        if terminate {
            self.body.push(0);
        }
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    pub fn read(&mut self, n: usize) -> Result<&[u8]> {
        let mut reader = Reader::at(&self.body, self.position);
        let out = reader.read_bytes(n)?;
        self.position = reader.position();
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let b = self.read(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.read(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a child header at the cursor; `None` at the end of children.
    pub fn read_header(&mut self) -> Result<Option<Header>> {
        let mut reader = Reader::at(&self.body, self.position);
        let header = reader.read_header()?;
        self.position = reader.position();
        Ok(header)
    }

    /// Skip the children of a compound region of `length` bytes at the cursor.
    /// Returns the bytes consumed.
    pub fn skip_compound(&mut self, length: usize) -> Result<usize> {
        let mut reader = Reader::at(&self.body, self.position);
        let consumed = reader.skip_compound(length)?;
        self.position = reader.position();
        Ok(consumed)
    }

    /// Skip this packet's own children, leaving the cursor on its payload.
    pub fn skip_children(&mut self) -> Result<()> {
        if self.compound {
            self.skip_compound(self.remaining())?;
        }
        Ok(())
    }

    /// Read the next child, stepping over its nested children.
    ///
    /// The cursor is left at the child's own payload and `length` covers only
    /// that payload; the caller reads or skips exactly `length` bytes next.
    pub fn next_child(&mut self) -> Result<Option<Child>> {
        let Some(header) = self.read_header()? else {
            return Ok(None);
        };
        let mut length = header.length;
        if header.compound {
            length -= self.skip_compound(header.length)?;
        }
        Ok(Some(Child {
            packet_type: header.packet_type,
            length,
            compound: header.compound,
        }))
    }

    /// Read a null-terminated UTF-8 string at the cursor.
    ///
    /// Without a terminator the string runs to the end of the buffer.
    pub fn read_string(&mut self) -> String {
        let tail = &self.body[self.position..];
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        let s = String::from_utf8_lossy(&tail[..end]).into_owned();
        self.position = (self.position + end + 1).min(self.body.len());
        s
    }

    // ------------------------------------------------------------------
    // Addressing
    // ------------------------------------------------------------------

    /// Destination GUID carried by a leading `TO` child, if any.
    ///
    /// Does not move the cursor.
    pub fn destination(&self) -> Result<Option<Uuid>> {
        if !self.compound {
            return Ok(None);
        }
        let mut reader = Reader::new(&self.body);
        let Some(header) = reader.read_header()? else {
            return Ok(None);
        };
        if header.packet_type != tags::TO {
            return Ok(None);
        }
        if header.length < 16 {
            return Err(ProtocolError::MalformedPacket(
                constants::ERR_SHORT_DESTINATION,
            ));
        }
        let mut guid = [0u8; 16];
        guid.copy_from_slice(reader.read_bytes(16)?);
        Ok(Some(Uuid::from_bytes(guid)))
    }

    /// Address this packet to `guid` by inserting a `TO` child in front,
    /// replacing an existing one.
    pub fn set_destination(&mut self, guid: &Uuid) -> Result<()> {
        if self.destination()?.is_some() {
            let mut reader = Reader::new(&self.body);
            if let Some(header) = reader.read_header()? {
                self.body.drain(..header.wire_len());
                self.position = self.position.saturating_sub(header.wire_len());
            }
        }
        let mut to = Packet::with_type(PacketType::new(tags::TO)?, false);
        to.write(guid.as_bytes());
        self.insert_packet(0, &to)
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Encoded size of this packet.
    pub fn wire_len(&self) -> Result<usize> {
        let header = encode_header(&self.packet_type, self.body.len(), self.compound)?;
        Ok(header.len() + self.body.len())
    }

    /// Append the encoded packet to `out`.
    pub fn write_to(&self, out: &mut BytesMut) -> Result<()> {
        let header = encode_header(&self.packet_type, self.body.len(), self.compound)?;
        out.reserve(header.len() + self.body.len());
        out.put_slice(header.as_slice());
        out.put_slice(&self.body);
        Ok(())
    }

    /// Encode this packet, children included, into a standalone byte vector.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        let header = encode_header(&self.packet_type, self.body.len(), self.compound)?;
        let mut out = Vec::with_capacity(header.len() + self.body.len());
        out.extend_from_slice(header.as_slice());
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    /// Decode one packet from the front of `bytes`.
    ///
    /// Returns the packet and the bytes consumed. Leading end markers are
    /// skipped and counted as consumed. Insufficient input is
    /// [`ProtocolError::Incomplete`]; malformed input is a format error.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut start = 0;
        loop {
            let rest = &bytes[start..];
            match peek_packet(rest)? {
                Peek::NeedMore => return Err(ProtocolError::Incomplete),
                Peek::Terminator => start += 1,
                Peek::Packet(header) => {
                    let mut packet = Self::with_type(header.packet_type, header.compound);
                    packet.fill_from(&rest[header.header_len..header.wire_len()]);
                    return Ok((packet, start + header.wire_len()));
                }
            }
        }
    }

    /// Replace the body with `payload` and rewind.
    pub(crate) fn fill_from(&mut self, payload: &[u8]) {
        self.body.clear();
        self.body.extend_from_slice(payload);
        self.position = 0;
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Space separated upper-case hex dump of the payload.
    pub fn to_hex(&self) -> String {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";
        let mut out = String::with_capacity(self.body.len() * 3);
        for (i, b) in self.body.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
        out
    }

    /// Payload with control and non-ASCII bytes shown as `.`.
    pub fn to_ascii(&self) -> String {
        self.body
            .iter()
            .map(|&b| if (32..127).contains(&b) { b as char } else { '.' })
            .collect()
    }
}
