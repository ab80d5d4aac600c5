//! # Bounds-Checked Reader
//!
//! Every header, length field and child region parsed from the wire goes
//! through [`Reader`]. Each read checks the remaining slice first and fails
//! closed with a format error; nothing indexes past the end of the input.
//!
//! ## Header Byte
//! ```text
//!  7 6 | 5 4 3 | 2 1 0
//!  LEN | TYPE  | FLAGS      LEN  = length-field byte count (0-3)
//!                           TYPE = type length - 1 (1-8 bytes)
//!                           FLAGS: bit0 compound, bit2 big-endian length
//! ```
//! A header byte of zero marks the end of a stream or of a compound region.

use crate::core::packet::PacketType;
use crate::error::{constants, ProtocolError, Result};

/// Flag bit: payload holds nested child packets
pub const FLAG_COMPOUND: u8 = 0x01;

/// Flag bit: length field is big-endian (never produced, always rejected)
pub const FLAG_BIG_ENDIAN: u8 = 0x04;

/// Largest payload a 3-byte length field can describe
pub const MAX_PACKET_LENGTH: usize = 0x00FF_FFFF;

/// Longest packet type tag
pub const MAX_TYPE_LEN: usize = 8;

/// Longest possible header: control byte, 3 length bytes, 8 type bytes
pub const MAX_HEADER_LEN: usize = 1 + 3 + MAX_TYPE_LEN;

/// A decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub packet_type: PacketType,
    /// Declared payload length (children included for compound packets)
    pub length: usize,
    pub compound: bool,
    /// Bytes taken by the control byte, length field and type
    pub header_len: usize,
}

impl Header {
    /// Full encoded size of the packet this header introduces.
    pub fn wire_len(&self) -> usize {
        self.header_len + self.length
    }
}

#[derive(Debug, Clone, Copy)]
struct Control {
    len_len: usize,
    type_len: usize,
    flags: u8,
}

#[inline]
fn split_control(byte: u8) -> Control {
    Control {
        len_len: ((byte & 0xC0) >> 6) as usize,
        type_len: (((byte & 0x38) >> 3) + 1) as usize,
        flags: byte & 0x07,
    }
}

#[inline]
fn le_length(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .rev()
        .fold(0usize, |acc, &b| (acc << 8) | b as usize)
}

/// Number of little-endian bytes needed for `length` in the length field.
pub fn length_field_bytes(length: usize) -> usize {
    match length {
        0 => 0,
        1..=0xFF => 1,
        0x100..=0xFFFF => 2,
        _ => 3,
    }
}

/// Encoded header kept on the stack.
#[derive(Debug, Clone, Copy)]
pub struct EncodedHeader {
    bytes: [u8; MAX_HEADER_LEN],
    len: usize,
}

impl EncodedHeader {
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Encode a packet header for `length` payload bytes.
///
/// An empty, non-compound packet with a one-byte type would produce a zero
/// control byte and is rejected.
pub fn encode_header(
    packet_type: &PacketType,
    length: usize,
    compound: bool,
) -> Result<EncodedHeader> {
    if packet_type.is_empty() {
        return Err(ProtocolError::InvalidPacketType(
            constants::ERR_EMPTY_TYPE.to_string(),
        ));
    }
    if length > MAX_PACKET_LENGTH {
        return Err(ProtocolError::OversizedPacket(length));
    }

    let len_len = length_field_bytes(length);
    let type_bytes = packet_type.as_bytes();
    if len_len == 0 && type_bytes.len() == 1 && !compound {
        return Err(ProtocolError::InvalidPacketType(
            constants::ERR_ZERO_CONTROL.to_string(),
        ));
    }

    let mut control = ((len_len as u8) << 6) | (((type_bytes.len() - 1) as u8) << 3);
    if compound {
        control |= FLAG_COMPOUND;
    }

    let mut bytes = [0u8; MAX_HEADER_LEN];
    bytes[0] = control;
    bytes[1..1 + len_len].copy_from_slice(&(length as u32).to_le_bytes()[..len_len]);
    let type_start = 1 + len_len;
    bytes[type_start..type_start + type_bytes.len()].copy_from_slice(type_bytes);

    Ok(EncodedHeader {
        bytes,
        len: type_start + type_bytes.len(),
    })
}

/// Result of inspecting the front of a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peek {
    /// Not enough bytes buffered yet
    NeedMore,
    /// The stream starts with a zero end marker
    Terminator,
    /// A whole packet is buffered
    Packet(Header),
}

/// Inspect the front of `buf` without consuming anything.
///
/// Fewer than two bytes is always `NeedMore`, even when the first one is the
/// end marker; that mirrors how stream readers call this repeatedly.
pub fn peek_packet(buf: &[u8]) -> Result<Peek> {
    if buf.len() < 2 {
        return Ok(Peek::NeedMore);
    }
    if buf[0] == 0 {
        return Ok(Peek::Terminator);
    }

    let control = split_control(buf[0]);
    if control.flags & FLAG_BIG_ENDIAN != 0 {
        return Err(ProtocolError::BigEndianLength);
    }

    let header_len = 1 + control.len_len + control.type_len;
    if buf.len() < header_len {
        return Ok(Peek::NeedMore);
    }

    let length = le_length(&buf[1..1 + control.len_len]);
    if buf.len() < header_len + length {
        return Ok(Peek::NeedMore);
    }

    let packet_type = PacketType::from_wire(&buf[1 + control.len_len..header_len])?;

    Ok(Peek::Packet(Header {
        packet_type,
        length,
        compound: control.flags & FLAG_COMPOUND != 0,
        header_len,
    }))
}

/// Cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Start at `pos`, clamped to the slice end.
    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self {
            buf,
            pos: pos.min(buf.len()),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::MalformedPacket(constants::ERR_SHORT_READ));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// Read a child header at the cursor.
    ///
    /// Returns `Ok(None)` at the end of the buffer or on a zero end marker
    /// (which is consumed). On success the cursor sits at the start of the
    /// child's payload, and the whole payload is known to be in bounds.
    pub fn read_header(&mut self) -> Result<Option<Header>> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        let byte = self.read_u8()?;
        if byte == 0 {
            return Ok(None);
        }

        let control = split_control(byte);
        if control.flags & FLAG_BIG_ENDIAN != 0 {
            return Err(ProtocolError::BigEndianLength);
        }
        if self.remaining() < control.len_len + control.type_len {
            return Err(ProtocolError::MalformedPacket(
                constants::ERR_TRUNCATED_HEADER,
            ));
        }

        let length = le_length(self.read_bytes(control.len_len)?);
        if self.remaining() < control.type_len + length {
            return Err(ProtocolError::MalformedPacket(
                constants::ERR_TRUNCATED_PAYLOAD,
            ));
        }

        let packet_type = PacketType::from_wire(self.read_bytes(control.type_len)?)?;

        Ok(Some(Header {
            packet_type,
            length,
            compound: control.flags & FLAG_COMPOUND != 0,
            header_len: 1 + control.len_len + control.type_len,
        }))
    }

    /// Walk over the children of a compound region of `length` bytes.
    ///
    /// Children are validated header by header but not materialised. Stops
    /// early at a zero end marker (consumed). Returns the bytes consumed,
    /// which is at most `length`.
    pub fn skip_compound(&mut self, length: usize) -> Result<usize> {
        let start = self.pos;
        let end = match start.checked_add(length) {
            Some(end) if end <= self.buf.len() => end,
            _ => {
                return Err(ProtocolError::MalformedPacket(
                    constants::ERR_REGION_OVERRUN,
                ))
            }
        };

        while self.pos < end {
            let byte = self.buf[self.pos];
            self.pos += 1;
            if byte == 0 {
                break;
            }

            let control = split_control(byte);
            if control.flags & FLAG_BIG_ENDIAN != 0 {
                return Err(ProtocolError::BigEndianLength);
            }
            if self.pos + control.len_len + control.type_len > end {
                return Err(ProtocolError::MalformedPacket(
                    constants::ERR_CHILD_OVERRUN,
                ));
            }

            let child_len = le_length(&self.buf[self.pos..self.pos + control.len_len]);
            self.pos += control.len_len;

            match self.pos.checked_add(control.type_len + child_len) {
                Some(child_end) if child_end <= end => self.pos = child_end,
                _ => {
                    return Err(ProtocolError::MalformedPacket(
                        constants::ERR_CHILD_OVERRUN,
                    ))
                }
            }
        }

        Ok(self.pos - start)
    }
}
