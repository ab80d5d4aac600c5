//! # Core Protocol Components
//!
//! Low-level packet handling: wire format, bounds-checked parsing, pooled
//! allocation and stream framing.
//!
//! ## Components
//! - **Reader**: header encode/decode and recursive skip over `&[u8]`
//! - **Packet**: tagged, optionally compound packet with a cursor
//! - **Pool**: slab arena with holder counting
//! - **Codec**: resumable stream parsing and a tokio-util codec
//!
//! ## Wire Format
//! ```text
//! [Control(1)] [Length(0-3, LE)] [Type(1-8)] [Payload(Length)]
//!
//! Control = len_len << 6 | (type_len - 1) << 3 | flags
//! flags   = 0x01 compound, 0x04 big-endian length (rejected)
//! ```
//! A compound payload is a run of child packets, optionally closed by a zero
//! byte, followed by the packet's own payload.
//!
//! ## Security
//! - Maximum payload length: 16MB - 1 (three length bytes)
//! - Every declared length is checked against the bytes present before use
//! - Children may never extend past their parent's region

pub mod codec;
pub mod packet;
pub mod pool;
pub mod reader;

pub use codec::{parse_from_stream, PacketCodec, StreamRead};
pub use packet::{Packet, PacketType, Seek};
pub use pool::{PacketId, PacketPool};
