//! # Error Types
//!
//! Error handling for the overlay protocol core.
//!
//! This module defines the error variants raised while decoding packets from the
//! wire, managing the packet pool, and driving the overlay worker.
//!
//! ## Error Categories
//! - **Format errors**: malformed or truncated packets. The byte source that
//!   produced them must be treated as compromised and closed.
//! - **Incomplete input**: more bytes are needed; never a reason to close a
//!   connection.
//! - **Pool errors**: stale packet ids handed back to the pool.
//! - **Service errors**: configuration problems and worker lifecycle misuse.
//!
//! "No route" and "dropped by forwarding policy" are not errors; they are
//! reported through [`crate::network::router::RouteOutcome`] and
//! [`crate::network::router::Forwarding`].
//!
//! ## Example Usage
//! ```rust
//! use overlay_protocol::core::packet::Packet;
//! use overlay_protocol::error::ProtocolError;
//! use tracing::warn;
//!
//! fn inspect(bytes: &[u8]) {
//!     match Packet::from_bytes(bytes) {
//!         Ok((packet, used)) => println!("{} ({used} bytes)", packet.packet_type()),
//!         Err(ProtocolError::Incomplete) => println!("waiting for more data"),
//!         Err(e) if e.is_format_error() => warn!(error = %e, "dropping peer"),
//!         Err(e) => warn!(error = %e, "unexpected error"),
//!     }
//! }
//! # inspect(&[0x08, b'A']);
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Format errors raised by the bounds-checked reader
    pub const ERR_TRUNCATED_HEADER: &str = "Packet header exceeds available bytes";
    pub const ERR_TRUNCATED_PAYLOAD: &str = "Declared payload exceeds available bytes";
    pub const ERR_CHILD_OVERRUN: &str = "Child packet extends past parent boundary";
    pub const ERR_REGION_OVERRUN: &str = "Compound region extends past buffer end";
    pub const ERR_NULL_IN_TYPE: &str = "Packet type contains a null byte";
    pub const ERR_SHORT_READ: &str = "Read past end of packet";
    pub const ERR_SHORT_DESTINATION: &str = "Destination child shorter than 16 bytes";
    pub const ERR_MISSING_CHILD: &str = "Required child packet missing";

    /// Packet construction errors
    pub const ERR_EMPTY_TYPE: &str = "Packet type must not be empty";
    pub const ERR_LONG_TYPE: &str = "Packet type longer than 8 bytes";
    pub const ERR_ZERO_CONTROL: &str = "Empty one-byte packet would encode as an end marker";
    pub const ERR_CHILD_OFFSET: &str = "Plain packet payload only takes children at offset 0";

    /// Worker lifecycle errors
    pub const ERR_WORKER_SPAWN: &str = "Failed to spawn network worker";
    pub const ERR_WORKER_PANICKED: &str = "Network worker panicked";
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

// ProtocolError is the primary error type for all overlay operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Malformed packet: {0}")]
    #[serde(skip_deserializing)]
    MalformedPacket(&'static str),

    #[error("Big-endian length encoding is not supported")]
    BigEndianLength,

    #[error("Insufficient data")]
    Incomplete,

    #[error("Invalid packet type: {0}")]
    InvalidPacketType(String),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Invalid packet id: {0}")]
    InvalidPacketId(u32),

    #[error("Packet pool exhausted")]
    PoolExhausted,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Overlay already running")]
    AlreadyRunning,

    #[error("Overlay not running")]
    NotRunning,

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// True for errors caused by malformed wire input.
    ///
    /// The connection or datagram source that produced such bytes should be
    /// discarded; retrying the parse cannot succeed.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedPacket(_)
                | ProtocolError::BigEndianLength
                | ProtocolError::OversizedPacket(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
