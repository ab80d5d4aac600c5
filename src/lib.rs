//! # overlay-protocol
//!
//! Protocol and topology core for a hub/leaf peer-to-peer overlay.
//!
//! ## Modules
//! - [`core`]: wire format, packet pool and stream codec
//! - [`protocol`]: known-hub-list and local-node-info packets
//! - [`network`]: topology manager, router and routing table
//! - [`service`]: the network worker
//! - [`config`]: TOML/env configuration
//! - [`utils`]: logging, metrics and time helpers
//!
//! Sockets, handshakes, the host cache and the datagram layer are supplied by
//! the embedding application through the traits in [`network::services`] and
//! [`network::node`].

pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod protocol;
pub mod service;
pub mod utils;

pub use crate::config::NetworkConfig;
pub use crate::core::{Packet, PacketId, PacketPool, PacketType};
pub use crate::error::{ProtocolError, Result};
pub use crate::network::Network;
pub use crate::service::Overlay;
