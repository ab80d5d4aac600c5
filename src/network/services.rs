//! Collaborators the topology manager drives but does not implement.
//!
//! All of them are non-blocking handoffs: they are called on the network
//! worker and must return promptly.

use std::net::SocketAddrV4;

use crate::core::pool::{PacketId, PacketPool};
use crate::error::Result;
use crate::network::node::PeerConnection;
use crate::network::routing_table::RoutingIndex;

/// Store of known peer addresses.
pub trait HostCache: Send {
    fn is_empty(&self) -> bool;

    /// Next candidate worth dialling at `now`, if any.
    fn connectable(&mut self, now: u64) -> Option<SocketAddrV4>;

    fn mark_connect_attempt(&mut self, addr: SocketAddrV4, now: u64);

    fn save(&mut self) -> Result<()>;
}

/// Out-of-band source of initial hosts, used while the host cache is empty.
pub trait Bootstrap: Send {
    fn is_requesting(&self) -> bool;

    fn request_random(&mut self);

    fn cancel_requests(&mut self);
}

/// Factory for outbound connections.
pub trait Connector: Send {
    fn create(&mut self) -> Box<dyn PeerConnection>;
}

/// Datagram send/receive subsystem.
///
/// Like [`PeerConnection::send`], `send` takes over one holder reference and
/// releases it through `pool` when the datagram is gone.
pub trait DatagramTransport: Send {
    fn send(&mut self, pool: &mut PacketPool, addr: SocketAddrV4, packet: PacketId, reliable: bool);

    fn is_listening(&self) -> bool;

    fn is_firewalled(&self) -> bool;

    fn listen(&mut self) -> Result<()>;

    /// Retransmit or expire pending reliable datagrams.
    fn flush_send_cache(&mut self, pool: &mut PacketPool);

    /// Stop listening and release anything still queued.
    fn shutdown(&mut self, pool: &mut PacketPool);
}

/// Inbound persistent-connection listener.
pub trait HandshakeListener: Send {
    fn listen(&mut self) -> Result<()>;

    fn on_timer(&mut self, now: u64);

    fn is_listening(&self) -> bool;

    fn is_firewalled(&self) -> bool;

    fn shutdown(&mut self);
}

/// Every collaborator a [`Network`](crate::network::manager::Network) needs.
pub struct Services {
    pub host_cache: Box<dyn HostCache>,
    pub bootstrap: Box<dyn Bootstrap>,
    pub connector: Box<dyn Connector>,
    pub datagrams: Box<dyn DatagramTransport>,
    pub handshakes: Box<dyn HandshakeListener>,
    pub routes: Box<dyn RoutingIndex>,
}
