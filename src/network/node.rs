//! Peer connections as seen by the topology manager.
//!
//! The connection itself (handshake, socket I/O, send queue) lives outside
//! this crate behind [`PeerConnection`]. The manager only observes role,
//! state and age, drives the connection's timer and hands it packets.

use std::fmt;
use std::net::SocketAddrV4;

use crate::core::pool::{PacketId, PacketPool};

/// Handle naming one managed connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Role a peer plays in the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeRole {
    /// Not yet known, typically before the handshake completes
    #[default]
    Unknown,
    /// Supernode
    Hub,
    Leaf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    NotConnected,
    Connecting,
    Connected,
    /// Terminal; the manager reaps the connection on its next pass
    Closed,
}

/// A persistent connection to one peer.
///
/// # Packet ownership
/// [`send`](PeerConnection::send) transfers one holder reference on `packet`
/// to the connection. The connection must release it through `pool` once the
/// packet has been written, or when the connection is aborted with the packet
/// still queued.
pub trait PeerConnection: Send {
    fn role(&self) -> NodeRole;

    fn state(&self) -> ConnectionState;

    /// Trusted, long-lived overlay member.
    fn is_core(&self) -> bool;

    /// Unix seconds at which the connection reached `Connected`.
    fn connected_since(&self) -> u64;

    fn remote_address(&self) -> SocketAddrV4;

    /// Begin an outbound connection; must not block.
    fn connect_to(&mut self, addr: SocketAddrV4);

    /// Per-tick housekeeping: timeouts, keepalives, queue draining.
    fn on_timer(&mut self, pool: &mut PacketPool, now: u64);

    fn send(&mut self, pool: &mut PacketPool, packet: PacketId, reliable: bool);

    /// Close gracefully; the connection reports `Closed` once done.
    fn disconnect(&mut self, pool: &mut PacketPool);

    /// Close immediately, releasing every queued packet.
    fn abort(&mut self, pool: &mut PacketPool);

    /// Local address as reported by the peer during the handshake, if any.
    fn reported_address(&self) -> Option<SocketAddrV4> {
        None
    }
}

/// A connection under management together with the last state/role pair
/// announced to subscribers.
pub(crate) struct ManagedNode {
    pub(crate) connection: Box<dyn PeerConnection>,
    pub(crate) last_seen: (ConnectionState, NodeRole),
}

impl ManagedNode {
    pub(crate) fn new(connection: Box<dyn PeerConnection>) -> Self {
        let last_seen = (connection.state(), connection.role());
        Self {
            connection,
            last_seen,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connection.state() == ConnectionState::Connected
    }

    /// Current pair when it differs from the last announced one.
    pub(crate) fn take_change(&mut self) -> Option<(ConnectionState, NodeRole)> {
        let now = (self.connection.state(), self.connection.role());
        if now == self.last_seen {
            None
        } else {
            self.last_seen = now;
            Some(now)
        }
    }
}

impl fmt::Debug for ManagedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedNode")
            .field("address", &self.connection.remote_address())
            .field("state", &self.connection.state())
            .field("role", &self.connection.role())
            .field("core", &self.connection.is_core())
            .finish()
    }
}
