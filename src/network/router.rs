//! # Router
//!
//! Resolves overlay GUIDs to a delivery channel and applies the forwarding
//! policy for addressed packets relayed on behalf of other peers.
//!
//! ## Forwarding policy
//! | received from         | may forward over                          |
//! |-----------------------|-------------------------------------------|
//! | leaf connection       | connection or datagram                    |
//! | hub / unknown role    | connection, only to a leaf                |
//! | datagram (no source)  | connection                                |
//!
//! A packet arriving as a datagram never leaves as one.
//!
//! ## Packet handoff
//! The router retains the packet once before handing it to a connection or
//! the datagram transport; the receiver owns that reference. The caller's own
//! reference is untouched and must still be released by the caller.

use std::collections::BTreeMap;
use std::net::SocketAddrV4;

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::core::pool::{PacketId, PacketPool};
use crate::error::Result;
use crate::network::node::{ConnectionState, ManagedNode, NodeId, NodeRole};
use crate::network::routing_table::RoutingIndex;
use crate::network::services::DatagramTransport;
use crate::utils::metrics::Metrics;

/// Channel a packet was handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Connection(NodeId),
    Datagram(SocketAddrV4),
    /// Nothing known for the GUID; not an error
    NoRoute,
}

/// Result of offering a received packet to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarding {
    /// No destination, or addressed to this node; process locally
    NotAddressed,
    /// Relayed; the packet is handled
    Forwarded(RouteOutcome),
    /// Addressed elsewhere but no permitted channel; the packet is handled
    Dropped,
}

/// Channels a relayed packet may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channels {
    pub connection: bool,
    pub datagram: bool,
}

/// Forwarding policy for a packet that arrived from `source_role` (`None`
/// for a datagram) towards a connection of `target_role`, if one is known.
pub fn allowed_channels(source_role: Option<NodeRole>, target_role: Option<NodeRole>) -> Channels {
    match source_role {
        Some(NodeRole::Leaf) => Channels {
            connection: true,
            datagram: true,
        },
        Some(NodeRole::Hub) | Some(NodeRole::Unknown) => Channels {
            connection: target_role == Some(NodeRole::Leaf),
            datagram: false,
        },
        None => Channels {
            connection: true,
            datagram: false,
        },
    }
}

/// Borrowed view over the manager state the router needs.
///
/// Obtained from [`Network::router`](crate::network::manager::Network::router).
pub struct Router<'a> {
    local_guid: Uuid,
    routes: &'a dyn RoutingIndex,
    nodes: &'a mut BTreeMap<NodeId, ManagedNode>,
    datagrams: &'a mut dyn DatagramTransport,
    pool: &'a mut PacketPool,
    metrics: &'a Metrics,
}

impl<'a> Router<'a> {
    pub(crate) fn new(
        local_guid: Uuid,
        routes: &'a dyn RoutingIndex,
        nodes: &'a mut BTreeMap<NodeId, ManagedNode>,
        datagrams: &'a mut dyn DatagramTransport,
        pool: &'a mut PacketPool,
        metrics: &'a Metrics,
    ) -> Self {
        Self {
            local_guid,
            routes,
            nodes,
            datagrams,
            pool,
            metrics,
        }
    }

    /// Deliver `packet` to `id` over whatever channel is known.
    ///
    /// A live connection wins over a datagram address.
    pub fn route_to(&mut self, id: &Uuid, packet: PacketId) -> Result<RouteOutcome> {
        let Some(route) = self.routes.find(id) else {
            self.metrics.route_missing();
            trace!(%id, "No route");
            return Ok(RouteOutcome::NoRoute);
        };

        if let Some(node) = route.node.filter(|n| self.is_live(*n)) {
            self.send_to_node(node, packet)?;
            return Ok(RouteOutcome::Connection(node));
        }
        if let Some(addr) = route.address {
            self.send_datagram(addr, packet)?;
            return Ok(RouteOutcome::Datagram(addr));
        }

        self.metrics.route_missing();
        Ok(RouteOutcome::NoRoute)
    }

    /// Relay a received packet if it is addressed to another node.
    ///
    /// `source` is the connection it arrived on, `None` for datagrams. A
    /// malformed destination child is a format error.
    pub fn route_from(&mut self, packet: PacketId, source: Option<NodeId>) -> Result<Forwarding> {
        let destination = match self.pool.packet(packet)?.destination() {
            Ok(d) => d,
            Err(e) => {
                self.metrics.format_error();
                return Err(e);
            }
        };
        let Some(destination) = destination else {
            return Ok(Forwarding::NotAddressed);
        };
        if destination == self.local_guid {
            return Ok(Forwarding::NotAddressed);
        }

        let source_role = match source {
            Some(id) => match self.nodes.get(&id) {
                Some(node) => Some(node.connection.role()),
                None => {
                    warn!(source = %id, "Addressed packet from unknown connection dropped");
                    self.metrics.packet_dropped();
                    return Ok(Forwarding::Dropped);
                }
            },
            None => None,
        };

        let Some(route) = self.routes.find(&destination) else {
            self.metrics.route_missing();
            self.metrics.packet_dropped();
            trace!(%destination, "No route for addressed packet");
            return Ok(Forwarding::Dropped);
        };

        let target = route.node.filter(|n| self.is_live(*n));
        let target_role = target
            .and_then(|n| self.nodes.get(&n))
            .map(|node| node.connection.role());
        let allowed = allowed_channels(source_role, target_role);

        if let (Some(node), true) = (target, allowed.connection) {
            self.send_to_node(node, packet)?;
            return Ok(Forwarding::Forwarded(RouteOutcome::Connection(node)));
        }
        if let (Some(addr), true) = (route.address, allowed.datagram) {
            self.send_datagram(addr, packet)?;
            return Ok(Forwarding::Forwarded(RouteOutcome::Datagram(addr)));
        }

        debug!(
            %destination,
            ?source_role,
            ?target_role,
            "Addressed packet dropped by forwarding policy"
        );
        self.metrics.packet_dropped();
        Ok(Forwarding::Dropped)
    }

    fn is_live(&self, node: NodeId) -> bool {
        self.nodes
            .get(&node)
            .is_some_and(|n| n.connection.state() != ConnectionState::Closed)
    }

    fn send_to_node(&mut self, node: NodeId, packet: PacketId) -> Result<()> {
        if let Some(managed) = self.nodes.get_mut(&node) {
            self.pool.retain(packet)?;
            managed.connection.send(self.pool, packet, true);
            self.metrics.forwarded_over_connection();
        }
        Ok(())
    }

    fn send_datagram(&mut self, addr: SocketAddrV4, packet: PacketId) -> Result<()> {
        self.pool.retain(packet)?;
        self.datagrams.send(self.pool, addr, packet, true);
        self.metrics.forwarded_over_datagram();
        Ok(())
    }
}
