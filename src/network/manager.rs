//! # Topology Manager
//!
//! [`Network`] keeps the local node connected to its quota of peers in each
//! role, drives every connection's timer, and periodically advertises the
//! local node (LNI) and the hubs it is connected to (KHL).
//!
//! The manager is sans-IO: sockets, handshakes, the host cache and the
//! datagram layer are collaborators behind the traits in
//! [`services`](crate::network::services), and every interaction with them is
//! a non-blocking handoff. It is driven by [`Network::on_timer`], nominally
//! once per second, from the overlay worker.
//!
//! ## Maintenance pass
//! 1. Tick every connection
//! 2. Reap closed connections
//! 3. Announce state/role changes
//! 4. Recount connected peers by role
//! 5. Evict the youngest peer of an over-quota role, or dial new candidates
//!    for an under-quota one

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{NetworkConfig, NodeConfig, NodeMode, TopologyConfig};
use crate::core::pool::{PacketId, PacketPool};
use crate::error::Result;
use crate::network::events::{EventBus, NetworkEvent};
use crate::network::node::{ConnectionState, ManagedNode, NodeId, NodeRole, PeerConnection};
use crate::network::router::Router;
use crate::network::routing_table::RoutingIndex;
use crate::network::services::{
    Bootstrap, Connector, DatagramTransport, HandshakeListener, HostCache, Services,
};
use crate::protocol::khl::KnownHubList;
use crate::protocol::lni::{HubStatus, LocalNodeInfo};
use crate::utils::metrics::{Metrics, Timer};
use crate::utils::time::wire_timestamp;

/// Identity the local node advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNode {
    pub guid: Uuid,
    pub address: SocketAddrV4,
    pub mode: NodeMode,
    pub vendor: [u8; 4],
}

impl LocalNode {
    /// Build from configuration, generating a GUID when none is configured.
    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        Ok(Self {
            guid: config.guid.unwrap_or_else(Uuid::new_v4),
            address: config.socket_addr()?,
            mode: config.mode,
            vendor: config.vendor_bytes()?,
        })
    }
}

/// Connected peers by role as of the last maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RoleCounts {
    hubs: usize,
    leaves: usize,
    core_hubs: usize,
    core_leaves: usize,
    /// Connections not yet connected, or connected with an unknown role
    pending: usize,
}

pub struct Network {
    config: TopologyConfig,
    local: LocalNode,
    active: bool,

    pool: PacketPool,
    nodes: BTreeMap<NodeId, ManagedNode>,
    next_node_id: u64,

    host_cache: Box<dyn HostCache>,
    bootstrap: Box<dyn Bootstrap>,
    connector: Box<dyn Connector>,
    datagrams: Box<dyn DatagramTransport>,
    handshakes: Box<dyn HandshakeListener>,
    routes: Box<dyn RoutingIndex>,

    events: EventBus,
    metrics: Arc<Metrics>,

    hubs_connected: usize,
    leaves_connected: usize,
    need_lni_update: bool,
    lni_wait: u32,
    khl_wait: u32,
    route_expiry_wait: u32,
}

impl Network {
    pub fn new(config: &NetworkConfig, services: Services) -> Result<Self> {
        let local = LocalNode::from_config(&config.node)?;
        let topology = config.topology.clone();
        info!(guid = %local.guid, address = %local.address, mode = ?local.mode, "Network created");

        Ok(Self {
            lni_wait: topology.lni_interval_ticks,
            khl_wait: topology.khl_interval_ticks,
            route_expiry_wait: topology.route_expiry_ticks,
            config: topology,
            local,
            active: false,
            pool: PacketPool::with_limits(config.pool.initial_slabs, config.pool.max_slabs),
            nodes: BTreeMap::new(),
            next_node_id: 1,
            host_cache: services.host_cache,
            bootstrap: services.bootstrap,
            connector: services.connector,
            datagrams: services.datagrams,
            handshakes: services.handshakes,
            routes: services.routes,
            events: EventBus::new(),
            metrics: Arc::new(Metrics::new()),
            hubs_connected: 0,
            leaves_connected: 0,
            need_lni_update: true,
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Worker entry: clear stale routes and start the listeners.
    #[instrument(skip(self), fields(guid = %self.local.guid))]
    pub fn setup(&mut self) -> Result<()> {
        self.routes.clear();
        self.datagrams.listen()?;
        self.handshakes.listen()?;
        info!("Network listeners started");
        Ok(())
    }

    /// Worker exit: stop bootstrap and listeners, then abort every connection.
    #[instrument(skip(self), fields(guid = %self.local.guid))]
    pub fn cleanup(&mut self) {
        self.bootstrap.cancel_requests();
        self.datagrams.shutdown(&mut self.pool);
        self.handshakes.shutdown();
        self.disconnect_all();
        info!(live_packets = self.pool.live(), "Network stopped");
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// One maintenance tick. Does nothing while inactive.
    pub fn on_timer(&mut self, now: u64) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        let _timer = Timer::start("network_tick");
        self.metrics.tick();

        if self.host_cache.is_empty() && !self.bootstrap.is_requesting() {
            debug!("Host cache empty, requesting bootstrap hosts");
            self.bootstrap.request_random();
        }

        if self.route_expiry_wait > 0 {
            self.route_expiry_wait -= 1;
        } else {
            self.routes.expire_stale(now);
            self.route_expiry_wait = self.config.route_expiry_ticks;
        }

        self.datagrams.flush_send_cache(&mut self.pool);
        self.handshakes.on_timer(now);

        self.maintain(now)?;

        if self.lni_wait > 0 {
            self.lni_wait -= 1;
        } else if self.need_lni_update {
            self.lni_wait = self.config.lni_interval_ticks;
            self.need_lni_update = false;
            if let Err(e) = self.broadcast_local_info() {
                warn!(error = %e, "Failed to broadcast local node info");
                self.need_lni_update = true;
            }
        }

        if self.khl_wait > 0 {
            self.khl_wait -= 1;
        } else {
            if let Err(e) = self.host_cache.save() {
                warn!(error = %e, "Failed to save host cache");
            }
            if let Err(e) = self.dispatch_khl(now) {
                warn!(error = %e, "Failed to dispatch known-hub-list");
            }
            self.khl_wait = self.config.khl_interval_ticks;
        }

        Ok(())
    }

    /// Tick connections, reap and announce changes, then enforce quotas.
    pub fn maintain(&mut self, now: u64) -> Result<()> {
        for node in self.nodes.values_mut() {
            node.connection.on_timer(&mut self.pool, now);
        }

        self.reap_closed();
        self.announce_changes();

        let counts = self.count_roles();
        if counts.hubs != self.hubs_connected || counts.leaves != self.leaves_connected {
            self.need_lni_update = true;
        }
        self.hubs_connected = counts.hubs;
        self.leaves_connected = counts.leaves;

        let hub_quota = match self.local.mode {
            NodeMode::Leaf => self.config.leaf_to_hub,
            NodeMode::Hub => self.config.hub_to_hub,
        };

        if counts.hubs > hub_quota {
            self.drop_youngest(NodeRole::Hub, counts.core_hubs * 2 > counts.hubs);
        } else if counts.hubs < hub_quota {
            self.connect_more(hub_quota - counts.hubs, counts.pending, now);
        }

        if self.local.mode == NodeMode::Hub && counts.leaves > self.config.hub_to_leaf {
            self.drop_youngest(NodeRole::Leaf, counts.core_leaves * 2 > counts.leaves);
        }

        Ok(())
    }

    fn reap_closed(&mut self) {
        let closed: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.connection.state() == ConnectionState::Closed)
            .map(|(id, _)| *id)
            .collect();

        for id in closed {
            if let Some(mut node) = self.nodes.remove(&id) {
                node.connection.abort(&mut self.pool);
                self.forget(id);
                debug!(node = %id, address = %node.connection.remote_address(), "Reaped closed connection");
            }
        }
    }

    fn announce_changes(&mut self) {
        let mut changes = Vec::new();
        for (id, node) in self.nodes.iter_mut() {
            if let Some((state, role)) = node.take_change() {
                let reported = match state {
                    ConnectionState::Connected => node.connection.reported_address(),
                    _ => None,
                };
                changes.push((*id, state, role, reported));
            }
        }

        for (id, state, role, reported) in changes {
            debug!(node = %id, ?state, ?role, "Connection updated");
            if let Some(addr) = reported {
                self.acquire_local_address(*addr.ip());
            }
            self.events
                .publish(NetworkEvent::NodeUpdated { id, state, role });
        }
    }

    fn count_roles(&self) -> RoleCounts {
        let mut counts = RoleCounts::default();
        for node in self.nodes.values() {
            if !node.is_connected() {
                counts.pending += 1;
                continue;
            }
            let core = node.connection.is_core();
            match node.connection.role() {
                NodeRole::Unknown => counts.pending += 1,
                NodeRole::Hub => {
                    counts.hubs += 1;
                    counts.core_hubs += usize::from(core);
                }
                NodeRole::Leaf => {
                    counts.leaves += 1;
                    counts.core_leaves += usize::from(core);
                }
            }
        }
        counts
    }

    /// Start up to `min(max_attempts, ceil(missing * factor)) - pending`
    /// outbound connections.
    fn connect_more(&mut self, missing: usize, pending: usize, now: u64) {
        let wanted = (missing as f64 * self.config.connect_factor).ceil() as usize;
        let attempts = wanted
            .min(self.config.max_connect_attempts)
            .saturating_sub(pending);

        for _ in 0..attempts {
            let Some(addr) = self.host_cache.connectable(now) else {
                debug!("No connectable hosts left");
                break;
            };
            self.host_cache.mark_connect_attempt(addr, now);
            if self.is_connected_to(addr) {
                continue;
            }

            let mut connection = self.connector.create();
            connection.connect_to(addr);
            let id = self.insert_node(connection);
            self.metrics.connect_attempt();
            debug!(node = %id, %addr, "Connecting");
        }
    }

    /// Disconnect the most recently connected eligible peer of `role`.
    ///
    /// Core peers are only eligible when `include_core` is set.
    fn drop_youngest(&mut self, role: NodeRole, include_core: bool) -> Option<NodeId> {
        let (id, node) = self
            .nodes
            .iter_mut()
            .filter(|(_, n)| {
                n.is_connected()
                    && n.connection.role() == role
                    && (include_core || !n.connection.is_core())
            })
            .min_by_key(|(_, n)| Reverse(n.connection.connected_since()))?;

        info!(
            node = %id,
            address = %node.connection.remote_address(),
            connected_since = node.connection.connected_since(),
            ?role,
            "Evicting youngest connection over quota"
        );
        node.connection.disconnect(&mut self.pool);
        self.metrics.eviction();
        Some(*id)
    }

    // ------------------------------------------------------------------
    // Broadcasts
    // ------------------------------------------------------------------

    /// Send local node info to every connected hub.
    pub fn broadcast_local_info(&mut self) -> Result<usize> {
        let info = LocalNodeInfo {
            address: self.local.address,
            guid: self.local.guid,
            vendor: self.local.vendor,
            hub_status: match self.local.mode {
                NodeMode::Hub => Some(HubStatus {
                    leaves: u16::try_from(self.leaves_connected).unwrap_or(u16::MAX),
                    max_leaves: u16::try_from(self.config.hub_to_leaf).unwrap_or(u16::MAX),
                }),
                NodeMode::Leaf => None,
            },
        };
        let packet = info.build(&mut self.pool)?;
        let sent = self.broadcast(packet, |n| {
            n.is_connected() && n.connection.role() == NodeRole::Hub
        })?;
        self.metrics.lni_broadcast();
        debug!(sent, "Broadcast local node info");
        Ok(sent)
    }

    /// Send the known-hub-list to every connected peer.
    pub fn dispatch_khl(&mut self, now: u64) -> Result<usize> {
        if self.nodes.is_empty() {
            return Ok(0);
        }
        let hubs = self
            .nodes
            .values()
            .filter(|n| n.is_connected() && n.connection.role() == NodeRole::Hub)
            .map(|n| n.connection.remote_address())
            .collect();
        let packet = KnownHubList::new(wire_timestamp(now), hubs).build(&mut self.pool)?;
        let sent = self.broadcast(packet, ManagedNode::is_connected)?;
        self.metrics.khl_broadcast();
        debug!(sent, "Dispatched known-hub-list");
        Ok(sent)
    }

    /// Hand `packet` to every node matching `filter`, then drop the caller's
    /// reference.
    fn broadcast<F>(&mut self, packet: PacketId, filter: F) -> Result<usize>
    where
        F: Fn(&ManagedNode) -> bool,
    {
        let mut sent = 0;
        for node in self.nodes.values_mut() {
            if !filter(node) {
                continue;
            }
            self.pool.retain(packet)?;
            node.connection.send(&mut self.pool, packet, true);
            sent += 1;
        }
        self.pool.release(packet)?;
        Ok(sent)
    }

    // ------------------------------------------------------------------
    // Node management
    // ------------------------------------------------------------------

    /// Take over an inbound connection.
    pub fn accept(&mut self, connection: Box<dyn PeerConnection>) -> NodeId {
        let id = self.insert_node(connection);
        debug!(node = %id, "Accepted inbound connection");
        id
    }

    fn insert_node(&mut self, connection: Box<dyn PeerConnection>) -> NodeId {
        let id = NodeId::new(self.next_node_id);
        self.next_node_id += 1;
        let address = connection.remote_address();
        self.nodes.insert(id, ManagedNode::new(connection));
        self.metrics.node_added();
        self.events.publish(NetworkEvent::NodeAdded { id, address });
        id
    }

    /// Abort and forget one connection. Returns false for unknown ids.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        match self.nodes.remove(&id) {
            Some(mut node) => {
                node.connection.abort(&mut self.pool);
                self.forget(id);
                true
            }
            None => false,
        }
    }

    /// Abort every connection, releasing anything they still hold.
    pub fn disconnect_all(&mut self) {
        let nodes = std::mem::take(&mut self.nodes);
        let count = nodes.len();
        for (id, mut node) in nodes {
            node.connection.abort(&mut self.pool);
            self.forget(id);
        }
        self.hubs_connected = 0;
        self.leaves_connected = 0;
        if count > 0 {
            info!(count, "Disconnected all nodes");
        }
    }

    fn forget(&mut self, id: NodeId) {
        self.routes.remove(id);
        self.metrics.node_removed();
        self.events.publish(NetworkEvent::NodeRemoved { id });
    }

    /// Adopt the IP a peer reports seeing us at; unspecified addresses are
    /// ignored and the port is kept.
    pub fn acquire_local_address(&mut self, ip: Ipv4Addr) {
        if ip.is_unspecified() || *self.local.address.ip() == ip {
            return;
        }
        info!(%ip, "Acquired local address");
        self.local.address.set_ip(ip);
        self.need_lni_update = true;
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn is_connected_to(&self, addr: SocketAddrV4) -> bool {
        self.nodes
            .values()
            .any(|n| n.connection.remote_address() == addr)
    }

    pub fn is_listening(&self) -> bool {
        self.handshakes.is_listening() && self.datagrams.is_listening()
    }

    pub fn is_firewalled(&self) -> bool {
        self.datagrams.is_firewalled() || self.handshakes.is_firewalled()
    }

    /// Whether another connection of `role` would be accepted.
    pub fn need_more(&self, role: NodeRole) -> bool {
        match (role, self.local.mode) {
            (NodeRole::Hub, NodeMode::Hub) => self.hubs_connected < self.config.hub_to_hub,
            (NodeRole::Hub, NodeMode::Leaf) => self.hubs_connected < self.config.leaf_to_hub,
            (NodeRole::Leaf, NodeMode::Hub) => self.leaves_connected < self.config.hub_to_leaf,
            _ => false,
        }
    }

    pub fn hubs_connected(&self) -> usize {
        self.hubs_connected
    }

    pub fn leaves_connected(&self) -> usize {
        self.leaves_connected
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn local(&self) -> &LocalNode {
        &self.local
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<NetworkEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn pool(&self) -> &PacketPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut PacketPool {
        &mut self.pool
    }

    pub fn routes(&self) -> &dyn RoutingIndex {
        self.routes.as_ref()
    }

    /// Router over the current connections, routing index and pool.
    pub fn router(&mut self) -> Router<'_> {
        Router::new(
            self.local.guid,
            self.routes.as_ref(),
            &mut self.nodes,
            self.datagrams.as_mut(),
            &mut self.pool,
            &self.metrics,
        )
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("local", &self.local)
            .field("active", &self.active)
            .field("nodes", &self.nodes)
            .field("hubs_connected", &self.hubs_connected)
            .field("leaves_connected", &self.leaves_connected)
            .finish_non_exhaustive()
    }
}
