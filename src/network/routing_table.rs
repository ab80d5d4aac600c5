//! Routing index: overlay GUID to connection and/or network address.
//!
//! [`RoutingIndex`] is what the router consults. [`RoutingTable`] is the
//! in-memory implementation: entries carry an expiry time, are refreshed on
//! every add, and are purged by [`RoutingIndex::expire_stale`], which the
//! topology manager calls on its route-expiry countdown. The table is bounded;
//! when full the oldest insertion is evicted first.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddrV4;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::config::TopologyConfig;
use crate::network::node::NodeId;

/// Entry cap for tables built from configuration.
pub const DEFAULT_MAX_ROUTES: usize = 50_000;

/// Where packets for one GUID can be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Route {
    /// Persistent connection the GUID was last seen on
    pub node: Option<NodeId>,
    /// Datagram endpoint the GUID was last seen at
    pub address: Option<SocketAddrV4>,
}

pub trait RoutingIndex: Send {
    fn find(&self, id: &Uuid) -> Option<Route>;

    /// Forget every route through `node`.
    fn remove(&mut self, node: NodeId);

    fn clear(&mut self);

    /// Drop entries whose lifetime ended before `now` (unix seconds).
    fn expire_stale(&mut self, now: u64);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct Entry {
    route: Route,
    expires_at: u64,
}

/// TTL-based routing table with bounded size.
#[derive(Debug)]
pub struct RoutingTable {
    entries: HashMap<Uuid, Entry>,
    /// Insertion order for FIFO eviction at capacity
    insertion_order: VecDeque<Uuid>,
    ttl: Duration,
    max_entries: usize,
}

impl RoutingTable {
    /// Table with the default route TTL and room for 50,000 GUIDs.
    pub fn new() -> Self {
        Self::from_config(&TopologyConfig::default())
    }

    /// Table whose entries live for `config.route_ttl`.
    pub fn from_config(config: &TopologyConfig) -> Self {
        Self::with_settings(config.route_ttl, DEFAULT_MAX_ROUTES)
    }

    pub fn with_settings(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Record that `id` is reachable over connection `node`.
    pub fn add_node(&mut self, id: Uuid, node: NodeId, now: u64) {
        self.upsert(id, now).route.node = Some(node);
    }

    /// Record that `id` is reachable at datagram endpoint `addr`.
    pub fn add_address(&mut self, id: Uuid, addr: SocketAddrV4, now: u64) {
        self.upsert(id, now).route.address = Some(addr);
    }

    fn upsert(&mut self, id: Uuid, now: u64) -> &mut Entry {
        let expires_at = now.saturating_add(self.ttl.as_secs());
        if !self.entries.contains_key(&id) {
            if self.entries.len() >= self.max_entries {
                self.remove_oldest();
            }
            self.insertion_order.push_back(id);
        }
        let entry = self.entries.entry(id).or_insert(Entry {
            route: Route::default(),
            expires_at,
        });
        entry.expires_at = expires_at;
        entry
    }

    fn remove_oldest(&mut self) {
        while let Some(id) = self.insertion_order.pop_front() {
            if self.entries.remove(&id).is_some() {
                debug!(%id, "Evicted oldest route at capacity");
                return;
            }
        }
    }

    fn compact_order(&mut self) {
        let entries = &self.entries;
        self.insertion_order.retain(|id| entries.contains_key(id));
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingIndex for RoutingTable {
    fn find(&self, id: &Uuid) -> Option<Route> {
        self.entries.get(id).map(|e| e.route)
    }

    fn remove(&mut self, node: NodeId) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            if entry.route.node == Some(node) {
                entry.route.node = None;
            }
            entry.route.address.is_some()
                || entry.route.node.is_some()
        });
        if self.entries.len() != before {
            self.compact_order();
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
        debug!("Routing table cleared");
    }

    fn expire_stale(&mut self, now: u64) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.compact_order();
            debug!(removed, remaining = self.entries.len(), "Expired stale routes");
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 9), 6346)
    }

    #[test]
    fn node_and_address_merge() {
        let mut table = RoutingTable::new();
        let id = Uuid::new_v4();
        table.add_node(id, NodeId::new(1), 100);
        table.add_address(id, addr(), 100);
        assert_eq!(
            table.find(&id),
            Some(Route {
                node: Some(NodeId::new(1)),
                address: Some(addr()),
            })
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn removing_node_keeps_address_routes() {
        let mut table = RoutingTable::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        table.add_node(a, NodeId::new(1), 0);
        table.add_node(b, NodeId::new(1), 0);
        table.add_address(b, addr(), 0);

        table.remove(NodeId::new(1));
        assert!(table.find(&a).is_none());
        assert_eq!(table.find(&b).unwrap().node, None);
        assert_eq!(table.find(&b).unwrap().address, Some(addr()));
    }

    #[test]
    fn expiry_uses_ttl_and_refresh() {
        let mut table = RoutingTable::with_settings(Duration::from_secs(60), 10);
        let id = Uuid::new_v4();
        table.add_node(id, NodeId::new(3), 1_000);
        table.expire_stale(1_059);
        assert!(table.find(&id).is_some());

        table.add_node(id, NodeId::new(3), 1_050);
        table.expire_stale(1_100);
        assert!(table.find(&id).is_some());
        table.expire_stale(1_110);
        assert!(table.is_empty());
    }

    #[test]
    fn configured_ttl_is_applied() {
        let config = TopologyConfig {
            route_ttl: Duration::from_secs(30),
            ..TopologyConfig::default()
        };
        let mut table = RoutingTable::from_config(&config);
        let id = Uuid::new_v4();
        table.add_address(id, addr(), 1_000);
        table.expire_stale(1_029);
        assert!(table.find(&id).is_some());
        table.expire_stale(1_030);
        assert!(table.is_empty());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut table = RoutingTable::with_settings(Duration::from_secs(60), 2);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            table.add_node(*id, NodeId::new(i as u64), 0);
        }
        assert_eq!(table.len(), 2);
        assert!(table.find(&ids[0]).is_none());
        assert!(table.find(&ids[2]).is_some());
    }
}
