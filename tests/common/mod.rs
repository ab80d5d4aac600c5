//! In-memory collaborators for driving a `Network` without sockets.
#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use overlay_protocol::config::{NetworkConfig, NodeMode};
use overlay_protocol::core::{Packet, PacketId, PacketPool};
use overlay_protocol::error::Result;
use overlay_protocol::network::{
    Bootstrap, ConnectionState, Connector, DatagramTransport, HandshakeListener, HostCache,
    Network, NodeId, NodeRole, PeerConnection, Route, RoutingIndex, RoutingTable, Services,
};
use uuid::Uuid;

// ----------------------------------------------------------------------
// Connections
// ----------------------------------------------------------------------

#[derive(Debug)]
pub struct PeerState {
    pub role: NodeRole,
    pub state: ConnectionState,
    pub core: bool,
    pub connected_since: u64,
    pub address: SocketAddrV4,
    /// Role adopted once an outbound connect completes
    pub role_on_connect: NodeRole,
    /// Keep sent packets queued (holding their reference) instead of writing them
    pub hold_sends: bool,
    /// Never finish connecting
    pub stalled: bool,
    pub queued: Vec<PacketId>,
    pub sent: Vec<Vec<u8>>,
    pub reported_address: Option<SocketAddrV4>,
    pub aborted: bool,
    pub disconnected: bool,
}

impl PeerState {
    pub fn sent_packets(&self) -> Vec<Packet> {
        self.sent
            .iter()
            .map(|wire| Packet::from_bytes(wire).unwrap().0)
            .collect()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent_packets()
            .iter()
            .map(|p| p.packet_type().to_string())
            .collect()
    }
}

pub type SharedPeer = Arc<Mutex<PeerState>>;

pub struct MockConnection {
    shared: SharedPeer,
}

impl MockConnection {
    pub fn outbound(role_on_connect: NodeRole) -> (Self, SharedPeer) {
        let shared = Arc::new(Mutex::new(PeerState {
            role: NodeRole::Unknown,
            state: ConnectionState::NotConnected,
            core: false,
            connected_since: 0,
            address: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            role_on_connect,
            hold_sends: false,
            stalled: false,
            queued: Vec::new(),
            sent: Vec::new(),
            reported_address: None,
            aborted: false,
            disconnected: false,
        }));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            shared,
        )
    }

    /// An already connected peer, as handed over by the listener.
    pub fn connected(
        role: NodeRole,
        connected_since: u64,
        core: bool,
        address: SocketAddrV4,
    ) -> (Box<dyn PeerConnection>, SharedPeer) {
        let (conn, shared) = Self::outbound(role);
        {
            let mut s = shared.lock().unwrap();
            s.role = role;
            s.state = ConnectionState::Connected;
            s.core = core;
            s.connected_since = connected_since;
            s.address = address;
        }
        (Box::new(conn), shared)
    }

    /// An inbound connection still handshaking.
    pub fn handshaking(address: SocketAddrV4) -> (Box<dyn PeerConnection>, SharedPeer) {
        let (conn, shared) = Self::outbound(NodeRole::Hub);
        {
            let mut s = shared.lock().unwrap();
            s.state = ConnectionState::Connecting;
            s.address = address;
        }
        (Box::new(conn), shared)
    }
}

fn release_all(pool: &mut PacketPool, queued: &mut Vec<PacketId>) {
    for id in queued.drain(..) {
        pool.release(id).unwrap();
    }
}

impl PeerConnection for MockConnection {
    fn role(&self) -> NodeRole {
        self.shared.lock().unwrap().role
    }

    fn state(&self) -> ConnectionState {
        self.shared.lock().unwrap().state
    }

    fn is_core(&self) -> bool {
        self.shared.lock().unwrap().core
    }

    fn connected_since(&self) -> u64 {
        self.shared.lock().unwrap().connected_since
    }

    fn remote_address(&self) -> SocketAddrV4 {
        self.shared.lock().unwrap().address
    }

    fn connect_to(&mut self, addr: SocketAddrV4) {
        let mut s = self.shared.lock().unwrap();
        s.address = addr;
        s.state = ConnectionState::Connecting;
    }

    fn on_timer(&mut self, _pool: &mut PacketPool, now: u64) {
        let mut s = self.shared.lock().unwrap();
        if s.state == ConnectionState::Connecting && !s.stalled {
            s.state = ConnectionState::Connected;
            s.role = s.role_on_connect;
            s.connected_since = now;
        }
    }

    fn send(&mut self, pool: &mut PacketPool, packet: PacketId, _reliable: bool) {
        let mut s = self.shared.lock().unwrap();
        if s.hold_sends {
            s.queued.push(packet);
            return;
        }
        let wire = pool.packet(packet).unwrap().to_wire().unwrap();
        s.sent.push(wire);
        pool.release(packet).unwrap();
    }

    fn disconnect(&mut self, pool: &mut PacketPool) {
        let mut s = self.shared.lock().unwrap();
        release_all(pool, &mut s.queued);
        s.disconnected = true;
        s.state = ConnectionState::Closed;
    }

    fn abort(&mut self, pool: &mut PacketPool) {
        let mut s = self.shared.lock().unwrap();
        release_all(pool, &mut s.queued);
        s.aborted = true;
        s.state = ConnectionState::Closed;
    }

    fn reported_address(&self) -> Option<SocketAddrV4> {
        self.shared.lock().unwrap().reported_address
    }
}

#[derive(Clone)]
pub struct MockConnector {
    pub role_on_connect: NodeRole,
    pub created: Arc<Mutex<Vec<SharedPeer>>>,
}

impl Connector for MockConnector {
    fn create(&mut self) -> Box<dyn PeerConnection> {
        let (conn, shared) = MockConnection::outbound(self.role_on_connect);
        self.created.lock().unwrap().push(shared);
        Box::new(conn)
    }
}

// ----------------------------------------------------------------------
// Host cache and bootstrap
// ----------------------------------------------------------------------

pub struct MockHostCache {
    /// Candidates left; `None` is an endless supply
    pub remaining: Option<usize>,
    pub next: u32,
    pub attempts: Arc<Mutex<Vec<SocketAddrV4>>>,
    pub saves: Arc<AtomicUsize>,
}

impl HostCache for MockHostCache {
    fn is_empty(&self) -> bool {
        self.remaining == Some(0)
    }

    fn connectable(&mut self, _now: u64) -> Option<SocketAddrV4> {
        if let Some(left) = self.remaining.as_mut() {
            if *left == 0 {
                return None;
            }
            *left -= 1;
        }
        self.next += 1;
        let [_, a, b, c] = self.next.to_be_bytes();
        Some(SocketAddrV4::new(Ipv4Addr::new(10, a, b, c), 6346))
    }

    fn mark_connect_attempt(&mut self, addr: SocketAddrV4, _now: u64) {
        self.attempts.lock().unwrap().push(addr);
    }

    fn save(&mut self) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockBootstrap {
    pub requests: Arc<AtomicUsize>,
    pub cancels: Arc<AtomicUsize>,
}

impl Bootstrap for MockBootstrap {
    fn is_requesting(&self) -> bool {
        self.requests.load(Ordering::SeqCst) > self.cancels.load(Ordering::SeqCst)
    }

    fn request_random(&mut self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel_requests(&mut self) {
        let requested = self.requests.load(Ordering::SeqCst);
        self.cancels.store(requested, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------
// Listeners
// ----------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct DatagramLog {
    pub listening: bool,
    pub shut_down: bool,
    pub flushes: usize,
    pub sent: Vec<(SocketAddrV4, Vec<u8>)>,
}

pub struct MockDatagrams {
    pub log: Arc<Mutex<DatagramLog>>,
}

impl DatagramTransport for MockDatagrams {
    fn send(&mut self, pool: &mut PacketPool, addr: SocketAddrV4, packet: PacketId, _reliable: bool) {
        let wire = pool.packet(packet).unwrap().to_wire().unwrap();
        self.log.lock().unwrap().sent.push((addr, wire));
        pool.release(packet).unwrap();
    }

    fn is_listening(&self) -> bool {
        self.log.lock().unwrap().listening
    }

    fn is_firewalled(&self) -> bool {
        false
    }

    fn listen(&mut self) -> Result<()> {
        self.log.lock().unwrap().listening = true;
        Ok(())
    }

    fn flush_send_cache(&mut self, _pool: &mut PacketPool) {
        self.log.lock().unwrap().flushes += 1;
    }

    fn shutdown(&mut self, _pool: &mut PacketPool) {
        let mut log = self.log.lock().unwrap();
        log.listening = false;
        log.shut_down = true;
    }
}

#[derive(Debug, Default)]
pub struct HandshakeLog {
    pub listening: bool,
    pub firewalled: bool,
    pub ticks: usize,
}

pub struct MockHandshakes {
    pub log: Arc<Mutex<HandshakeLog>>,
}

impl HandshakeListener for MockHandshakes {
    fn listen(&mut self) -> Result<()> {
        self.log.lock().unwrap().listening = true;
        Ok(())
    }

    fn on_timer(&mut self, _now: u64) {
        self.log.lock().unwrap().ticks += 1;
    }

    fn is_listening(&self) -> bool {
        self.log.lock().unwrap().listening
    }

    fn is_firewalled(&self) -> bool {
        self.log.lock().unwrap().firewalled
    }

    fn shutdown(&mut self) {
        self.log.lock().unwrap().listening = false;
    }
}

// ----------------------------------------------------------------------
// Routing
// ----------------------------------------------------------------------

/// Routing table the test keeps a handle to after the network takes it.
#[derive(Clone, Default)]
pub struct SharedRoutes(pub Arc<Mutex<RoutingTable>>);

impl SharedRoutes {
    pub fn add_node(&self, id: Uuid, node: NodeId) {
        self.0.lock().unwrap().add_node(id, node, 0);
    }

    pub fn add_address(&self, id: Uuid, addr: SocketAddrV4) {
        self.0.lock().unwrap().add_address(id, addr, 0);
    }
}

impl RoutingIndex for SharedRoutes {
    fn find(&self, id: &Uuid) -> Option<Route> {
        self.0.lock().unwrap().find(id)
    }

    fn remove(&mut self, node: NodeId) {
        self.0.lock().unwrap().remove(node)
    }

    fn clear(&mut self) {
        self.0.lock().unwrap().clear()
    }

    fn expire_stale(&mut self, now: u64) {
        self.0.lock().unwrap().expire_stale(now)
    }

    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

/// Handles onto every collaborator given to the network.
pub struct Harness {
    pub created: Arc<Mutex<Vec<SharedPeer>>>,
    pub attempts: Arc<Mutex<Vec<SocketAddrV4>>>,
    pub saves: Arc<AtomicUsize>,
    pub bootstrap_requests: Arc<AtomicUsize>,
    pub bootstrap_cancels: Arc<AtomicUsize>,
    pub datagrams: Arc<Mutex<DatagramLog>>,
    pub handshakes: Arc<Mutex<HandshakeLog>>,
    pub routes: SharedRoutes,
}

impl Harness {
    pub fn created(&self) -> Vec<SharedPeer> {
        self.created.lock().unwrap().clone()
    }
}

pub fn services(hosts: Option<usize>) -> (Services, Harness) {
    let harness = Harness {
        created: Arc::default(),
        attempts: Arc::default(),
        saves: Arc::default(),
        bootstrap_requests: Arc::default(),
        bootstrap_cancels: Arc::default(),
        datagrams: Arc::default(),
        handshakes: Arc::default(),
        routes: SharedRoutes::default(),
    };
    let services = Services {
        host_cache: Box::new(MockHostCache {
            remaining: hosts,
            next: 0,
            attempts: Arc::clone(&harness.attempts),
            saves: Arc::clone(&harness.saves),
        }),
        bootstrap: Box::new(MockBootstrap {
            requests: Arc::clone(&harness.bootstrap_requests),
            cancels: Arc::clone(&harness.bootstrap_cancels),
        }),
        connector: Box::new(MockConnector {
            role_on_connect: NodeRole::Hub,
            created: Arc::clone(&harness.created),
        }),
        datagrams: Box::new(MockDatagrams {
            log: Arc::clone(&harness.datagrams),
        }),
        handshakes: Box::new(MockHandshakes {
            log: Arc::clone(&harness.handshakes),
        }),
        routes: Box::new(harness.routes.clone()),
    };
    (services, harness)
}

/// Configuration with periodic broadcasts pushed far out so tests control them.
pub fn quiet_config(mode: NodeMode) -> NetworkConfig {
    NetworkConfig::default_with_overrides(|c| {
        c.node.mode = mode;
        c.node.address = "192.0.2.10:6346".to_string();
        c.topology.connect_factor = 1.0;
        c.topology.lni_interval_ticks = 10_000;
        c.topology.khl_interval_ticks = 10_000;
        c.topology.route_expiry_ticks = 10_000;
    })
}

/// Active network built from `config` with `hosts` connectable candidates.
pub fn network(config: &NetworkConfig, hosts: Option<usize>) -> (Network, Harness) {
    let (services, harness) = services(hosts);
    let mut network = Network::new(config, services).unwrap();
    network.activate();
    (network, harness)
}

pub fn addr(last: u8) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, last), 6346)
}
