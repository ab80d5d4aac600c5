//! # Network Layer
//!
//! Topology management and packet routing for the overlay.
//!
//! ## Components
//! - **Manager**: role quotas, maintenance tick, periodic KHL/LNI broadcasts
//! - **Router**: GUID to connection/datagram resolution and forwarding policy
//! - **Routing table**: in-memory TTL implementation of the routing index
//! - **Node**: the connection abstraction the manager observes
//! - **Services**: host cache, bootstrap, connector, datagram and handshake
//!   collaborators
//! - **Events**: node added/removed/updated notifications

pub mod events;
pub mod manager;
pub mod node;
pub mod router;
pub mod routing_table;
pub mod services;

pub use events::{EventBus, NetworkEvent};
pub use manager::{LocalNode, Network};
pub use node::{ConnectionState, NodeId, NodeRole, PeerConnection};
pub use router::{Forwarding, RouteOutcome, Router};
pub use routing_table::{Route, RoutingIndex, RoutingTable};
pub use services::{Bootstrap, Connector, DatagramTransport, HandshakeListener, HostCache, Services};
